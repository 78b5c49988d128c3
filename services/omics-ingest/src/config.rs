// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Ingest configuration
//!
//! Configuration is loaded either from environment variables (see
//! [`IngestConfig::from_env`]) or from a JSON file (see
//! [`IngestConfig::from_file`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::manifest::HashAlgorithm;

/// Default time that must pass after the last update before a run folder
/// with a completion marker is considered at rest (15 minutes)
const DEFAULT_DELAY_UNTIL_AT_REST_SECS: u64 = 15 * 60;

/// Default number of checksum workers per run folder
const DEFAULT_HASH_WORKERS: usize = 8;

/// Default number of run folders finalized concurrently
const DEFAULT_FOLDER_CONCURRENCY: usize = 4;

/// Default time between two finalizer passes
const DEFAULT_PASS_INTERVAL_SECS: u64 = 300;

/// Marker files written by the sequencer once the run folder is complete
const DEFAULT_MARKER_FILES: [&str; 2] = ["RTAComplete.txt", "CopyComplete.txt"];

/// Ingest engine configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Landing zone directory containing the run folders
    pub source_root: PathBuf,
    /// Remote collection whose subcollections mirror the run folders
    pub target_collection: String,
    /// Minimum age of the last update before finalizing
    pub delay_until_at_rest_secs: u64,
    /// Checksum worker pool size
    pub hash_workers: usize,
    /// Digest used for the local manifest
    pub hash_algorithm: HashAlgorithm,
    /// Any of these files inside a run folder marks it as done
    pub marker_files: Vec<String>,
    /// Run folders finalized concurrently within a pass
    pub folder_concurrency: usize,
    /// Sleep between passes in `run` mode
    pub pass_interval_secs: u64,
    /// Optional Prometheus textfile written after every pass
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            target_collection: String::new(),
            delay_until_at_rest_secs: DEFAULT_DELAY_UNTIL_AT_REST_SECS,
            hash_workers: DEFAULT_HASH_WORKERS,
            hash_algorithm: HashAlgorithm::default(),
            marker_files: DEFAULT_MARKER_FILES.iter().map(|s| s.to_string()).collect(),
            folder_concurrency: DEFAULT_FOLDER_CONCURRENCY,
            pass_interval_secs: DEFAULT_PASS_INTERVAL_SECS,
            metrics_textfile: None,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let source_root = std::env::var("INGEST_SOURCE_ROOT")
            .map(PathBuf::from)
            .context("INGEST_SOURCE_ROOT environment variable required")?;

        let target_collection = std::env::var("INGEST_TARGET_COLLECTION")
            .context("INGEST_TARGET_COLLECTION environment variable required")?;

        let delay_until_at_rest_secs = parse_env(
            "INGEST_DELAY_UNTIL_AT_REST_SECS",
            defaults.delay_until_at_rest_secs,
        )?;
        let hash_workers = parse_env("INGEST_HASH_WORKERS", defaults.hash_workers)?;
        let hash_algorithm = parse_env("INGEST_HASH_ALGORITHM", defaults.hash_algorithm)?;
        let folder_concurrency =
            parse_env("INGEST_FOLDER_CONCURRENCY", defaults.folder_concurrency)?;
        let pass_interval_secs = parse_env("INGEST_PASS_INTERVAL_SECS", defaults.pass_interval_secs)?;

        // Example: "RTAComplete.txt,CopyComplete.txt"
        let marker_files = std::env::var("INGEST_MARKER_FILES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.marker_files);

        let metrics_textfile = std::env::var("INGEST_METRICS_TEXTFILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let config = Self {
            source_root,
            target_collection,
            delay_until_at_rest_secs,
            hash_workers,
            hash_algorithm,
            marker_files,
            folder_concurrency,
            pass_interval_secs,
            metrics_textfile,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.source_root.as_os_str().is_empty() {
            bail!("source_root must be set");
        }
        if !self.target_collection.starts_with('/') {
            bail!(
                "target_collection must be an absolute collection path, got {:?}",
                self.target_collection
            );
        }
        if self.hash_workers == 0 {
            bail!("hash_workers must be at least 1");
        }
        if self.folder_concurrency == 0 {
            bail!("folder_concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn delay_until_at_rest(&self) -> Duration {
        Duration::from_secs(self.delay_until_at_rest_secs)
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}
