// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Omics ingest finalizer
//!
//! Runs the ingest hooks against the iRODS icommands environment of the
//! calling user. `run` is the long-lived daemon mode; the other subcommands
//! execute a single hook and exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use omics_ingest::manifest::{HashAlgorithm, LocalManifestBuilder};
use omics_ingest::store::IcommandsConnector;
use omics_ingest::{FileEvent, Ingest, IngestConfig, metrics};

#[derive(Parser)]
#[command(name = "omics-ingest")]
#[command(about = "Verify replicated run folders and move them out of the landing zone")]
#[command(version)]
struct Cli {
    /// JSON configuration file; the INGEST_* environment is used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the icommands
    #[arg(long, global = true, env = "INGEST_ICOMMANDS_DIR")]
    icommands_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run finalizer passes until interrupted
    Run,

    /// Run a single finalizer pass
    Pass,

    /// Record first_seen for newly observed run folders
    FirstSeen,

    /// Refresh metadata after a file was replicated
    Event {
        /// Local path of the created or updated file
        #[arg(long)]
        path: PathBuf,

        /// Remote path the file was replicated to
        #[arg(long)]
        target: String,
    },

    /// Print the local manifest of a run folder
    Manifest {
        /// Run folder to checksum
        folder: PathBuf,

        /// Digest to use
        #[arg(long, default_value_t = HashAlgorithm::Md5)]
        algorithm: HashAlgorithm,

        /// Number of checksum workers
        #[arg(long, default_value_t = 8)]
        workers: usize,
    },
}

async fn load_config(path: Option<&PathBuf>) -> Result<IngestConfig> {
    match path {
        Some(path) => IngestConfig::from_file(path).await,
        None => IngestConfig::from_env(),
    }
}

async fn write_metrics(config: &IngestConfig) {
    if let Some(path) = &config.metrics_textfile
        && let Err(e) = metrics::write_textfile(path).await
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
    }
}

async fn one_pass(ingest: &Ingest) -> Result<()> {
    let recorded = ingest.initialize().await?;
    info!(recorded, "First-seen check done");
    let summary = ingest.run_pass().await?;
    info!(
        folders = summary.total(),
        finalized = summary.finalized,
        deferred = summary.deferred,
        failed = summary.failed,
        skipped = summary.skipped,
        "Pass done"
    );
    write_metrics(ingest.config()).await;
    Ok(())
}

async fn run_forever(ingest: &Ingest) -> Result<()> {
    let interval = ingest.config().pass_interval();
    info!(interval = ?interval, "Starting finalizer loop");
    loop {
        // A failed pass is retried on the next tick.
        if let Err(e) = one_pass(ingest).await {
            tracing::error!(error = ?e, "Finalizer pass failed");
            write_metrics(ingest.config()).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping finalizer loop");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "omics_ingest=info".to_string()),
        ))
        .init();

    // Diagnostics only; needs neither configuration nor the remote store.
    if let Commands::Manifest {
        folder,
        algorithm,
        workers,
    } = &cli.command
    {
        let manifest = LocalManifestBuilder::new(*workers, *algorithm)
            .compute(folder)
            .await
            .with_context(|| format!("Failed to checksum {}", folder.display()))?;
        print!("{}", manifest.render(&[]));
        return Ok(());
    }

    metrics::register_metrics();

    let config = load_config(cli.config.as_ref())
        .await
        .context("Failed to load configuration")?;

    info!(
        source_root = %config.source_root.display(),
        target = %config.target_collection,
        "Loaded configuration"
    );
    let connector = Arc::new(IcommandsConnector::new(cli.icommands_dir.clone()));
    let ingest = Ingest::with_marker_files(config, connector);

    match cli.command {
        Commands::Run => run_forever(&ingest).await,
        Commands::Pass => one_pass(&ingest).await,
        Commands::FirstSeen => {
            let recorded = ingest.initialize().await?;
            info!(recorded, "First-seen check done");
            Ok(())
        }
        Commands::Event { path, target } => {
            let event = FileEvent {
                path,
                root: ingest.config().source_root.clone(),
                target,
            };
            ingest.on_file_event(&event).await?;
            Ok(())
        }
        Commands::Manifest { .. } => Ok(()),
    }
}
