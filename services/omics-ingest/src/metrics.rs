// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the ingest engine
//!
//! The engine has no HTTP surface; metrics are exported by writing the
//! registry to a node-exporter textfile after each pass.

use std::path::Path;

use prometheus::{Counter, CounterVec, Opts, Registry, TextEncoder};

// Metric definitions are constant; failing to build one is a programming
// error. The module scopes the clippy allow to the definitions.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref REGISTRY: Registry = Registry::new();

        /// Finalizer passes started
        pub static ref PASSES_TOTAL: Counter = Counter::with_opts(
            Opts::new("omics_ingest_passes_total", "Finalizer passes started")
        ).expect("valid metric name");

        /// Run folders seen by the finalizer, by outcome
        pub static ref FOLDERS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("omics_ingest_folders_total", "Run folders processed by outcome"),
            &["outcome"]
        ).expect("valid metric name and labels");

        /// Failures by error kind
        pub static ref FAILURES_TOTAL: CounterVec = CounterVec::new(
            Opts::new("omics_ingest_failures_total", "Failures by kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        /// Bytes read while building local manifests
        pub static ref BYTES_HASHED_TOTAL: Counter = Counter::with_opts(
            Opts::new("omics_ingest_bytes_hashed_total", "Bytes hashed for local manifests")
        ).expect("valid metric name");
    }
}

pub use metrics_impl::{BYTES_HASHED_TOTAL, FAILURES_TOTAL, FOLDERS_TOTAL, PASSES_TOTAL, REGISTRY};

/// Register all metrics with the registry
///
/// Call once during startup. Metrics are still counted when unregistered,
/// they just do not show up in [`gather_metrics`].
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(PASSES_TOTAL.clone()))
        .expect("Failed to register PASSES_TOTAL");
    REGISTRY
        .register(Box::new(FOLDERS_TOTAL.clone()))
        .expect("Failed to register FOLDERS_TOTAL");
    REGISTRY
        .register(Box::new(FAILURES_TOTAL.clone()))
        .expect("Failed to register FAILURES_TOTAL");
    REGISTRY
        .register(Box::new(BYTES_HASHED_TOTAL.clone()))
        .expect("Failed to register BYTES_HASHED_TOTAL");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_pass() {
    PASSES_TOTAL.inc();
}

/// Record the outcome of one run folder (`finalized`, `deferred`, `failed`)
pub fn record_folder(outcome: &str) {
    FOLDERS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a failure by [`crate::error::IngestError::kind`]
pub fn record_failure(kind: &str) {
    FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_bytes_hashed(bytes: u64) {
    BYTES_HASHED_TOTAL.inc_by(bytes as f64);
}

/// Write the registry to a textfile
///
/// The file is replaced atomically so a collector never reads half of it.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, gather_metrics()).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_updates_counters() {
        let before = FAILURES_TOTAL.with_label_values(&["relocation"]).get();
        record_failure("relocation");
        assert!(FAILURES_TOTAL.with_label_values(&["relocation"]).get() >= before + 1.0);

        let before = BYTES_HASHED_TOTAL.get();
        record_bytes_hashed(1024);
        assert!(BYTES_HASHED_TOTAL.get() >= before + 1024.0);
    }

    #[tokio::test]
    async fn textfile_is_written_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omics_ingest.prom");
        write_textfile(&path).await.unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("omics_ingest.prom.tmp").exists());
    }
}
