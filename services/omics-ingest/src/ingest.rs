// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Hooks called by the surrounding ingestion framework
//!
//! - [`Ingest::initialize`] records `first_seen` for newly observed run
//!   folders.
//! - [`Ingest::on_file_event`] refreshes `last_update` and `status` after a
//!   file was created or updated remotely.
//! - [`Ingest::run_pass`] finalizes every run folder that is at rest:
//!   build both manifests, reconcile them, upload them, mark the collection
//!   complete and move the run folder out of the landing zone.
//!
//! Every hook opens its own remote session and closes it before returning.
//! No state is kept between calls; each pass re-derives everything from
//! the filesystem and the remote metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use strum::Display;
use tokio::sync::Semaphore;

use omics_ingest_types::{IngestStatus, ManifestSide};

use crate::completion::{self, CompletionCheck, MarkerFiles};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::manifest::{LocalManifestBuilder, RemoteManifestFetcher};
use crate::metadata::MetadataTracker;
use crate::metrics;
use crate::reconcile::reconcile;
use crate::relocate::relocate;
use crate::store::{Collection, Connector, Session, join_path};

/// A file created or updated by the replication pipeline
#[derive(Clone, Debug)]
pub struct FileEvent {
    /// Local path of the file
    pub path: PathBuf,
    /// Source root the run folders live in
    pub root: PathBuf,
    /// Remote path the file was replicated to
    pub target: String,
}

impl FileEvent {
    /// Collection mirroring the run folder that contains the file
    ///
    /// `target` ends with the file's path relative to its run folder;
    /// stripping that leaves the run folder's collection.
    pub fn run_folder_collection(&self) -> Result<String, IngestError> {
        let invalid = |reason: &str| IngestError::InvalidEventPath {
            path: self.path.clone(),
            reason: reason.to_string(),
        };

        let rel = self
            .path
            .strip_prefix(&self.root)
            .map_err(|_| invalid("not below the source root"))?;
        let mut components = rel.components();
        components.next();
        let inside = components.as_path();
        if inside.as_os_str().is_empty() {
            return Err(invalid("does not point into a run folder"));
        }
        let inside = inside
            .to_str()
            .ok_or_else(|| invalid("path is not valid UTF-8"))?;

        self.target
            .trim_end_matches('/')
            .strip_suffix(&format!("/{}", inside))
            .filter(|collection| !collection.is_empty())
            .map(str::to_string)
            .ok_or_else(|| invalid("target does not end with the path inside the run folder"))
    }
}

/// What happened to one run folder during a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FolderOutcome {
    /// Reconciled, marked complete and relocated
    Finalized,
    /// Not at rest yet
    Deferred,
    /// Aborted by an [`IngestError`]; retried next pass
    Failed,
    /// No matching destination collection
    Skipped,
}

/// Per-pass counts by [`FolderOutcome`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub finalized: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PassSummary {
    pub fn record(&mut self, outcome: FolderOutcome) {
        match outcome {
            FolderOutcome::Finalized => self.finalized += 1,
            FolderOutcome::Deferred => self.deferred += 1,
            FolderOutcome::Failed => self.failed += 1,
            FolderOutcome::Skipped => self.skipped += 1,
        }
        metrics::record_folder(&outcome.to_string());
    }

    pub fn total(&self) -> usize {
        self.finalized + self.deferred + self.failed + self.skipped
    }
}

/// Whether a source root entry is a run folder
///
/// Entries whose type cannot be determined are skipped for this pass.
fn is_run_folder(path: &Path, file_type: std::io::Result<std::fs::FileType>) -> bool {
    match file_type {
        Ok(file_type) => file_type.is_dir(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Skipping source root entry of unknown type"
            );
            false
        }
    }
}

/// The ingest lifecycle engine
pub struct Ingest {
    config: Arc<IngestConfig>,
    connector: Arc<dyn Connector>,
    check: Arc<dyn CompletionCheck>,
}

impl Ingest {
    pub fn new(
        config: IngestConfig,
        connector: Arc<dyn Connector>,
        check: Arc<dyn CompletionCheck>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            check,
        }
    }

    /// Engine detecting completion through the configured marker files
    pub fn with_marker_files(config: IngestConfig, connector: Arc<dyn Connector>) -> Self {
        let check = Arc::new(MarkerFiles::new(config.marker_files.clone()));
        Self::new(config, connector, check)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    async fn connect(&self) -> Result<Arc<dyn Session>> {
        self.connector
            .connect()
            .await
            .context("Failed to open remote store session")
    }

    /// Run folders below the source root paired with their collection
    ///
    /// Folders without a collection are returned separately.
    async fn tracked_folders(
        &self,
        session: &dyn Session,
    ) -> Result<(Vec<(PathBuf, Collection)>, Vec<PathBuf>)> {
        let target = session
            .get_collection(&self.config.target_collection)
            .await
            .with_context(|| {
                format!(
                    "Failed to look up target collection {}",
                    self.config.target_collection
                )
            })?;
        let mut collections: HashMap<String, Collection> = session
            .list_subcollections(&target.path)
            .await
            .with_context(|| format!("Failed to list collections below {}", target.path))?
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        let mut folders = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.source_root)
            .await
            .with_context(|| {
                format!(
                    "Failed to read source root {}",
                    self.config.source_root.display()
                )
            })?;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    // The listing cannot be resumed; work with what was read.
                    tracing::warn!(
                        source_root = %self.config.source_root.display(),
                        error = %e,
                        "Source root listing ended early"
                    );
                    break;
                }
            };
            let path = entry.path();
            if is_run_folder(&path, entry.file_type().await) {
                folders.push(path);
            }
        }
        folders.sort();

        let mut tracked = Vec::new();
        let mut untracked = Vec::new();
        for folder in folders {
            let collection = folder
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| collections.remove(n));
            match collection {
                Some(collection) => tracked.push((folder, collection)),
                None => {
                    tracing::info!(
                        run_folder = %folder.display(),
                        "Skipping run folder without destination collection"
                    );
                    untracked.push(folder);
                }
            }
        }
        Ok((tracked, untracked))
    }

    /// Record `first_seen` for every tracked run folder lacking it
    ///
    /// Returns the number of run folders newly recorded.
    pub async fn initialize(&self) -> Result<usize> {
        let session = self.connect().await?;
        let result = self.initialize_with(&*session).await;
        session.close().await;
        result
    }

    async fn initialize_with(&self, session: &dyn Session) -> Result<usize> {
        let (tracked, _) = self.tracked_folders(session).await?;
        let now = Utc::now();
        let mut recorded = 0;
        for (folder, collection) in tracked {
            match MetadataTracker::new(session, &collection.path)
                .record_first_seen(now)
                .await
            {
                Ok(true) => {
                    tracing::info!(
                        run_folder = %folder.display(),
                        collection = %collection.path,
                        "Recorded first_seen"
                    );
                    recorded += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        run_folder = %folder.display(),
                        collection = %collection.path,
                        error = %e,
                        "Failed to record first_seen"
                    );
                    metrics::record_failure(e.kind());
                }
            }
        }
        Ok(recorded)
    }

    /// Refresh `last_update` and mark the run folder's collection running
    ///
    /// A collection already marked complete keeps its status.
    pub async fn on_file_event(&self, event: &FileEvent) -> Result<(), IngestError> {
        let collection = event.run_folder_collection()?;
        let session = self
            .connector
            .connect()
            .await
            .map_err(IngestError::Metadata)?;

        let tracker = MetadataTracker::new(&*session, &collection);
        let result = async {
            tracker.record_last_update(Utc::now()).await?;
            tracker.advance_status(IngestStatus::Running).await?;
            Ok::<_, IngestError>(())
        }
        .await;
        session.close().await;

        if let Err(e) = &result {
            tracing::warn!(
                path = %event.path.display(),
                collection = %collection,
                error = %e,
                "Failed to refresh run folder metadata"
            );
            metrics::record_failure(e.kind());
        }
        result
    }

    /// Finalize all run folders that are at rest
    ///
    /// Folder failures are logged and counted; only failures affecting the
    /// whole pass (no session, unreadable source root) are returned.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        metrics::record_pass();
        let session = self.connect().await?;
        let result = self.run_pass_with(Arc::clone(&session)).await;
        session.close().await;
        result
    }

    async fn run_pass_with(&self, session: Arc<dyn Session>) -> Result<PassSummary> {
        let (tracked, untracked) = self.tracked_folders(&*session).await?;
        let mut summary = PassSummary::default();
        for _ in &untracked {
            summary.record(FolderOutcome::Skipped);
        }

        tracing::info!(
            tracked = tracked.len(),
            skipped = untracked.len(),
            "Starting finalizer pass"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.folder_concurrency));
        let mut handles = Vec::with_capacity(tracked.len());
        for (folder, collection) in tracked {
            let finalizer = self.finalizer_for(Arc::clone(&session), Arc::clone(&semaphore));
            handles.push(tokio::spawn(async move {
                finalizer.finalize(&folder, &collection).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Run folder task join error");
                    summary.record(FolderOutcome::Failed);
                }
            }
        }

        tracing::info!(
            finalized = summary.finalized,
            deferred = summary.deferred,
            failed = summary.failed,
            skipped = summary.skipped,
            "Finalizer pass complete"
        );
        Ok(summary)
    }

    fn finalizer_for(&self, session: Arc<dyn Session>, semaphore: Arc<Semaphore>) -> Finalizer {
        Finalizer {
            config: Arc::clone(&self.config),
            check: Arc::clone(&self.check),
            session,
            semaphore,
            builder: LocalManifestBuilder::new(
                self.config.hash_workers,
                self.config.hash_algorithm,
            ),
        }
    }
}

/// Finalizes a single run folder within a pass
struct Finalizer {
    config: Arc<IngestConfig>,
    check: Arc<dyn CompletionCheck>,
    session: Arc<dyn Session>,
    semaphore: Arc<Semaphore>,
    builder: LocalManifestBuilder,
}

impl Finalizer {
    async fn finalize(&self, folder: &Path, collection: &Collection) -> FolderOutcome {
        let _permit = self.semaphore.acquire().await;

        match self.try_finalize(folder, collection).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    IngestError::Relocation { .. } => tracing::error!(
                        run_folder = %folder.display(),
                        collection = %collection.path,
                        kind = e.kind(),
                        error = %e,
                        "Run folder verified but not relocated"
                    ),
                    _ => tracing::warn!(
                        run_folder = %folder.display(),
                        collection = %collection.path,
                        kind = e.kind(),
                        error = %e,
                        "Run folder not finalized"
                    ),
                }
                metrics::record_failure(e.kind());
                FolderOutcome::Failed
            }
        }
    }

    async fn try_finalize(
        &self,
        folder: &Path,
        collection: &Collection,
    ) -> Result<FolderOutcome, IngestError> {
        let tracker = MetadataTracker::new(&*self.session, &collection.path);

        let last_updates = tracker.last_updates().await?;
        let readiness = completion::evaluate(
            folder,
            &*self.check,
            &last_updates,
            self.config.delay_until_at_rest(),
            Utc::now(),
        );
        if !readiness.is_ready() {
            tracing::info!(
                run_folder = %folder.display(),
                readiness = ?readiness,
                "Run folder not at rest"
            );
            return Ok(FolderOutcome::Deferred);
        }

        tracing::info!(
            run_folder = %folder.display(),
            readiness = ?readiness,
            "Run folder at rest, reconciling"
        );

        let (local_path, local) = self.builder.build(folder).await?;
        let (remote_path, remote) = RemoteManifestFetcher::new(&*self.session)
            .build(&collection.path, folder)
            .await?;

        let report = reconcile(&local, &remote, &collection.path);
        if !report.is_clean() {
            report.log(&collection.path);
            return Err(IngestError::ReconciliationMismatch(report));
        }
        tracing::info!(
            run_folder = %folder.display(),
            files = report.matched,
            "Manifests match"
        );

        for (side, path) in [
            (ManifestSide::Local, &local_path),
            (ManifestSide::Remote, &remote_path),
        ] {
            let dest = join_path(&collection.path, side.file_name());
            self.session
                .put_object(path, &dest)
                .await
                .map_err(IngestError::Upload)?;
            self.session
                .checksum_object(&dest)
                .await
                .map_err(IngestError::Upload)?;
        }

        tracker.record_status(IngestStatus::Complete).await?;
        relocate(folder).await?;
        Ok(FolderOutcome::Finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn event(path: &str, target: &str) -> FileEvent {
        FileEvent {
            path: PathBuf::from(path),
            root: PathBuf::from("/data/RunsA"),
            target: target.to_string(),
        }
    }

    #[test_case(
        "/data/RunsA/Run123/RunInfo.xml",
        "/zone/home/ingest/Run123/RunInfo.xml",
        "/zone/home/ingest/Run123" ; "top level file"
    )]
    #[test_case(
        "/data/RunsA/Run123/Data/Intensities/a.bcl",
        "/zone/home/ingest/Run123/Data/Intensities/a.bcl",
        "/zone/home/ingest/Run123" ; "nested file"
    )]
    fn event_collection_is_derived(path: &str, target: &str, expected: &str) {
        assert_eq!(event(path, target).run_folder_collection().unwrap(), expected);
    }

    #[test_case("/elsewhere/Run123/a", "/zone/Run123/a" ; "outside root")]
    #[test_case("/data/RunsA/Run123", "/zone/Run123" ; "run folder itself")]
    #[test_case("/data/RunsA/Run123/a", "/zone/Run123/b" ; "target mismatch")]
    #[test_case("/data/RunsA/Run123/a", "/a" ; "empty collection")]
    fn invalid_events_are_rejected(path: &str, target: &str) {
        let err = event(path, target).run_folder_collection().unwrap_err();
        assert_eq!(err.kind(), "invalid_event_path");
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = PassSummary::default();
        for outcome in [
            FolderOutcome::Finalized,
            FolderOutcome::Deferred,
            FolderOutcome::Deferred,
            FolderOutcome::Skipped,
        ] {
            summary.record(outcome);
        }
        assert_eq!(
            summary,
            PassSummary {
                finalized: 1,
                deferred: 2,
                failed: 0,
                skipped: 1,
            }
        );
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn unreadable_entries_are_not_run_folders() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("SampleSheet.csv");
        std::fs::write(&file, b"x").unwrap();

        let dir_type = std::fs::symlink_metadata(dir.path()).map(|m| m.file_type());
        let file_type = std::fs::symlink_metadata(&file).map(|m| m.file_type());
        assert!(is_run_folder(dir.path(), dir_type));
        assert!(!is_run_folder(&file, file_type));
        assert!(!is_run_folder(
            &dir.path().join("Run9"),
            Err(std::io::Error::other("stale file handle"))
        ));
    }

    #[test]
    fn outcome_labels_are_snake_case() {
        assert_eq!(FolderOutcome::Finalized.to_string(), "finalized");
        assert_eq!(FolderOutcome::Skipped.to_string(), "skipped");
    }
}
