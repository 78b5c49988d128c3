// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Error types for the ingest engine
//!
//! Every variant of [`IngestError`] aborts processing of a single run folder
//! for the current pass. None of them is retried within the pass.

use std::path::PathBuf;

use thiserror::Error;

use crate::reconcile::ReconcileReport;

/// Errors raised by a remote store session
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unparseable catalog output: {0}")]
    Parse(String),

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort the processing of one run folder
#[derive(Debug, Error)]
pub enum IngestError {
    /// Hashing the source side failed; no local manifest was kept
    #[error("Computing checksums for {path} failed: {source}")]
    ChecksumBuild {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pulling the remote manifest failed; the partial file was discarded
    #[error("Creating remote manifest for {collection} failed: {source}")]
    RemoteQuery {
        collection: String,
        #[source]
        source: StoreError,
    },

    /// The two manifests differ
    #[error("Difference in manifests: {0}")]
    ReconciliationMismatch(ReconcileReport),

    /// Moving the run folder into the ingested tree failed
    #[error("Could not move {from} to {to}: {source}")]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing collection metadata failed
    #[error("Metadata update failed: {0}")]
    Metadata(#[source] StoreError),

    /// Storing a manifest object remotely failed
    #[error("Manifest upload failed: {0}")]
    Upload(#[source] StoreError),

    /// A file event does not point into a run folder below the source root
    #[error("Invalid event path {path}: {reason}")]
    InvalidEventPath { path: PathBuf, reason: String },
}

impl IngestError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChecksumBuild { .. } => "checksum_build",
            Self::RemoteQuery { .. } => "remote_query",
            Self::ReconciliationMismatch(_) => "reconciliation_mismatch",
            Self::Relocation { .. } => "relocation",
            Self::Metadata(_) => "metadata",
            Self::Upload(_) => "upload",
            Self::InvalidEventPath { .. } => "invalid_event_path",
        }
    }
}
