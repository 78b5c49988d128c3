// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Omics Ingest Library
//!
//! Tracks sequencer run folders through archival ingestion. Files written
//! to the landing zone are replicated into a remote store by an external
//! sync pipeline; this library decides when a run folder has stopped
//! changing, verifies that the remote copy matches the source byte for
//! byte, and then moves the run folder out of the landing zone.
//!
//! # Modules
//!
//! - [`completion`] - Completion markers and at-rest detection
//! - [`config`] - Engine configuration
//! - [`error`] - Error types
//! - [`ingest`] - Hooks for the ingestion framework and the finalizer pass
//! - [`manifest`] - Local and remote manifests
//! - [`metadata`] - Ingest state stored on the destination collection
//! - [`metrics`] - Prometheus counters
//! - [`reconcile`] - Manifest comparison
//! - [`relocate`] - Moving finalized run folders
//! - [`store`] - Remote store sessions

pub mod completion;
pub mod config;
pub mod error;
pub mod ingest;
pub mod manifest;
pub mod metadata;
pub mod metrics;
pub mod reconcile;
pub mod relocate;
pub mod store;

pub use config::IngestConfig;
pub use error::{IngestError, StoreError};
pub use ingest::{FileEvent, FolderOutcome, Ingest, PassSummary};
