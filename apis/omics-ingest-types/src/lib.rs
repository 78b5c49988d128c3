// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the omics run folder ingest engine.
//!
//! A run folder on the landing zone maps by name onto a destination
//! collection in the remote store. The engine records its progress on that
//! collection as attribute/value/unit (AVU) metadata and leaves two manifest
//! objects behind once the folder has been verified.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};

// ============================================================================
// Metadata keys
// ============================================================================

/// AVU key recording when a run folder was first observed. Written once.
pub const KEY_FIRST_SEEN: &str = "omics::ingest::first_seen";

/// AVU key recording the last time a file of the run folder was replicated.
///
/// Replaced wholesale on every refresh. Concurrent writers may leave more
/// than one value behind; readers take the maximum.
pub const KEY_LAST_UPDATE: &str = "omics::ingest::last_update";

/// AVU key holding the [`IngestStatus`] of the destination collection.
pub const KEY_STATUS: &str = "omics::ingest::status";

// ============================================================================
// Manifest names
// ============================================================================

/// File name of the manifest computed from the source side.
pub const MANIFEST_LOCAL: &str = "_MANIFEST_LOCAL.txt";

/// File name of the manifest pulled from the remote catalog.
pub const MANIFEST_IRODS: &str = "_MANIFEST_IRODS.txt";

/// Both manifest names, which never take part in a manifest themselves.
pub const MANIFEST_NAMES: [&str; 2] = [MANIFEST_LOCAL, MANIFEST_IRODS];

// ============================================================================
// Status
// ============================================================================

/// Ingest status stored under [`KEY_STATUS`].
///
/// The derived ordering follows the lifecycle, so a status may only be
/// replaced by one that compares greater or equal.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    VariantNames,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Files of the run folder are still being replicated.
    Running,
    /// The run folder was reconciled and its manifests stored remotely.
    Complete,
}

impl IngestStatus {
    /// Whether moving from `self` to `next` keeps the status monotonic.
    pub fn can_advance_to(self, next: IngestStatus) -> bool {
        next >= self
    }
}

// ============================================================================
// Metadata records
// ============================================================================

/// An attribute/value/unit triple attached to a remote collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub unit: String,
}

impl MetadataRecord {
    /// Create a record without a unit.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            unit: String::new(),
        }
    }
}

// ============================================================================
// Manifests
// ============================================================================

/// Which side of the replication a manifest describes.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    VariantNames,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ManifestSide {
    /// Computed from the files under the run folder.
    Local,
    /// Pulled from the catalog of the destination collection.
    Remote,
}

impl ManifestSide {
    /// File name used for this side's manifest, locally and remotely.
    pub fn file_name(self) -> &'static str {
        match self {
            ManifestSide::Local => MANIFEST_LOCAL,
            ManifestSide::Remote => MANIFEST_IRODS,
        }
    }
}
