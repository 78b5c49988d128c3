// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Manifest reconciliation
//!
//! Compares the manifest computed from the source side with the one pulled
//! from the remote catalog. Both are keyed by run-folder relative path
//! (`./sub/file`); remote paths have the destination collection prefix
//! replaced by `.` first.
//!
//! Reconciliation succeeds only when both key sets are identical and every
//! shared key agrees on size and checksum. Comparing checksums, not just
//! presence, is what catches corruption introduced by the replication path.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use omics_ingest_types::ManifestSide;
use tracing::error;

use crate::manifest::Manifest;

/// Upper bound on items listed per category in the logs
pub const MAX_LISTED: usize = 10;

/// Size and checksum recorded for a path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub checksum: String,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, checksum {}", self.size, self.checksum)
    }
}

/// A path present on both sides whose records differ
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub path: String,
    pub local: FileInfo,
    pub remote: FileInfo,
}

impl Mismatch {
    pub fn size_differs(&self) -> bool {
        self.local.size != self.remote.size
    }

    pub fn checksum_differs(&self) -> bool {
        self.local.checksum != self.remote.checksum
    }
}

/// A path listed twice in one manifest with different records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub side: ManifestSide,
    pub path: String,
    pub first: FileInfo,
    pub second: FileInfo,
}

/// Itemized outcome of a reconciliation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Paths that agree on both sides
    pub matched: usize,
    /// Sorted by path
    pub mismatches: Vec<Mismatch>,
    pub extra_local: BTreeSet<String>,
    pub extra_remote: BTreeSet<String>,
    pub conflicts: Vec<Conflict>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
            && self.extra_local.is_empty()
            && self.extra_remote.is_empty()
            && self.conflicts.is_empty()
    }

    /// Log every difference, listing at most [`MAX_LISTED`] items per category
    pub fn log(&self, collection: &str) {
        for m in self.mismatches.iter().take(MAX_LISTED) {
            if m.size_differs() {
                error!(
                    collection,
                    path = %m.path,
                    local = m.local.size,
                    remote = m.remote.size,
                    "File size does not match"
                );
            }
            if m.checksum_differs() {
                error!(
                    collection,
                    path = %m.path,
                    local = %m.local.checksum,
                    remote = %m.remote.checksum,
                    "File checksum does not match"
                );
            }
        }
        if self.mismatches.len() > MAX_LISTED {
            error!(
                collection,
                count = self.mismatches.len(),
                "More mismatching files not shown"
            );
        }
        for c in self.conflicts.iter().take(MAX_LISTED) {
            error!(
                collection,
                side = %c.side,
                path = %c.path,
                first = %c.first,
                second = %c.second,
                "Path listed twice with different records"
            );
        }
        if !self.extra_local.is_empty() {
            error!(
                collection,
                count = self.extra_local.len(),
                shown = ?first_items(&self.extra_local),
                "Items present locally but not remotely"
            );
        }
        if !self.extra_remote.is_empty() {
            error!(
                collection,
                count = self.extra_remote.len(),
                shown = ?first_items(&self.extra_remote),
                "Items present remotely but not locally"
            );
        }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatched, {} only local, {} only remote, {} conflicting",
            self.mismatches.len(),
            self.extra_local.len(),
            self.extra_remote.len(),
            self.conflicts.len()
        )
    }
}

fn first_items(set: &BTreeSet<String>) -> Vec<&str> {
    set.iter().take(MAX_LISTED).map(String::as_str).collect()
}

/// Map a remote-absolute path onto the run-folder relative key space
///
/// Paths outside `collection` are returned unchanged, so they can never
/// match a local key.
pub fn normalize_remote_path(path: &str, collection: &str) -> String {
    let prefix = format!("{}/", collection.trim_end_matches('/'));
    match path.strip_prefix(&prefix) {
        Some(rest) => format!("./{}", rest),
        None => path.to_string(),
    }
}

fn index(
    manifest: &Manifest,
    key_of: impl Fn(&str) -> String,
    conflicts: &mut Vec<Conflict>,
) -> BTreeMap<String, FileInfo> {
    let mut map = BTreeMap::new();
    for entry in &manifest.entries {
        let info = FileInfo {
            size: entry.size,
            checksum: entry.checksum.clone(),
        };
        match map.entry(key_of(&entry.path)) {
            Entry::Vacant(slot) => {
                slot.insert(info);
            }
            Entry::Occupied(slot) => {
                if *slot.get() != info {
                    conflicts.push(Conflict {
                        side: manifest.side,
                        path: slot.key().clone(),
                        first: slot.get().clone(),
                        second: info,
                    });
                }
            }
        }
    }
    map
}

/// Compare a local and a remote manifest of the run folder mirrored by
/// `collection`
pub fn reconcile(local: &Manifest, remote: &Manifest, collection: &str) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let local_map = index(local, |p| p.to_string(), &mut report.conflicts);
    let remote_map = index(
        remote,
        |p| normalize_remote_path(p, collection),
        &mut report.conflicts,
    );

    for (path, local_info) in &local_map {
        match remote_map.get(path) {
            Some(remote_info) if remote_info == local_info => report.matched += 1,
            Some(remote_info) => report.mismatches.push(Mismatch {
                path: path.clone(),
                local: local_info.clone(),
                remote: remote_info.clone(),
            }),
            None => {
                report.extra_local.insert(path.clone());
            }
        }
    }
    report.extra_remote = remote_map
        .keys()
        .filter(|k| !local_map.contains_key(*k))
        .cloned()
        .collect();

    report
}
