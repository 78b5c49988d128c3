// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Remote manifest retrieval
//!
//! Builds the manifest of a destination collection from two catalog
//! queries: objects directly in the collection (minus the manifests) and
//! objects in any of its subcollections. Paths stay remote-absolute; the
//! reconciler normalizes them.

use std::path::{Path, PathBuf};

use omics_ingest_types::{MANIFEST_NAMES, ManifestSide};

use super::local::remove_if_exists;
use super::{Manifest, ManifestEntry};
use crate::error::{IngestError, StoreError};
use crate::store::{CatalogScope, Session};

/// Pulls the manifest of a destination collection from the catalog
pub struct RemoteManifestFetcher<'a> {
    session: &'a dyn Session,
}

impl<'a> RemoteManifestFetcher<'a> {
    pub fn new(session: &'a dyn Session) -> Self {
        Self { session }
    }

    /// Query the catalog for all objects below `collection`
    pub async fn fetch(&self, collection: &str) -> Result<Manifest, StoreError> {
        let scopes = [
            CatalogScope::Exact {
                collection: collection.to_string(),
                exclude_names: MANIFEST_NAMES.iter().map(|s| s.to_string()).collect(),
            },
            CatalogScope::Prefix {
                collection: collection.to_string(),
            },
        ];

        let mut entries = Vec::new();
        for scope in &scopes {
            let objects = self.session.query_objects(scope).await?;
            entries.extend(objects.into_iter().map(|o| ManifestEntry {
                path: o.path,
                size: o.size,
                checksum: o.checksum,
            }));
        }
        Ok(Manifest::new(ManifestSide::Remote, entries))
    }

    /// Fetch the manifest of `collection` and store it in `folder`
    ///
    /// Any stale file is removed first; on failure the partial file is
    /// discarded.
    pub async fn build(
        &self,
        collection: &str,
        folder: &Path,
    ) -> Result<(PathBuf, Manifest), IngestError> {
        let manifest_path = folder.join(ManifestSide::Remote.file_name());
        remove_if_exists(&manifest_path).await;

        let result = async {
            let manifest = self.fetch(collection).await?;
            tokio::fs::write(&manifest_path, manifest.render(&[])).await?;
            Ok::<_, StoreError>(manifest)
        }
        .await;

        match result {
            Ok(manifest) => Ok((manifest_path, manifest)),
            Err(source) => {
                remove_if_exists(&manifest_path).await;
                Err(IngestError::RemoteQuery {
                    collection: collection.to_string(),
                    source,
                })
            }
        }
    }
}
