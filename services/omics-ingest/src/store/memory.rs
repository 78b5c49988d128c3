// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! In-process remote store
//!
//! Keeps collections, metadata and objects in memory. Used by the test
//! suites and for dry runs of the finalizer against a local landing zone.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use omics_ingest_types::MetadataRecord;

use super::{CatalogObject, CatalogScope, Collection, Connector, Session};
use crate::error::StoreError;
use crate::manifest::HashAlgorithm;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    checksum: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeSet<String>,
    metadata: HashMap<String, Vec<MetadataRecord>>,
    objects: BTreeMap<String, StoredObject>,
}

/// Remote store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    algorithm: HashAlgorithm,
    fail_queries: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a collection and all of its ancestors
    pub async fn create_collection(&self, path: &str) {
        let mut state = self.state.lock().await;
        let mut current = path.trim_end_matches('/');
        while !current.is_empty() {
            state.collections.insert(current.to_string());
            current = parent_of(current);
        }
    }

    /// Store an object as the replication pipeline would, checksum included
    pub async fn insert_object(&self, path: &str, data: &[u8]) {
        self.create_collection(parent_of(path)).await;
        let checksum = self.digest(data);
        let mut state = self.state.lock().await;
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data: data.to_vec(),
                checksum: Some(checksum),
            },
        );
    }

    /// Overwrite the checksum recorded for an object
    pub async fn set_recorded_checksum(&self, path: &str, checksum: &str) {
        let mut state = self.state.lock().await;
        if let Some(object) = state.objects.get_mut(path) {
            object.checksum = Some(checksum.to_string());
        }
    }

    /// Contents of a stored object
    pub async fn object(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state.objects.get(path).map(|o| o.data.clone())
    }

    /// Checksum recorded for a stored object
    pub async fn recorded_checksum(&self, path: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.objects.get(path).and_then(|o| o.checksum.clone())
    }

    /// All metadata of a collection
    pub async fn metadata(&self, collection: &str) -> Vec<MetadataRecord> {
        let state = self.state.lock().await;
        state.metadata.get(collection).cloned().unwrap_or_default()
    }

    /// Make every catalog query fail until reset
    pub fn set_query_failure(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of sessions handed out and closed so far
    pub fn session_counts(&self) -> (usize, usize) {
        (
            self.opened.load(Ordering::SeqCst),
            self.closed.load(Ordering::SeqCst),
        )
    }

    fn digest(&self, data: &[u8]) -> String {
        // Hashing an in-memory slice cannot fail.
        self.algorithm
            .digest_reader(data)
            .map(|(_, digest)| digest)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for Arc<MemoryStore> {
    async fn connect(&self) -> Result<Arc<dyn Session>, StoreError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(self) as Arc<dyn Session>)
    }
}

#[async_trait]
impl Session for MemoryStore {
    async fn get_collection(&self, path: &str) -> Result<Collection, StoreError> {
        let state = self.state.lock().await;
        if state.collections.contains(path) {
            Ok(Collection::from_path(path))
        } else {
            Err(StoreError::CollectionNotFound(path.to_string()))
        }
    }

    async fn list_subcollections(&self, path: &str) -> Result<Vec<Collection>, StoreError> {
        let state = self.state.lock().await;
        if !state.collections.contains(path) {
            return Err(StoreError::CollectionNotFound(path.to_string()));
        }
        Ok(state
            .collections
            .iter()
            .filter(|c| parent_of(c) == path)
            .map(|c| Collection::from_path(c.as_str()))
            .collect())
    }

    async fn metadata_get_all(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Vec<MetadataRecord>, StoreError> {
        let state = self.state.lock().await;
        if !state.collections.contains(collection) {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }
        Ok(state
            .metadata
            .get(collection)
            .map(|records| records.iter().filter(|r| r.key == key).cloned().collect())
            .unwrap_or_default())
    }

    async fn metadata_add(
        &self,
        collection: &str,
        record: &MetadataRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.collections.contains(collection) {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }
        let records = state.metadata.entry(collection.to_string()).or_default();
        if !records.contains(record) {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn metadata_remove(
        &self,
        collection: &str,
        record: &MetadataRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(records) = state.metadata.get_mut(collection) {
            records.retain(|r| r != record);
        }
        Ok(())
    }

    async fn put_object(&self, local: &Path, remote: &str) -> Result<(), StoreError> {
        let data = tokio::fs::read(local).await?;
        let mut state = self.state.lock().await;
        let parent = parent_of(remote);
        if !state.collections.contains(parent) {
            return Err(StoreError::CollectionNotFound(parent.to_string()));
        }
        state.objects.insert(
            remote.to_string(),
            StoredObject {
                data,
                checksum: None,
            },
        );
        Ok(())
    }

    async fn checksum_object(&self, remote: &str) -> Result<String, StoreError> {
        let mut state = self.state.lock().await;
        let object = state
            .objects
            .get_mut(remote)
            .ok_or_else(|| StoreError::Parse(format!("no such object: {}", remote)))?;
        let (_, checksum) = self.algorithm.digest_reader(&object.data[..])?;
        object.checksum = Some(checksum.clone());
        Ok(checksum)
    }

    async fn query_objects(&self, scope: &CatalogScope) -> Result<Vec<CatalogObject>, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected query failure".to_string()));
        }
        let state = self.state.lock().await;
        let selected = state.objects.iter().filter(|(path, _)| {
            let parent = parent_of(path);
            match scope {
                CatalogScope::Exact {
                    collection,
                    exclude_names,
                } => {
                    let name = path.rsplit('/').next().unwrap_or_default();
                    parent == collection && !exclude_names.iter().any(|n| n == name)
                }
                CatalogScope::Prefix { collection } => {
                    parent.starts_with(&format!("{}/", collection))
                }
            }
        });
        Ok(selected
            .map(|(path, object)| CatalogObject {
                size: object.data.len() as u64,
                checksum: object.checksum.clone().unwrap_or_default(),
                path: path.clone(),
            })
            .collect())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = "/zone/home/ingest/Run1";

    #[tokio::test]
    async fn exact_and_prefix_scopes_partition_objects() {
        let store = MemoryStore::new();
        store.insert_object(&format!("{RUN}/a.txt"), b"a").await;
        store.insert_object(&format!("{RUN}/_MANIFEST_LOCAL.txt"), b"m").await;
        store.insert_object(&format!("{RUN}/Data/b.txt"), b"bb").await;
        store.insert_object("/zone/home/ingest/Run10/c.txt", b"c").await;

        let exact = store
            .query_objects(&CatalogScope::Exact {
                collection: RUN.to_string(),
                exclude_names: vec!["_MANIFEST_LOCAL.txt".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].path, format!("{RUN}/a.txt"));

        let prefix = store
            .query_objects(&CatalogScope::Prefix {
                collection: RUN.to_string(),
            })
            .await
            .unwrap();
        assert_eq!(prefix.len(), 1);
        assert_eq!(prefix[0].size, 2);
    }

    #[tokio::test]
    async fn put_object_has_no_checksum_until_requested() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("file");
        std::fs::write(&local, b"hello").unwrap();

        let store = MemoryStore::new();
        store.create_collection(RUN).await;
        let remote = format!("{RUN}/file");
        store.put_object(&local, &remote).await.unwrap();
        assert_eq!(store.recorded_checksum(&remote).await, None);

        let checksum = store.checksum_object(&remote).await.unwrap();
        assert_eq!(checksum, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(store.recorded_checksum(&remote).await, Some(checksum));
    }

    #[tokio::test]
    async fn subcollections_are_direct_children_only() {
        let store = MemoryStore::new();
        store.create_collection(&format!("{RUN}/Data/Deep")).await;
        store.create_collection("/zone/home/ingest/Run2").await;

        let names: Vec<_> = store
            .list_subcollections("/zone/home/ingest")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Run1", "Run2"]);
    }
}
