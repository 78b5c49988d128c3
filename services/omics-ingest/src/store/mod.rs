// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Remote store access
//!
//! The engine talks to the remote store through a [`Session`] obtained from
//! a [`Connector`]. A session is acquired once per pass or hook invocation
//! and closed on every exit path.
//!
//! - [`irods`] - iRODS icommands driven as child processes
//! - [`memory`] - in-process store for tests and dry runs

pub mod irods;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use omics_ingest_types::MetadataRecord;

use crate::error::StoreError;

pub use irods::IcommandsConnector;
pub use memory::MemoryStore;

/// A remote collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collection {
    /// Absolute collection path
    pub path: String,
    /// Last path component
    pub name: String,
}

impl Collection {
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self { path, name }
    }
}

/// Which objects a catalog query covers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogScope {
    /// Objects directly inside `collection`, minus the excluded names
    Exact {
        collection: String,
        exclude_names: Vec<String>,
    },
    /// Objects inside any subcollection of `collection`
    Prefix { collection: String },
}

/// One replicated object as recorded by the catalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogObject {
    pub size: u64,
    /// Empty when the catalog holds no checksum for the object
    pub checksum: String,
    /// Absolute object path
    pub path: String,
}

/// Operations the engine needs from the remote store
#[async_trait]
pub trait Session: Send + Sync {
    /// Look up a collection by absolute path
    async fn get_collection(&self, path: &str) -> Result<Collection, StoreError>;

    /// Direct subcollections of a collection
    async fn list_subcollections(&self, path: &str) -> Result<Vec<Collection>, StoreError>;

    /// All metadata records stored under `key`
    async fn metadata_get_all(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Vec<MetadataRecord>, StoreError>;

    async fn metadata_add(
        &self,
        collection: &str,
        record: &MetadataRecord,
    ) -> Result<(), StoreError>;

    async fn metadata_remove(
        &self,
        collection: &str,
        record: &MetadataRecord,
    ) -> Result<(), StoreError>;

    /// Upload a local file, replacing an existing object
    async fn put_object(&self, local: &Path, remote: &str) -> Result<(), StoreError>;

    /// Have the store compute and register the object's checksum
    async fn checksum_object(&self, remote: &str) -> Result<String, StoreError>;

    /// Size, checksum and path of the objects covered by `scope`
    async fn query_objects(&self, scope: &CatalogScope) -> Result<Vec<CatalogObject>, StoreError>;

    /// Release the session
    async fn close(&self) {}
}

/// Opens remote store sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Session>, StoreError>;
}

/// Join a collection path and a child name
pub fn join_path(collection: &str, name: &str) -> String {
    format!("{}/{}", collection.trim_end_matches('/'), name)
}
