// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Ingest state kept as metadata on the destination collection
//!
//! The remote metadata store has no locking, so every read-modify-write
//! here is non-atomic. The engine assumes a single writer per collection;
//! readers tolerate the duplicates concurrent writers can leave behind.

use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use tracing::{debug, warn};

use omics_ingest_types::{
    IngestStatus, KEY_FIRST_SEEN, KEY_LAST_UPDATE, KEY_STATUS, MetadataRecord,
};

use crate::error::IngestError;
use crate::store::Session;

/// Render a timestamp the way it is stored in metadata
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
///
/// Accepts RFC 3339 as well as offset-less ISO 8601 values, which are
/// interpreted in the local time zone.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

/// Reads and writes the ingest metadata of one collection
pub struct MetadataTracker<'a> {
    session: &'a dyn Session,
    collection: &'a str,
}

impl<'a> MetadataTracker<'a> {
    pub fn new(session: &'a dyn Session, collection: &'a str) -> Self {
        Self {
            session,
            collection,
        }
    }

    async fn get_all(&self, key: &str) -> Result<Vec<MetadataRecord>, IngestError> {
        self.session
            .metadata_get_all(self.collection, key)
            .await
            .map_err(IngestError::Metadata)
    }

    async fn replace(&self, record: MetadataRecord) -> Result<(), IngestError> {
        for old in self.get_all(&record.key).await? {
            self.session
                .metadata_remove(self.collection, &old)
                .await
                .map_err(IngestError::Metadata)?;
        }
        self.session
            .metadata_add(self.collection, &record)
            .await
            .map_err(IngestError::Metadata)
    }

    /// Set `first_seen` unless any value is present already
    ///
    /// Returns whether a value was written.
    pub async fn record_first_seen(&self, now: DateTime<Utc>) -> Result<bool, IngestError> {
        if !self.get_all(KEY_FIRST_SEEN).await?.is_empty() {
            return Ok(false);
        }
        self.session
            .metadata_add(
                self.collection,
                &MetadataRecord::new(KEY_FIRST_SEEN, format_timestamp(now)),
            )
            .await
            .map_err(IngestError::Metadata)?;
        debug!(collection = %self.collection, "Recorded first_seen");
        Ok(true)
    }

    /// Replace all `last_update` values with `now`
    pub async fn record_last_update(&self, now: DateTime<Utc>) -> Result<(), IngestError> {
        self.replace(MetadataRecord::new(KEY_LAST_UPDATE, format_timestamp(now)))
            .await
    }

    /// Overwrite `status` unconditionally
    pub async fn record_status(&self, status: IngestStatus) -> Result<(), IngestError> {
        self.replace(MetadataRecord::new(KEY_STATUS, status.to_string()))
            .await
    }

    /// Overwrite `status` unless that would move it backwards
    ///
    /// Returns whether the status was written.
    pub async fn advance_status(&self, status: IngestStatus) -> Result<bool, IngestError> {
        if let Some(current) = self.status().await?
            && !current.can_advance_to(status)
        {
            debug!(
                collection = %self.collection,
                current = %current,
                requested = %status,
                "Not regressing ingest status"
            );
            return Ok(false);
        }
        self.record_status(status).await?;
        Ok(true)
    }

    /// Current status, the greatest one when several values are stored
    pub async fn status(&self) -> Result<Option<IngestStatus>, IngestError> {
        Ok(self
            .get_all(KEY_STATUS)
            .await?
            .iter()
            .filter_map(|r| match IngestStatus::from_str(&r.value) {
                Ok(status) => Some(status),
                Err(_) => {
                    warn!(collection = %self.collection, value = %r.value, "Unknown ingest status");
                    None
                }
            })
            .max())
    }

    /// All parseable `last_update` values
    pub async fn last_updates(&self) -> Result<Vec<DateTime<Utc>>, IngestError> {
        Ok(self
            .get_all(KEY_LAST_UPDATE)
            .await?
            .iter()
            .filter_map(|r| {
                let parsed = parse_timestamp(&r.value);
                if parsed.is_none() {
                    warn!(
                        collection = %self.collection,
                        value = %r.value,
                        "Ignoring unparseable last_update value"
                    );
                }
                parsed
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    const COLL: &str = "/zone/home/ingest/Run1";

    async fn store() -> std::sync::Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.create_collection(COLL).await;
        store
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn naive_iso_timestamps_are_accepted() {
        assert!(parse_timestamp("2024-03-01T10:11:12.123456").is_some());
        assert!(parse_timestamp("2024-03-01T10:11:12").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn first_seen_is_written_once() {
        let store = store().await;
        let tracker = MetadataTracker::new(&*store, COLL);
        let t0 = Utc::now();

        assert!(tracker.record_first_seen(t0).await.unwrap());
        assert!(!tracker.record_first_seen(t0 + Duration::hours(1)).await.unwrap());

        let values = store.metadata(COLL).await;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, format_timestamp(t0));
    }

    #[tokio::test]
    async fn last_update_replaces_all_values() {
        let store = store().await;
        let t0 = Utc::now() - Duration::hours(2);
        // Two writers raced and both values were kept.
        for at in [t0, t0 + Duration::minutes(5)] {
            store
                .metadata_add(COLL, &MetadataRecord::new(KEY_LAST_UPDATE, format_timestamp(at)))
                .await
                .unwrap();
        }
        let tracker = MetadataTracker::new(&*store, COLL);
        assert_eq!(tracker.last_updates().await.unwrap().len(), 2);

        let now = Utc::now();
        tracker.record_last_update(now).await.unwrap();
        let values = tracker.last_updates().await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].timestamp_micros(), now.timestamp_micros());
    }

    #[tokio::test]
    async fn status_does_not_regress_through_advance() {
        let store = store().await;
        let tracker = MetadataTracker::new(&*store, COLL);

        assert_eq!(tracker.status().await.unwrap(), None);
        assert!(tracker.advance_status(IngestStatus::Running).await.unwrap());
        assert!(tracker.advance_status(IngestStatus::Complete).await.unwrap());
        assert!(!tracker.advance_status(IngestStatus::Running).await.unwrap());
        assert_eq!(
            tracker.status().await.unwrap(),
            Some(IngestStatus::Complete)
        );
        assert_eq!(store.metadata(COLL).await.len(), 1);
    }

    #[tokio::test]
    async fn record_status_overwrites_unconditionally() {
        let store = store().await;
        let tracker = MetadataTracker::new(&*store, COLL);
        tracker.record_status(IngestStatus::Complete).await.unwrap();
        tracker.record_status(IngestStatus::Running).await.unwrap();
        assert_eq!(tracker.status().await.unwrap(), Some(IngestStatus::Running));
    }

    #[tokio::test]
    async fn missing_collection_is_a_metadata_error() {
        let store = MemoryStore::new();
        let tracker = MetadataTracker::new(&*store, COLL);
        let err = tracker.record_first_seen(Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), "metadata");
    }
}
