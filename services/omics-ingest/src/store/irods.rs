// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! iRODS access through the icommands
//!
//! Each operation runs one of `iquest`, `imeta`, `iput` or `ichksum` as a
//! child process, using the iRODS environment of the calling user. No
//! timeout is applied; a hung command has to be bounded externally.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;

use omics_ingest_types::MetadataRecord;

use super::{CatalogObject, CatalogScope, Collection, Connector, Session};
use crate::error::StoreError;
use crate::manifest::local::to_hex;

/// Marker printed by `iquest` when a query matches nothing
const NO_ROWS: &str = "CAT_NO_ROWS_FOUND";

/// Prefixes of catalog checksums stored as base64 rather than hex
const BASE64_CHECKSUM_PREFIXES: [&str; 2] = ["sha2:", "sha1:"];

/// Opens icommands sessions
#[derive(Clone, Debug, Default)]
pub struct IcommandsConnector {
    /// Directory holding the icommands, `$PATH` lookup when unset
    pub bin_dir: Option<PathBuf>,
}

impl IcommandsConnector {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }
}

#[async_trait]
impl Connector for IcommandsConnector {
    async fn connect(&self) -> Result<Arc<dyn Session>, StoreError> {
        let session = IcommandsSession {
            bin_dir: self.bin_dir.clone(),
        };
        // Fails early when there is no usable iRODS environment.
        session
            .run("ipwd", &[])
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Arc::new(session))
    }
}

/// Remote store session backed by the icommands
#[derive(Debug)]
pub struct IcommandsSession {
    bin_dir: Option<PathBuf>,
}

impl IcommandsSession {
    fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, StoreError> {
        tracing::debug!(program, ?args, "Running icommand");
        let output = Command::new(self.program(program))
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if program == "iquest" && (stdout.contains(NO_ROWS) || stderr.contains(NO_ROWS)) {
            return Ok(String::new());
        }
        Err(StoreError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    async fn iquest(&self, format: &str, query: &str) -> Result<Vec<String>, StoreError> {
        let stdout = self.run("iquest", &["--no-page", format, query]).await?;
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.contains(NO_ROWS))
            .map(|l| l.to_string())
            .collect())
    }
}

/// Quote a value for use inside a GenQuery string literal
fn quoted(value: &str) -> Result<String, StoreError> {
    if value.contains('\'') {
        return Err(StoreError::Parse(format!(
            "quote character in query value: {}",
            value
        )));
    }
    Ok(format!("'{}'", value))
}

fn object_query(scope: &CatalogScope) -> Result<String, StoreError> {
    let select = "SELECT DATA_SIZE, DATA_CHECKSUM, COLL_NAME, DATA_NAME WHERE";
    match scope {
        CatalogScope::Exact {
            collection,
            exclude_names,
        } => {
            let mut query = format!("{} COLL_NAME = {}", select, quoted(collection)?);
            for name in exclude_names {
                query.push_str(&format!(" AND DATA_NAME != {}", quoted(name)?));
            }
            Ok(query)
        }
        CatalogScope::Prefix { collection } => Ok(format!(
            "{} COLL_NAME like {}",
            select,
            quoted(&format!("{}/%", collection))?
        )),
    }
}

fn parse_object_line(line: &str) -> Result<CatalogObject, StoreError> {
    let mut parts = line.splitn(3, ',');
    let (Some(size), Some(checksum), Some(path)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(StoreError::Parse(line.to_string()));
    };
    Ok(CatalogObject {
        size: size
            .trim()
            .parse()
            .map_err(|_| StoreError::Parse(line.to_string()))?,
        checksum: normalize_checksum(checksum),
        path: path.to_string(),
    })
}

/// Catalog checksum in the lowercase hex form used by local manifests
///
/// MD5 sums are stored as hex already. SHA sums are stored as `sha2:` or
/// `sha1:` followed by base64; a value that fails to decode is kept as is
/// and shows up as a mismatch.
fn normalize_checksum(raw: &str) -> String {
    let raw = raw.trim();
    BASE64_CHECKSUM_PREFIXES
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix))
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .map(|bytes| to_hex(&bytes))
        .unwrap_or_else(|| raw.to_string())
}

/// Reduce the one-row-per-replica catalog output to distinct records
///
/// Identical rows are merged. A replica without a checksum is dropped when
/// another replica of the same path and size has one; replicas that still
/// differ are kept and surface as conflicts.
fn collapse_replicas(mut objects: Vec<CatalogObject>) -> Vec<CatalogObject> {
    objects.sort_by(|a, b| {
        a.path
            .cmp(&b.path)
            .then(a.size.cmp(&b.size))
            .then(a.checksum.cmp(&b.checksum))
    });
    objects.dedup();
    let checksummed: HashSet<(String, u64)> = objects
        .iter()
        .filter(|o| !o.checksum.is_empty())
        .map(|o| (o.path.clone(), o.size))
        .collect();
    objects.retain(|o| {
        !o.checksum.is_empty() || !checksummed.contains(&(o.path.clone(), o.size))
    });
    objects
}

fn parse_metadata_line(line: &str) -> Result<MetadataRecord, StoreError> {
    let mut parts = line.splitn(3, '\t');
    let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
        return Err(StoreError::Parse(line.to_string()));
    };
    Ok(MetadataRecord {
        key: key.to_string(),
        value: value.to_string(),
        unit: parts.next().unwrap_or_default().to_string(),
    })
}

fn imeta_args<'a>(verb: &'a str, collection: &'a str, record: &'a MetadataRecord) -> Vec<&'a str> {
    let mut args = vec![
        verb,
        "-C",
        collection,
        record.key.as_str(),
        record.value.as_str(),
    ];
    if !record.unit.is_empty() {
        args.push(record.unit.as_str());
    }
    args
}

#[async_trait]
impl Session for IcommandsSession {
    async fn get_collection(&self, path: &str) -> Result<Collection, StoreError> {
        let rows = self
            .iquest(
                "%s",
                &format!("SELECT COLL_NAME WHERE COLL_NAME = {}", quoted(path)?),
            )
            .await?;
        match rows.first() {
            Some(found) => Ok(Collection::from_path(found.trim())),
            None => Err(StoreError::CollectionNotFound(path.to_string())),
        }
    }

    async fn list_subcollections(&self, path: &str) -> Result<Vec<Collection>, StoreError> {
        let rows = self
            .iquest(
                "%s",
                &format!("SELECT COLL_NAME WHERE COLL_PARENT_NAME = {}", quoted(path)?),
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Collection::from_path(r.trim()))
            .collect())
    }

    async fn metadata_get_all(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Vec<MetadataRecord>, StoreError> {
        let query = format!(
            "SELECT META_COLL_ATTR_NAME, META_COLL_ATTR_VALUE, META_COLL_ATTR_UNITS \
             WHERE COLL_NAME = {} AND META_COLL_ATTR_NAME = {}",
            quoted(collection)?,
            quoted(key)?
        );
        self.iquest("%s\t%s\t%s", &query)
            .await?
            .iter()
            .map(|l| parse_metadata_line(l))
            .collect()
    }

    async fn metadata_add(
        &self,
        collection: &str,
        record: &MetadataRecord,
    ) -> Result<(), StoreError> {
        self.run("imeta", &imeta_args("add", collection, record))
            .await
            .map(|_| ())
    }

    async fn metadata_remove(
        &self,
        collection: &str,
        record: &MetadataRecord,
    ) -> Result<(), StoreError> {
        self.run("imeta", &imeta_args("rm", collection, record))
            .await
            .map(|_| ())
    }

    async fn put_object(&self, local: &Path, remote: &str) -> Result<(), StoreError> {
        let local = local.to_string_lossy().into_owned();
        self.run("iput", &["-f", local.as_str(), remote])
            .await
            .map(|_| ())
    }

    async fn checksum_object(&self, remote: &str) -> Result<String, StoreError> {
        let stdout = self.run("ichksum", &[remote]).await?;
        // Output looks like "    _MANIFEST_LOCAL.txt    <checksum>"
        stdout
            .lines()
            .filter_map(|l| l.split_whitespace().last())
            .next()
            .map(normalize_checksum)
            .ok_or_else(|| StoreError::Parse(stdout.clone()))
    }

    async fn query_objects(&self, scope: &CatalogScope) -> Result<Vec<CatalogObject>, StoreError> {
        let objects = self
            .iquest("%d,%s,%s/%s", &object_query(scope)?)
            .await?
            .iter()
            .map(|l| parse_object_line(l))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(collapse_replicas(objects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_query_excludes_manifest_names() {
        let query = object_query(&CatalogScope::Exact {
            collection: "/zone/home/ingest/Run1".to_string(),
            exclude_names: vec!["_MANIFEST_LOCAL.txt".to_string(), "_MANIFEST_IRODS.txt".to_string()],
        })
        .unwrap();
        assert_eq!(
            query,
            "SELECT DATA_SIZE, DATA_CHECKSUM, COLL_NAME, DATA_NAME WHERE \
             COLL_NAME = '/zone/home/ingest/Run1' AND DATA_NAME != '_MANIFEST_LOCAL.txt' \
             AND DATA_NAME != '_MANIFEST_IRODS.txt'"
        );
    }

    #[test]
    fn prefix_query_matches_subcollections() {
        let query = object_query(&CatalogScope::Prefix {
            collection: "/zone/home/ingest/Run1".to_string(),
        })
        .unwrap();
        assert!(query.ends_with("COLL_NAME like '/zone/home/ingest/Run1/%'"));
    }

    #[test]
    fn quotes_in_values_are_rejected() {
        assert!(quoted("/zone/it's").is_err());
    }

    #[test]
    fn object_lines_parse() {
        let obj = parse_object_line("42,0cc175b9c0f1b6a831c399e269772661,/zone/run/a,b").unwrap();
        assert_eq!(obj.size, 42);
        assert_eq!(obj.path, "/zone/run/a,b");
        assert!(parse_object_line("x,y,z").is_err());
        assert!(parse_object_line("12").is_err());
    }

    #[test]
    fn sha_checksums_are_decoded_to_hex() {
        let obj = parse_object_line(
            "5,sha2:LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=,/zone/run/hello.txt",
        )
        .unwrap();
        assert_eq!(
            obj.checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            normalize_checksum("sha1:qvTGHdzF6KLavt4PO0gs2a6pQ00="),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(
            normalize_checksum(" 5d41402abc4b2a76b9719d911017c592 "),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(normalize_checksum("sha2:not base64!"), "sha2:not base64!");
    }

    fn object(path: &str, size: u64, checksum: &str) -> CatalogObject {
        CatalogObject {
            path: path.to_string(),
            size,
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn replicas_without_checksum_collapse_into_checksummed_ones() {
        let collapsed = collapse_replicas(vec![
            object("/zone/run/a", 1, "aa"),
            object("/zone/run/a", 1, ""),
            object("/zone/run/a", 1, "aa"),
            object("/zone/run/b", 2, ""),
            object("/zone/run/c", 3, ""),
            object("/zone/run/c", 4, "cc"),
        ]);
        assert_eq!(
            collapsed,
            vec![
                object("/zone/run/a", 1, "aa"),
                object("/zone/run/b", 2, ""),
                object("/zone/run/c", 3, ""),
                object("/zone/run/c", 4, "cc"),
            ]
        );
    }

    #[test]
    fn metadata_lines_parse_with_empty_unit() {
        let record = parse_metadata_line("omics::ingest::status\tcomplete\t").unwrap();
        assert_eq!(record, MetadataRecord::new("omics::ingest::status", "complete"));
    }

    #[test]
    fn imeta_args_omit_empty_unit() {
        let record = MetadataRecord::new("k", "v");
        assert_eq!(imeta_args("add", "/c", &record), vec!["add", "-C", "/c", "k", "v"]);
    }
}
