// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Manifests of run folder contents
//!
//! A manifest is a text file with one `<size>,<checksum>,<path>` line per
//! file. Lines starting with `#` or `%` are comments. The same format is
//! used for the manifest computed from the source side ([`local`]) and the
//! one pulled from the remote catalog ([`remote`]).

pub mod local;
pub mod remote;

use std::fmt;
use std::io;
use std::path::Path;

use omics_ingest_types::ManifestSide;

pub use local::{HashAlgorithm, LocalManifestBuilder};
pub use remote::RemoteManifestFetcher;

/// One file in a manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.size, self.checksum, self.path)
    }
}

/// A parsed manifest tagged with the side it describes
#[derive(Clone, Debug)]
pub struct Manifest {
    pub side: ManifestSide,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(side: ManifestSide, entries: Vec<ManifestEntry>) -> Self {
        Self { side, entries }
    }

    /// Parse manifest text, skipping comments and blank lines
    pub fn parse(side: ManifestSide, text: &str) -> Result<Self, ManifestParseError> {
        let mut entries = Vec::new();
        // Only the line terminator is stripped; file names may end in spaces.
        for (idx, line) in text.lines().enumerate() {
            if is_comment(line) || line.trim().is_empty() {
                continue;
            }
            entries.push(parse_line(line).ok_or_else(|| ManifestParseError {
                line_number: idx + 1,
                line: line.to_string(),
            })?);
        }
        Ok(Self { side, entries })
    }

    /// Read and parse a manifest file
    pub async fn read(side: ManifestSide, path: &Path) -> io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(side, &text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Render the manifest, preceded by the given comment lines
    pub fn render(&self, header: &[String]) -> String {
        let mut out = String::new();
        for line in header {
            out.push_str(line);
            out.push('\n');
        }
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }
}

/// A manifest line that is neither a comment nor a valid entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestParseError {
    pub line_number: usize,
    pub line: String,
}

impl fmt::Display for ManifestParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed manifest line {}: {:?}",
            self.line_number, self.line
        )
    }
}

impl std::error::Error for ManifestParseError {}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('%')
}

// The path is the last column and may itself contain commas.
fn parse_line(line: &str) -> Option<ManifestEntry> {
    let mut parts = line.splitn(3, ',');
    let size = parts.next()?.trim().parse().ok()?;
    let checksum = parts.next()?.trim().to_string();
    let path = parts.next()?.to_string();
    if path.is_empty() {
        return None;
    }
    Some(ManifestEntry {
        path,
        size,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let text = "%%%% size,md5,filename\n\
                    ## Invoked from: /data\n\
                    \n\
                    10,abc,./a.txt\n\
                    5,def,./sub/b.txt\n";
        let manifest = Manifest::parse(ManifestSide::Local, text).unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[1].path, "./sub/b.txt");
        assert_eq!(manifest.entries[1].size, 5);
        assert_eq!(manifest.entries[1].checksum, "def");
    }

    #[test]
    fn parse_keeps_commas_in_paths() {
        let manifest = Manifest::parse(ManifestSide::Remote, "3,ff,/zone/run/a,b.txt").unwrap();
        assert_eq!(manifest.entries[0].path, "/zone/run/a,b.txt");
    }

    #[test]
    fn parse_reports_line_number_of_bad_entry() {
        let err = Manifest::parse(ManifestSide::Local, "# c\n1,aa,./x\nnot-a-size,aa,./y\n")
            .unwrap_err();
        assert_eq!(err.line_number, 3);
    }

    #[test]
    fn parse_keeps_surrounding_whitespace_in_paths() {
        let manifest =
            Manifest::parse(ManifestSide::Local, "1, 0cc175b9 ,./a \r\n2,ff,./ b\n").unwrap();
        assert_eq!(manifest.entries[0].path, "./a ");
        assert_eq!(manifest.entries[0].checksum, "0cc175b9");
        assert_eq!(manifest.entries[1].path, "./ b");
    }

    #[tokio::test]
    async fn read_rejects_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_MANIFEST_IRODS.txt");
        std::fs::write(&path, "1,aa,/zone/run/a\ngarbage\n").unwrap();

        let err = Manifest::read(ManifestSide::Remote, &path).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn render_then_parse_reconstructs_entries() {
        let manifest = Manifest::new(
            ManifestSide::Local,
            vec![
                ManifestEntry {
                    path: "./a".to_string(),
                    size: 1,
                    checksum: "0cc175b9c0f1b6a831c399e269772661".to_string(),
                },
                ManifestEntry {
                    path: "./d/b".to_string(),
                    size: 0,
                    checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                },
            ],
        );
        let text = manifest.render(&["%%%% size,md5,filename".to_string()]);
        let parsed = Manifest::parse(ManifestSide::Local, &text).unwrap();
        assert_eq!(parsed.entries, manifest.entries);
    }
}
