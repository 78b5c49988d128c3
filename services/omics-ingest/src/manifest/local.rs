// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Local manifest computation
//!
//! Walks a run folder and checksums every regular file with a bounded pool
//! of blocking workers. The result is written to [`MANIFEST_LOCAL`] inside
//! the run folder. A failed build never leaves a manifest file behind.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::Md5;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use omics_ingest_types::{MANIFEST_IRODS, MANIFEST_LOCAL, ManifestSide};

use super::{Manifest, ManifestEntry};
use crate::error::IngestError;
use crate::metrics;

/// Read buffer size used while hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Digest used for local checksums
///
/// Must match the checksum scheme configured on the remote catalog, otherwise
/// every file shows up as a mismatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 128-bit MD5, the catalog default
    #[default]
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Hash everything `reader` yields, returning the byte count and the
    /// lowercase hex digest
    pub fn digest_reader<R: Read>(self, reader: R) -> io::Result<(u64, String)> {
        match self {
            HashAlgorithm::Md5 => digest_with::<Md5, R>(reader),
            HashAlgorithm::Sha1 => digest_with::<Sha1, R>(reader),
            HashAlgorithm::Sha256 => digest_with::<Sha256, R>(reader),
        }
    }
}

fn digest_with<D: Digest, R: Read>(mut reader: R) -> io::Result<(u64, String)> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, to_hex(&hasher.finalize())))
}

/// Lowercase hex form of a digest
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Computes the source-side manifest of a run folder
#[derive(Clone, Debug)]
pub struct LocalManifestBuilder {
    workers: usize,
    algorithm: HashAlgorithm,
}

impl LocalManifestBuilder {
    pub fn new(workers: usize, algorithm: HashAlgorithm) -> Self {
        Self {
            workers: workers.max(1),
            algorithm,
        }
    }

    /// Compute the manifest of `folder` in memory, sorted by path
    pub async fn compute(&self, folder: &Path) -> io::Result<Manifest> {
        let root = folder.to_path_buf();
        let files = tokio::task::spawn_blocking(move || list_files(&root))
            .await
            .map_err(io::Error::other)??;

        tracing::debug!(
            run_folder = %folder.display(),
            file_count = files.len(),
            workers = self.workers,
            "Checksumming run folder"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<io::Result<ManifestEntry>> = JoinSet::new();
        let mut entries = Vec::with_capacity(files.len());

        for (key, path) in files {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(io::Error::other)?;
            let algorithm = self.algorithm;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let file = File::open(&path)?;
                let (size, checksum) = algorithm.digest_reader(file)?;
                metrics::record_bytes_hashed(size);
                Ok(ManifestEntry {
                    path: key,
                    size,
                    checksum,
                })
            });

            // Surface failures early instead of hashing the rest of the folder.
            while let Some(done) = tasks.try_join_next() {
                entries.push(done.map_err(io::Error::other)??);
            }
        }

        while let Some(done) = tasks.join_next().await {
            entries.push(done.map_err(io::Error::other)??);
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Manifest::new(ManifestSide::Local, entries))
    }

    /// Compute the manifest of `folder` and store it as [`MANIFEST_LOCAL`]
    ///
    /// A stale manifest from an earlier attempt is removed first. On failure
    /// the manifest file is removed again before returning.
    pub async fn build(&self, folder: &Path) -> Result<(PathBuf, Manifest), IngestError> {
        let manifest_path = folder.join(MANIFEST_LOCAL);
        remove_if_exists(&manifest_path).await;

        let result = async {
            let manifest = self.compute(folder).await?;
            let header = vec![
                format!("%%%% size,{},filename", self.algorithm),
                format!("## Invoked from: {}", folder.display()),
            ];
            tokio::fs::write(&manifest_path, manifest.render(&header)).await?;
            Ok::<_, io::Error>(manifest)
        }
        .await;

        match result {
            Ok(manifest) => Ok((manifest_path, manifest)),
            Err(source) => {
                remove_if_exists(&manifest_path).await;
                Err(IngestError::ChecksumBuild {
                    path: folder.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// List regular files below `root` as `(./relative/key, absolute path)`,
/// leaving out the two manifest files at the top of the run folder
fn list_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        if rel.parent() == Some(Path::new(""))
            && rel
                .to_str()
                .is_some_and(|name| name == MANIFEST_LOCAL || name == MANIFEST_IRODS)
        {
            continue;
        }
        let rel = rel.to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non UTF-8 file name: {}", entry.path().display()),
            )
        })?;
        files.push((format!("./{}", rel), entry.path().to_path_buf()));
    }
    Ok(files)
}

pub(crate) async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    const MD5_HELLO: &str = "5d41402abc4b2a76b9719d911017c592";
    const MD5_EMPTY: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn run_folder() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dir.path().join("Data/Intensities")).unwrap();
        std::fs::write(dir.path().join("Data/Intensities/empty.bin"), b"").unwrap();
        dir
    }

    #[test_case(HashAlgorithm::Md5, MD5_HELLO ; "md5")]
    #[test_case(HashAlgorithm::Sha1, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d" ; "sha1")]
    #[test_case(
        HashAlgorithm::Sha256,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824" ;
        "sha256"
    )]
    fn digests_are_lowercase_hex(algorithm: HashAlgorithm, expected: &str) {
        let (size, digest) = algorithm.digest_reader(&b"hello"[..]).unwrap();
        assert_eq!(size, 5);
        assert_eq!(digest, expected);
    }

    #[test]
    fn algorithm_names_parse_case_insensitively() {
        assert_eq!(HashAlgorithm::from_str("MD5").unwrap(), HashAlgorithm::Md5);
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
        assert!(HashAlgorithm::from_str("crc32").is_err());
    }

    #[tokio::test]
    async fn compute_lists_all_regular_files() {
        let dir = run_folder();
        let builder = LocalManifestBuilder::new(2, HashAlgorithm::Md5);
        let manifest = builder.compute(dir.path()).await.unwrap();

        let entries: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.size, e.checksum.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("./Data/Intensities/empty.bin", 0, MD5_EMPTY),
                ("./hello.txt", 5, MD5_HELLO),
            ]
        );
    }

    #[tokio::test]
    async fn compute_skips_top_level_manifests_only() {
        let dir = run_folder();
        std::fs::write(dir.path().join(MANIFEST_LOCAL), b"old").unwrap();
        std::fs::write(dir.path().join(MANIFEST_IRODS), b"old").unwrap();
        std::fs::write(dir.path().join("Data").join(MANIFEST_LOCAL), b"nested").unwrap();

        let builder = LocalManifestBuilder::new(8, HashAlgorithm::Md5);
        let manifest = builder.compute(dir.path()).await.unwrap();
        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "./Data/Intensities/empty.bin",
                "./Data/_MANIFEST_LOCAL.txt",
                "./hello.txt",
            ]
        );
    }

    #[tokio::test]
    async fn build_writes_manifest_that_parses_back() {
        let dir = run_folder();
        let builder = LocalManifestBuilder::new(8, HashAlgorithm::Md5);
        let (path, manifest) = builder.build(dir.path()).await.unwrap();

        assert_eq!(path, dir.path().join(MANIFEST_LOCAL));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("%%%% size,md5,filename\n"));

        let reparsed = Manifest::read(ManifestSide::Local, &path).await.unwrap();
        assert_eq!(reparsed.entries, manifest.entries);
    }

    #[tokio::test]
    async fn trailing_spaces_in_file_names_survive_a_reread() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a "), b"a").unwrap();
        std::fs::write(dir.path().join("b"), b"b").unwrap();

        let builder = LocalManifestBuilder::new(2, HashAlgorithm::Md5);
        let (path, manifest) = builder.build(dir.path()).await.unwrap();
        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["./a ", "./b"]);

        let reparsed = Manifest::read(ManifestSide::Local, &path).await.unwrap();
        assert_eq!(reparsed.entries, manifest.entries);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_build_removes_stale_manifest() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = run_folder();
        let stale = dir.path().join(MANIFEST_LOCAL);
        std::fs::write(&stale, b"1,partial,./hello.txt\n").unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"lane\xff.bcl")), b"x").unwrap();

        let builder = LocalManifestBuilder::new(2, HashAlgorithm::Md5);
        let err = builder.build(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), "checksum_build");
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn failed_build_leaves_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("Run404");
        let builder = LocalManifestBuilder::new(8, HashAlgorithm::Md5);

        let err = builder.build(&missing).await.unwrap_err();
        assert_eq!(err.kind(), "checksum_build");
        assert!(!missing.join(MANIFEST_LOCAL).exists());
    }
}
