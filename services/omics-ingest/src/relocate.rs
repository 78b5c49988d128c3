// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Moving finalized run folders out of the landing zone
//!
//! A finalized run folder `<parent>/<run>` is renamed to
//! `<parent>-INGESTED/<run>`, which removes it from future passes while
//! keeping it next to its original location.

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::IngestError;

/// Suffix appended to the parent directory of relocated run folders
pub const INGESTED_SUFFIX: &str = "-INGESTED";

/// Destination of the run folder at `path`
///
/// Returns `None` for paths without a named parent and file name.
pub fn ingested_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = path.parent()?;
    let parent_name = parent.file_name()?;

    let mut ingested = parent_name.to_os_string();
    ingested.push(INGESTED_SUFFIX);
    Some(parent.with_file_name(ingested).join(name))
}

/// Move a run folder into its ingested location
///
/// The ingested parent directory is created on demand. An existing target
/// is never overwritten.
pub async fn relocate(path: &Path) -> Result<PathBuf, IngestError> {
    let target = ingested_path(path).ok_or_else(|| IngestError::Relocation {
        from: path.to_path_buf(),
        to: PathBuf::new(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "run folder has no parent"),
    })?;
    let relocation_error = |source| IngestError::Relocation {
        from: path.to_path_buf(),
        to: target.clone(),
        source,
    };

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(relocation_error)?;
    }
    if tokio::fs::try_exists(&target)
        .await
        .map_err(relocation_error)?
    {
        return Err(relocation_error(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "target already exists",
        )));
    }
    tokio::fs::rename(path, &target)
        .await
        .map_err(relocation_error)?;

    info!(from = %path.display(), to = %target.display(), "Relocated run folder");
    Ok(target)
}
