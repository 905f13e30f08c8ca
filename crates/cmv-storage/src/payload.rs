// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialize a bundle snapshot onto the local filesystem, and read it
//! back for push-back.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use cmv_core::{Bundle, VolumeRecord, DIR_MODE, FILE_MODE};
use thiserror::Error;
use tracing::info;

use crate::layout::FilesystemLayout;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("subPath {0:?} not found in bundle")]
    NotFound(String),
    #[error("payload io error: {0}")]
    Aborted(#[from] io::Error),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Write the local payload for `metadata` from `bundle` onto disk.
///
/// Returns the payload path and whether the write actually happened.
/// *If the bundle's version equals the sidecar's `remote_version`, this is
/// a no-op* — the fixpoint that breaks the remote→local→remote echo loop.
/// On success, bumps `metadata.remote_version` in place; callers are
/// expected to persist the updated sidecar.
pub fn update_payload(
    layout: &FilesystemLayout,
    metadata: &mut VolumeRecord,
    bundle: &Bundle,
) -> Result<(PathBuf, bool), PayloadError> {
    let path = layout.volume_path(&metadata.volume_id);

    if metadata.remote_version.as_ref() == Some(&bundle.version) {
        info!(volume_id = %metadata.volume_id, version = %bundle.version, "payload already at this version, skipping write");
        return Ok((path, false));
    }

    match &metadata.options.sub_path {
        Some(sub_path) => {
            let content = bundle
                .get_merged(sub_path)
                .ok_or_else(|| PayloadError::NotFound(sub_path.clone()))?;
            write_file_atomic(&path, &content, FILE_MODE)?;
        }
        None => {
            mkdir_mode(&path, DIR_MODE)?;
            for (name, content) in bundle.merged() {
                write_file_atomic(&path.join(name), &content, FILE_MODE)?;
            }
        }
    }

    metadata.remote_version = Some(bundle.version.clone());
    info!(volume_id = %metadata.volume_id, version = %bundle.version, path = %path.display(), "payload updated");
    Ok((path, true))
}

/// Read the local payload back into an in-memory map for push-back. An
/// empty directory, or a missing payload, yields `None` — callers treat
/// that as "nothing to push".
pub fn read_payload(
    layout: &FilesystemLayout,
    metadata: &VolumeRecord,
) -> Result<Option<BTreeMap<String, Vec<u8>>>, PayloadError> {
    let path = layout.volume_path(&metadata.volume_id);

    match &metadata.options.sub_path {
        Some(sub_path) => {
            let meta = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(PayloadError::Aborted(e)),
            };
            if meta.is_dir() {
                return Err(PayloadError::InvariantViolation(format!(
                    "volume {} is file-mode but payload at {} is a directory",
                    metadata.volume_id,
                    path.display()
                )));
            }
            let content = fs::read(&path)?;
            let mut map = BTreeMap::new();
            map.insert(sub_path.clone(), content);
            Ok(Some(map))
        }
        None => {
            let entries = match fs::read_dir(&path) {
                Ok(e) => e,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(PayloadError::Aborted(e)),
            };
            let mut map = BTreeMap::new();
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    map.insert(name.to_string(), fs::read(entry.path())?);
                }
            }
            Ok(if map.is_empty() { None } else { Some(map) })
        }
    }
}

/// Delete a volume's payload, file or directory, idempotently.
pub fn delete_payload(layout: &FilesystemLayout, id: &cmv_core::VolumeId) -> io::Result<()> {
    let path = layout.volume_path(id);
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
        Ok(_) => fs::remove_file(&path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn mkdir_mode(path: &Path, mode: u32) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    std::fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

fn write_file_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut f: File = OpenOptions::new().write(true).create(true).truncate(true).mode(mode).open(&tmp)?;
        f.write_all(content)?;
    }
    fs::rename(&tmp, path)
}
