// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable serialization of per-volume metadata records.

use std::fs;
use std::io;
use std::path::Path;

use cmv_core::{VolumeId, VolumeRecord};
use thiserror::Error;
use tracing::warn;

use crate::layout::FilesystemLayout;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata for volume {0} not found")]
    NotFound(VolumeId),
    #[error("metadata for volume {0} is corrupt: {1}")]
    Corrupt(VolumeId, #[source] serde_json::Error),
    #[error("metadata io error: {0}")]
    Io(#[from] io::Error),
}

/// Loads, saves, and deletes the JSON-encoded sidecar file that
/// accompanies every volume's payload.
///
/// Encoding is plain `serde_json` with named fields — self-describing and
/// human-inspectable, the same choice `crates/storage/src/wal.rs` makes
/// for its own snapshot format. A decode error is reported as
/// [`MetadataError::Corrupt`] and callers are expected to treat it the
/// same as a missing sidecar.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: FilesystemLayout,
}

impl MetadataStore {
    pub fn new(layout: FilesystemLayout) -> Self {
        Self { layout }
    }

    pub fn load(&self, id: &VolumeId) -> Result<VolumeRecord, MetadataError> {
        let path = self.layout.metadata_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MetadataError::NotFound(id.clone()))
            }
            Err(e) => return Err(MetadataError::Io(e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| MetadataError::Corrupt(id.clone(), e))
    }

    /// Whole-record replace-on-write: write the new content to a temp file
    /// in the same directory, then rename over the sidecar. Not
    /// crash-atomic at the byte level, but bounds the damage of a crash
    /// mid-write to the temp file rather than a half-written sidecar.
    pub fn save(&self, id: &VolumeId, record: &VolumeRecord) -> Result<(), MetadataError> {
        let path = self.layout.metadata_path(id);
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| MetadataError::Corrupt(id.clone(), e))?;
        write_then_rename(&path, &bytes).map_err(MetadataError::Io)
    }

    /// Idempotent: deleting an already-absent sidecar is not an error.
    pub fn delete(&self, id: &VolumeId) -> Result<(), MetadataError> {
        let path = self.layout.metadata_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MetadataError::Io(e)),
        }
    }

    /// Every volume ID with a sidecar present on disk, for startup
    /// reconciliation.
    pub fn list_ids(&self) -> io::Result<Vec<VolumeId>> {
        read_entry_names(&self.layout.metadata_dir())
    }
}

/// Every volume ID with a payload present on disk, for startup
/// reconciliation.
pub fn list_payload_ids(layout: &FilesystemLayout) -> io::Result<Vec<VolumeId>> {
    read_entry_names(&layout.volumes_dir())
}

fn read_entry_names(dir: &Path) -> io::Result<Vec<VolumeId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            ids.push(VolumeId::new(name));
        } else {
            warn!(dir = %dir.display(), "skipping non-UTF-8 entry name");
        }
    }
    Ok(ids)
}

pub(crate) fn write_then_rename(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
