// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Publish`/`Unpublish` surface the (out-of-scope) CSI RPC transport
//! calls into. Grounded on the original driver's
//! `nodeServer.NodePublishVolume`/`NodeUnpublishVolume` and
//! `Mounter.Mount`/`Unmount`: parse the publish context, delegate the
//! data-plane work to [`cmv_engine::VolumeEngine`], then bind-mount (or
//! unmount) the returned path onto the caller's target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cmv_core::VolumeId;
use cmv_engine::{EngineError, VolumeEngine};
use cmv_policy::parse_context;
use tracing::{info, warn};

use crate::mount::MountPrimitive;

pub struct NodePlugin {
    engine: Arc<VolumeEngine>,
    mounter: Box<dyn MountPrimitive>,
}

impl NodePlugin {
    pub fn new(engine: Arc<VolumeEngine>, mounter: Box<dyn MountPrimitive>) -> Self {
        Self { engine, mounter }
    }

    /// `Publish(volumeId, targetPath, context)`. `read_only` is the
    /// driver's `readOnly` hint, threaded to the mount primitive only.
    pub async fn publish(
        &self,
        volume_id: &str,
        target_path: &Path,
        context: &BTreeMap<String, String>,
        read_only: bool,
    ) -> Result<(), EngineError> {
        info!(%volume_id, target_path = %target_path.display(), "NodePublishVolume");

        let pod_namespace = context.get("csi.storage.k8s.io/pod.namespace").map(String::as_str).unwrap_or_default();
        let pod_name = context.get("csi.storage.k8s.io/pod.name").map(String::as_str).unwrap_or_default();
        let (identity, options) = parse_context(context, pod_namespace, pod_name)?;

        let not_mounted = self.mounter.is_not_mount_point(target_path).map_err(|e| {
            EngineError::FatalBug(format!("cannot stat target path {}: {e}", target_path.display()))
        })?;
        if !not_mounted {
            warn!(%volume_id, target_path = %target_path.display(), "target is already a mount point, no-op");
            return Ok(());
        }

        let vid = VolumeId::new(volume_id);
        let source = self.engine.prepare(vid, target_path.to_path_buf(), identity, options).await?;

        prepare_target_node(target_path, &source).map_err(|e| {
            EngineError::FatalBug(format!("cannot create target path {}: {e}", target_path.display()))
        })?;
        self.mounter.bind_mount(&source, target_path, read_only).map_err(|e| {
            EngineError::FatalBug(format!("bind mount {} onto {} failed: {e}", source.display(), target_path.display()))
        })?;

        Ok(())
    }

    /// `Unpublish(volumeId, targetPath)`: unmount then tear down.
    pub async fn unpublish(&self, volume_id: &str, target_path: &Path) -> Result<(), EngineError> {
        info!(%volume_id, target_path = %target_path.display(), "NodeUnpublishVolume");

        let not_mounted = self.mounter.is_not_mount_point(target_path).map_err(|e| {
            EngineError::FatalBug(format!("cannot stat target path {}: {e}", target_path.display()))
        })?;
        if !not_mounted {
            self.mounter.unmount(target_path).map_err(|e| {
                EngineError::FatalBug(format!("unmount {} failed: {e}", target_path.display()))
            })?;
        }

        self.engine.teardown(VolumeId::new(volume_id)).await
    }
}

/// Create `target_path` as a file or directory so there's something for
/// the host mounter to bind onto, matching the original's `os.Create` /
/// `os.MkdirAll` branch ahead of `mount.Mount`.
fn prepare_target_node(target_path: &Path, source: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        std::fs::create_dir_all(target_path)
    } else {
        if let Some(parent) = target_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(target_path).map(|_| ())
    }
}
