// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The host bind-mount/unmount primitive. The core never calls this
//! directly; it lives at the node-plugin layer, grounded on the original
//! driver's `mounter.go` (`mount.Interface`, `mount.IsNotMountPoint`, the
//! `rbind`/`ro` mount options).

use std::io;
use std::path::Path;

/// What the node-plugin surface needs from the host mounter: an
/// idempotency check and the bind-mount/unmount calls themselves. A trait
/// so `NodePlugin` never hard-codes a platform syscall.
pub trait MountPrimitive: Send + Sync {
    /// `true` if `target` is not currently a mount point (including the
    /// case where `target` doesn't exist yet).
    fn is_not_mount_point(&self, target: &Path) -> io::Result<bool>;

    /// Bind-mount `source` onto `target`. `read_only` is the driver's
    /// `readOnly` hint, threaded through here and not interpreted by the
    /// engine.
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()>;

    fn unmount(&self, target: &Path) -> io::Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::HostMount;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use nix::mount::{mount, umount2, MntFlags, MsFlags};
    use std::os::unix::fs::MetadataExt;

    /// Linux `mount(2)`-backed implementation.
    pub struct HostMount;

    impl MountPrimitive for HostMount {
        fn is_not_mount_point(&self, target: &Path) -> io::Result<bool> {
            let meta = match std::fs::symlink_metadata(target) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
                Err(e) => return Err(e),
            };
            let Some(parent) = target.parent() else { return Ok(true) };
            let parent_meta = std::fs::metadata(parent)?;
            Ok(meta.dev() == parent_meta.dev())
        }

        fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
            mount(Some(source), target, None::<&str>, MsFlags::MS_BIND, None::<&str>)
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            if read_only {
                mount(
                    None::<&str>,
                    target,
                    None::<&str>,
                    MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                    None::<&str>,
                )
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            }
            Ok(())
        }

        fn unmount(&self, target: &Path) -> io::Result<()> {
            umount2(target, MntFlags::empty()).map_err(|e| io::Error::from_raw_os_error(e as i32))
        }
    }
}

/// Fallback for non-Linux dev/test builds: every path is reported as
/// unmounted and mount/unmount are no-ops. Never used in production; the
/// driver only ever runs as a Linux kubelet plugin.
#[cfg(not(target_os = "linux"))]
pub struct HostMount;

#[cfg(not(target_os = "linux"))]
impl MountPrimitive for HostMount {
    fn is_not_mount_point(&self, _target: &Path) -> io::Result<bool> {
        Ok(true)
    }

    fn bind_mount(&self, _source: &Path, _target: &Path, _read_only: bool) -> io::Result<()> {
        Ok(())
    }

    fn unmount(&self, _target: &Path) -> io::Result<()> {
        Ok(())
    }
}
