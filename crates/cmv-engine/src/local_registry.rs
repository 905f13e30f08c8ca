// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multiplex close-write filesystem events to the volumes subscribed to
//! them. Grounded on the original driver's `volumeWatcherMap`
//! (`pkg/cmmouter/volume_watcher.go`): a
//! single shared inotify watch on the volumes root, refcounted across
//! file-mode volumes, versus one watch per directory-mode volume, with
//! an `IN_CLOSE_WRITE` filter and the `VolumeId` read off the event
//! path's first segment. The channel-forwarding shape is grounded on
//! `crates/cli/src/output.rs::tail_file`'s own `notify` usage: a
//! `recommended_watcher` callback pushes onto an mpsc channel that a
//! tokio task drains.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use cmv_core::VolumeId;
use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Invoked whenever a subscribed volume's payload is closed after a
/// write (`Engine.onLocalModify`). Returns a future so the handler can
/// take the engine's mutex; awaited inline by the task draining this
/// watcher's event channel.
pub type LocalModifyHandler = Arc<dyn Fn(VolumeId) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Subscription {
    is_dir: bool,
    /// Only set for directory-mode volumes, which get their own watch.
    dir_watcher: Option<RecommendedWatcher>,
}

pub struct LocalWatchRegistry {
    root: PathBuf,
    on_modified: LocalModifyHandler,
    watched: Mutex<HashMap<VolumeId, Subscription>>,
    /// Shared root watcher for file-mode volumes, installed on the first
    /// subscriber and torn down when the last one unsubscribes.
    root_watcher: Mutex<Option<RecommendedWatcher>>,
}

impl LocalWatchRegistry {
    pub fn new(root: impl Into<PathBuf>, on_modified: LocalModifyHandler) -> Self {
        Self { root: root.into(), on_modified, watched: Mutex::new(Default::default()), root_watcher: Mutex::new(None) }
    }

    /// Idempotent: re-subscribing an already-watched volume is a no-op,
    /// which lets `reconcile` run safely against a live engine.
    pub fn subscribe(&self, vid: VolumeId, is_dir: bool) {
        let mut watched = self.watched.lock();
        if watched.contains_key(&vid) {
            return;
        }

        let dir_watcher = if is_dir {
            let dir = self.root.join(vid.as_str());
            spawn_watcher(dir, Some(vid.clone()), self.on_modified.clone())
        } else {
            let mut root_watcher = self.root_watcher.lock();
            if root_watcher.is_none() {
                *root_watcher = spawn_watcher(self.root.clone(), None, self.on_modified.clone());
            }
            None
        };

        watched.insert(vid, Subscription { is_dir, dir_watcher });
    }

    /// Idempotent, best-effort: unsubscribing a volume that was never
    /// subscribed is a no-op.
    pub fn unsubscribe(&self, vid: &VolumeId) {
        let mut watched = self.watched.lock();
        let Some(sub) = watched.remove(vid) else { return };
        drop(sub.dir_watcher);

        if !sub.is_dir && !watched.values().any(|s| !s.is_dir) {
            *self.root_watcher.lock() = None;
        }
    }

    pub fn is_subscribed(&self, vid: &VolumeId) -> bool {
        self.watched.lock().contains_key(vid)
    }
}

/// `watch_path` is either a single volume's own directory (directory
/// mode, `scoped_id` set) or the shared volumes root (file mode,
/// `scoped_id` none, the `VolumeId` is read off the event path).
///
/// Returns `None` if the OS watcher could not be constructed (inotify
/// instance/descriptor exhaustion); the caller is left unwatched and the
/// next subscribe attempt retries rather than failing the whole publish.
fn spawn_watcher(watch_path: PathBuf, scoped_id: Option<VolumeId>, on_modified: LocalModifyHandler) -> Option<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            if tx.send(event).is_err() {
                warn!("local watch event dropped, channel closed");
            }
        }
        Err(e) => error!(error = %e, "local filesystem watch error"),
    }) {
        Ok(w) => w,
        Err(e) => {
            error!(path = %watch_path.display(), error = %e, "failed to construct local filesystem watcher");
            return None;
        }
    };

    let recursive = RecursiveMode::NonRecursive;
    if let Err(e) = watcher.watch(&watch_path, recursive) {
        error!(path = %watch_path.display(), error = %e, "failed to install local watch");
    }

    let watch_root = watch_path.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !matches!(event.kind, EventKind::Access(AccessKind::Close(AccessMode::Write))) {
                continue;
            }
            for path in &event.paths {
                let Some(vid) = resolve_volume_id(&watch_root, path, scoped_id.as_ref()) else { continue };
                (on_modified)(vid).await;
            }
        }
    });

    Some(watcher)
}

/// Directory mode: the scoped id is known up front. File mode: the
/// `VolumeId` is the path's first segment below the shared root.
fn resolve_volume_id(root: &Path, event_path: &Path, scoped_id: Option<&VolumeId>) -> Option<VolumeId> {
    if let Some(id) = scoped_id {
        return Some(id.clone());
    }
    let rel = event_path.strip_prefix(root).ok()?;
    let first = rel.components().next()?;
    let name = first.as_os_str().to_str()?;
    Some(VolumeId::new(name))
}
