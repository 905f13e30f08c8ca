// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multiplex per-bundle orchestrator watch streams, fanning `MODIFIED`
//! events out to every volume subscribed to that bundle. Grounded on the
//! original driver's `configMapWatcherMap` (`pkg/cmmouter/cm_watcher.go`):
//! one watch per
//! `(namespace, name)` pair regardless of subscriber count, a
//! subscriber set keyed by `VolumeId`, and a cancel-on-empty teardown.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cmv_core::{Bundle, BundleRef, VolumeId};
use cmv_orchestrator::{BundleEvent, BundleEventStream, BundleStore, OrchestratorError};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Invoked for every `MODIFIED` event on a bundle a volume subscribes to
/// (`Engine.onRemoteModify`). Returns a future so the handler can take
/// the engine's (async-aware) mutex; the watch loop awaits it inline, so
/// dispatch for a single stream is still strictly ordered.
pub type RemoteModifyHandler = Arc<dyn Fn(VolumeId, Bundle) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Entry {
    subscribers: HashSet<VolumeId>,
    cancel: CancellationToken,
}

type State = Arc<Mutex<HashMap<BundleRef, Entry>>>;

pub struct RemoteWatchRegistry {
    store: Arc<dyn BundleStore>,
    on_modified: RemoteModifyHandler,
    state: State,
}

impl RemoteWatchRegistry {
    pub fn new(store: Arc<dyn BundleStore>, on_modified: RemoteModifyHandler) -> Self {
        Self { store, on_modified, state: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Add `vid` to the bundle's subscriber set, opening a new watch
    /// stream if this is the first subscriber. Idempotent: re-subscribing
    /// a volume that's already watching `bundle_ref` is a no-op, which
    /// lets `reconcile` run safely against a live engine.
    pub async fn subscribe(&self, vid: VolumeId, bundle_ref: BundleRef) -> Result<(), OrchestratorError> {
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.get_mut(&bundle_ref) {
                entry.subscribers.insert(vid);
                return Ok(());
            }
        }

        let stream = self.store.watch(&bundle_ref.namespace, &bundle_ref.name).await?;
        let cancel = CancellationToken::new();
        self.state.lock().insert(bundle_ref.clone(), Entry { subscribers: HashSet::from([vid]), cancel: cancel.clone() });

        tokio::spawn(run_watch_loop(stream, cancel, self.state.clone(), bundle_ref, self.on_modified.clone()));

        Ok(())
    }

    /// Remove `vid` from the bundle's subscriber set; cancel and drop the
    /// stream once the set is empty.
    pub fn unsubscribe(&self, vid: &VolumeId, bundle_ref: &BundleRef) {
        let mut state = self.state.lock();
        let Some(entry) = state.get_mut(bundle_ref) else { return };
        entry.subscribers.remove(vid);
        if entry.subscribers.is_empty() {
            entry.cancel.cancel();
            state.remove(bundle_ref);
        }
    }

    pub fn contains(&self, vid: &VolumeId, bundle_ref: &BundleRef) -> bool {
        self.state.lock().get(bundle_ref).is_some_and(|e| e.subscribers.contains(vid))
    }
}

async fn run_watch_loop(
    mut stream: BundleEventStream,
    cancel: CancellationToken,
    state: State,
    bundle_ref: BundleRef,
    on_modified: RemoteModifyHandler,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };

        let Some(event) = event else { break };

        match event {
            BundleEvent::Added(_) => {
                info!(%bundle_ref, "remote watch snapshot received");
            }
            BundleEvent::Modified(bundle) => {
                let Some(subscribers) = state.lock().get(&bundle_ref).map(|e| e.subscribers.clone()) else { break };
                for vid in subscribers {
                    (on_modified)(vid, bundle.clone()).await;
                }
            }
            BundleEvent::Deleted => {
                warn!(%bundle_ref, "remote bundle deleted, volumes keep serving last snapshot");
                break;
            }
            BundleEvent::Error(msg) => {
                error!(%bundle_ref, error = %msg, "remote watch stream error, stopping");
                break;
            }
        }
    }

    state.lock().remove(&bundle_ref);
}
