// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level coordinator: `prepare`, `teardown`, `reconcile`, and the
//! watch-callback/commit machinery that everything else in this crate
//! feeds into. Grounded on the original driver's `volumemap.go`
//! (`createVolumeMap`, `buildOrDie`, `prepareVolume`, `unmountVolume`,
//! `commitLocalVolumeChanges`).
//!
//! The in-memory index and both watch registries are reached only
//! through `inner`, a `tokio::sync::Mutex` rather than the
//! `parking_lot::Mutex` the registries use internally for their own
//! short, non-`.await`-spanning bookkeeping: orchestrator RPC suspension
//! points sit *inside* the engine mutex's scope (`Prepare`'s fetch,
//! `commit`'s fetch/update), and a synchronous mutex held across `.await`
//! would stall the executor rather than yield it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cmv_core::{Bundle, BundleRef, Options, VolumeId, VolumeRecord, BUNDLE_SIZE_LIMIT};
use cmv_orchestrator::{BundleStore, OrchestratorError};
use cmv_policy::{truncate, validate, VolumeIdentity};
use cmv_storage::{delete_payload, list_payload_ids, read_payload, update_payload, FilesystemLayout, MetadataStore};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::local_registry::LocalWatchRegistry;
use crate::remote_registry::RemoteWatchRegistry;
use crate::EngineError;

/// Push-back retry budget for `commit`'s refetch-on-conflict loop.
/// Mirrors the orchestrator's own conflict-retry shape; not specified
/// verbatim by the source, so kept at the same 5-attempts/10ms-doubling
/// cadence for one coherent retry policy across the crate.
const COMMIT_MAX_ATTEMPTS: u32 = 5;
const COMMIT_BASE_DELAY: Duration = Duration::from_millis(10);

struct EngineState {
    index: HashMap<VolumeId, VolumeRecord>,
}

pub struct VolumeEngine {
    layout: FilesystemLayout,
    metadata_store: MetadataStore,
    store: Arc<dyn BundleStore>,
    remote_registry: RemoteWatchRegistry,
    local_registry: LocalWatchRegistry,
    inner: Mutex<EngineState>,
}

impl VolumeEngine {
    /// `Arc::new_cyclic` lets the watch registries' callbacks hold a
    /// `Weak<VolumeEngine>` and call back into `on_remote_modify`/
    /// `on_local_modify` without the engine having to own them directly
    /// — the worker must be cancellable without holding the mutex.
    pub fn new(layout: FilesystemLayout, store: Arc<dyn BundleStore>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_remote = weak.clone();
            let on_remote_modified = Arc::new(move |vid: VolumeId, bundle: Bundle| {
                let weak = weak_remote.clone();
                Box::pin(async move {
                    if let Some(engine) = weak.upgrade() {
                        engine.on_remote_modify(vid, bundle).await;
                    }
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            });

            let weak_local = weak.clone();
            let on_local_modified = Arc::new(move |vid: VolumeId| {
                let weak = weak_local.clone();
                Box::pin(async move {
                    if let Some(engine) = weak.upgrade() {
                        engine.on_local_modify(vid).await;
                    }
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            });

            let metadata_store = MetadataStore::new(layout.clone());
            let local_root = layout.volumes_dir();

            Self {
                remote_registry: RemoteWatchRegistry::new(store.clone(), on_remote_modified),
                local_registry: LocalWatchRegistry::new(local_root, on_local_modified),
                metadata_store,
                layout,
                store,
                inner: Mutex::new(EngineState { index: HashMap::new() }),
            }
        })
    }

    /// `Prepare`. Returns the local path the caller should bind-mount
    /// onto `target_path`; mount-point idempotency is the node-plugin
    /// surface's concern, not the engine's, so this always runs the full
    /// sequence.
    pub async fn prepare(
        &self,
        vid: VolumeId,
        target_path: PathBuf,
        identity: VolumeIdentity,
        options: Options,
    ) -> Result<PathBuf, EngineError> {
        validate(vid.as_str(), target_path.to_string_lossy().as_ref(), &identity, &options)?;

        let bundle = self.store.fetch(&identity.bundle_namespace, &identity.bundle_name).await?;
        let bundle_ref = bundle.bundle_ref();

        let mut state = self.inner.lock().await;

        let mut record = VolumeRecord {
            volume_id: vid.clone(),
            bundle_name: identity.bundle_name,
            bundle_namespace: identity.bundle_namespace,
            workload_name: identity.workload_name,
            workload_namespace: identity.workload_namespace,
            target_path,
            options,
            remote_version: None,
        };

        let path = match update_payload(&self.layout, &mut record, &bundle) {
            Ok((path, _bumped)) => path,
            Err(e) => {
                self.clean_ambiguous_locked(&mut state, &vid, Some(&bundle_ref)).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.metadata_store.save(&vid, &record) {
            self.clean_ambiguous_locked(&mut state, &vid, Some(&bundle_ref)).await;
            return Err(e.into());
        }

        self.register_watches(&vid, &record, &bundle_ref).await;
        state.index.insert(vid, record);

        Ok(path)
    }

    /// `Teardown`.
    pub async fn teardown(&self, vid: VolumeId) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;

        let Some(mut record) = state.index.remove(&vid) else {
            return Err(EngineError::FatalBug(format!("double teardown of volume {vid}")));
        };

        let bundle_ref = BundleRef::new(record.bundle_namespace.clone(), record.bundle_name.clone());

        if record.options.keep_current_always {
            self.remote_registry.unsubscribe(&vid, &bundle_ref);
        }
        match record.options.commit_changes_on {
            cmv_core::CommitChangesOn::Off => {}
            cmv_core::CommitChangesOn::Modify => self.local_registry.unsubscribe(&vid),
            cmv_core::CommitChangesOn::Unmount => {
                if let Err(e) = self.commit_locked(&mut record).await {
                    warn!(volume_id = %vid, error = %e, "commit at teardown failed, tearing down anyway");
                }
            }
        }

        self.metadata_store.delete(&vid)?;
        delete_payload(&self.layout, &vid).map_err(|e| cmv_storage::PayloadError::Aborted(e))?;

        Ok(())
    }

    /// `Reconcile`, run at startup. Safe to call again against a live
    /// engine — `register_watches` is idempotent, so re-reconciling a
    /// volume that's already subscribed is a no-op rather than a panic.
    pub async fn reconcile(&self) -> Result<(), EngineError> {
        self.layout.ensure_dirs().map_err(|e| EngineError::FatalBug(format!("cannot prepare root directories: {e}")))?;

        let payload_ids = list_payload_ids(&self.layout)
            .map_err(|e| EngineError::FatalBug(format!("cannot enumerate payloads: {e}")))?;

        let mut state = self.inner.lock().await;

        for vid in &payload_ids {
            let record = match self.metadata_store.load(vid) {
                Ok(r) => r,
                Err(e) => {
                    warn!(volume_id = %vid, error = %e, "reconcile: missing or corrupt sidecar, cleaning up");
                    self.clean_ambiguous_locked(&mut state, vid, None).await;
                    continue;
                }
            };

            if let Err(e) = self.store.probe_workload(&record.workload_namespace, &record.workload_name).await {
                warn!(volume_id = %vid, error = %e, "reconcile: workload no longer present, cleaning up");
                let bundle_ref = BundleRef::new(record.bundle_namespace.clone(), record.bundle_name.clone());
                self.clean_ambiguous_locked(&mut state, vid, Some(&bundle_ref)).await;
                continue;
            }

            let bundle_ref = BundleRef::new(record.bundle_namespace.clone(), record.bundle_name.clone());
            self.register_watches(vid, &record, &bundle_ref).await;
            state.index.insert(vid.clone(), record);
        }

        let sidecar_ids =
            self.metadata_store.list_ids().map_err(|e| EngineError::FatalBug(format!("cannot enumerate sidecars: {e}")))?;
        let payload_set: std::collections::HashSet<_> = payload_ids.into_iter().collect();
        for id in sidecar_ids {
            if !payload_set.contains(&id) {
                info!(volume_id = %id, "reconcile: dangling sidecar with no payload, removing");
                if let Err(e) = self.metadata_store.delete(&id) {
                    warn!(volume_id = %id, error = %e, "failed to delete dangling sidecar");
                }
            }
        }

        Ok(())
    }

    async fn register_watches(&self, vid: &VolumeId, record: &VolumeRecord, bundle_ref: &BundleRef) {
        if record.options.keep_current_always {
            if let Err(e) = self.remote_registry.subscribe(vid.clone(), bundle_ref.clone()).await {
                error!(volume_id = %vid, error = %e, "failed to subscribe to remote watch");
            }
        }
        if record.options.commit_changes_on == cmv_core::CommitChangesOn::Modify {
            self.local_registry.subscribe(vid.clone(), record.payload_kind() == cmv_core::PayloadKind::Dir);
        }
    }

    /// `cleanAmbiguous`. Best-effort: every step's error is logged and
    /// swallowed. Assumes `state` is already locked by the caller.
    async fn clean_ambiguous_locked(&self, state: &mut EngineState, vid: &VolumeId, bundle_ref: Option<&BundleRef>) {
        state.index.remove(vid);
        if let Some(bundle_ref) = bundle_ref {
            self.remote_registry.unsubscribe(vid, bundle_ref);
        }
        self.local_registry.unsubscribe(vid);
        if let Err(e) = self.metadata_store.delete(vid) {
            warn!(volume_id = %vid, error = %e, "cleanAmbiguous: failed to delete sidecar");
        }
        if let Err(e) = delete_payload(&self.layout, vid) {
            warn!(volume_id = %vid, error = %e, "cleanAmbiguous: failed to delete payload");
        }
    }

    /// Dispatch for `MODIFIED`: rewrite the payload and, if it
    /// actually changed, persist the bumped sidecar. Errors are logged,
    /// never propagated — the in-memory payload is still current.
    async fn on_remote_modify(&self, vid: VolumeId, bundle: Bundle) {
        let mut state = self.inner.lock().await;
        let Some(record) = state.index.get_mut(&vid) else { return };

        match update_payload(&self.layout, record, &bundle) {
            Ok((_path, bumped)) => {
                if bumped {
                    if let Err(e) = self.metadata_store.save(&vid, record) {
                        warn!(volume_id = %vid, error = %e, "failed to persist sidecar after remote update");
                    }
                }
            }
            Err(e) => warn!(volume_id = %vid, error = %e, "failed to apply remote update to payload"),
        }
    }

    /// Dispatch for a close-write event: run the commit procedure for
    /// `vid` if it's still subscribed.
    async fn on_local_modify(&self, vid: VolumeId) {
        let mut state = self.inner.lock().await;
        let Some(record) = state.index.get_mut(&vid) else { return };
        if record.options.commit_changes_on != cmv_core::CommitChangesOn::Modify {
            return;
        }
        if let Err(e) = self.commit_locked(record).await {
            warn!(volume_id = %vid, error = %e, "commit on local modify failed");
        }
    }

    /// `Engine.commit`. Caller must already hold `inner`'s lock (passed
    /// implicitly: this takes `&mut VolumeRecord` borrowed out of the
    /// locked index).
    async fn commit_locked(&self, metadata: &mut VolumeRecord) -> Result<(), EngineError> {
        let Some(local) = read_payload(&self.layout, metadata)? else {
            return Ok(());
        };

        let Some(conflict_policy) = metadata.options.conflict_policy else {
            unreachable!("commit scheduled for volume {} without a conflict policy; validate() requires one whenever commit_changes_on is set", metadata.volume_id)
        };
        let Some(oversize_policy) = metadata.options.oversize_policy else {
            unreachable!("commit scheduled for volume {} without an oversize policy; validate() requires one whenever commit_changes_on is set", metadata.volume_id)
        };

        let mut delay = COMMIT_BASE_DELAY;
        for attempt in 0..COMMIT_MAX_ATTEMPTS {
            let mut bundle = self.store.fetch(&metadata.bundle_namespace, &metadata.bundle_name).await?;

            if Some(&bundle.version) != metadata.remote_version.as_ref() {
                match conflict_policy {
                    cmv_core::ConflictPolicy::Discard => return Ok(()),
                    cmv_core::ConflictPolicy::Override => {}
                }
            }

            apply_candidate(&mut bundle, &local, oversize_policy);

            match self.store.update(&metadata.bundle_namespace, &metadata.bundle_name, &bundle.version, bundle.text).await
            {
                Ok(new_version) => {
                    metadata.remote_version = Some(new_version);
                    self.metadata_store.save(&metadata.volume_id, metadata)?;
                    return Ok(());
                }
                Err(OrchestratorError::Conflict { .. }) => {
                    warn!(volume_id = %metadata.volume_id, attempt, "commit conflict, refetching");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::FatalBug(format!("commit for volume {} exhausted its conflict-retry budget", metadata.volume_id)))
    }
}

/// Compute the candidate text map for every key the *current* remote
/// bundle already has, then fall back to the oversize truncator if the
/// candidate would exceed the 1 MiB cap.
fn apply_candidate(bundle: &mut Bundle, local: &BTreeMap<String, Vec<u8>>, oversize_policy: cmv_core::OversizePolicy) {
    let original_size: usize = bundle.text.values().map(|v| v.len()).sum();

    let cand: BTreeMap<String, Vec<u8>> = bundle
        .text
        .keys()
        .map(|k| {
            let value = local.get(k).cloned().unwrap_or_else(|| bundle.text[k].clone().into_bytes());
            (k.clone(), value)
        })
        .collect();
    let total_size: usize = cand.values().map(|v| v.len()).sum();

    if total_size > BUNDLE_SIZE_LIMIT {
        let mut cm_data: BTreeMap<String, Vec<u8>> =
            bundle.text.iter().map(|(k, v)| (k.clone(), v.clone().into_bytes())).collect();
        truncate(&mut cm_data, local, original_size, oversize_policy);
        bundle.text = cm_data.into_iter().map(|(k, v)| (k, bytes_to_text_lossless(v))).collect();
    } else {
        bundle.text = cand.into_iter().map(|(k, v)| (k, bytes_to_text_lossless(v))).collect();
    }
}

/// Convert truncated bytes back into a `String` without ever growing the
/// byte count. `String::from_utf8_lossy` substitutes U+FFFD (3 bytes) for
/// a byte sequence `TruncHead`/`TruncTail` may have split mid-character,
/// which can push a value back over the cap the truncator just enforced.
/// Trimming back to the last valid UTF-8 boundary instead only ever
/// shrinks, so the 1 MiB cap holds for non-ASCII content too.
fn bytes_to_text_lossless(mut bytes: Vec<u8>) -> String {
    loop {
        match String::from_utf8(bytes) {
            Ok(s) => return s,
            Err(e) => {
                bytes = e.into_bytes();
                bytes.pop();
            }
        }
    }
}
