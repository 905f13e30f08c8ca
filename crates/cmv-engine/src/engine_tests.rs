// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use cmv_core::{Bundle, BundleVersion, CommitChangesOn, ConflictPolicy, Options, OversizePolicy, VolumeId};
use cmv_orchestrator::{BundleEventStream, BundleStore, OrchestratorError};
use cmv_policy::VolumeIdentity;
use cmv_storage::FilesystemLayout;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::{EngineError, VolumeEngine};

/// In-memory [`BundleStore`] for exercising the engine without a real
/// Kubernetes cluster, the way the orchestrator crate's own lack of unit
/// tests is compensated for here instead.
struct FakeStore {
    bundles: Mutex<HashMap<(String, String), Bundle>>,
}

impl FakeStore {
    fn new() -> Self {
        Self { bundles: Mutex::new(HashMap::new()) }
    }

    fn seed(&self, namespace: &str, name: &str, text: &[(&str, &str)]) {
        let bundle = Bundle {
            name: name.into(),
            namespace: namespace.into(),
            version: BundleVersion("1".into()),
            text: text.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            binary: BTreeMap::new(),
        };
        self.bundles.lock().insert((namespace.into(), name.into()), bundle);
    }
}

#[async_trait]
impl BundleStore for FakeStore {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Bundle, OrchestratorError> {
        self.bundles
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound { namespace: namespace.into(), name: name.into() })
    }

    async fn update(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &BundleVersion,
        text: BTreeMap<String, String>,
    ) -> Result<BundleVersion, OrchestratorError> {
        let mut bundles = self.bundles.lock();
        let key = (namespace.to_string(), name.to_string());
        let bundle = bundles
            .get_mut(&key)
            .ok_or_else(|| OrchestratorError::NotFound { namespace: namespace.into(), name: name.into() })?;

        if &bundle.version != expected_version {
            return Err(OrchestratorError::Conflict {
                namespace: namespace.into(),
                name: name.into(),
                expected: expected_version.clone(),
            });
        }

        let next: u64 = bundle.version.0.parse().unwrap_or(0) + 1;
        bundle.version = BundleVersion(next.to_string());
        bundle.text = text;
        Ok(bundle.version.clone())
    }

    async fn watch(&self, _namespace: &str, _name: &str) -> Result<BundleEventStream, OrchestratorError> {
        Ok(Box::pin(futures_util::stream::pending()))
    }

    async fn probe_workload(&self, _namespace: &str, _name: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

fn identity() -> VolumeIdentity {
    VolumeIdentity {
        bundle_name: "cfg".into(),
        bundle_namespace: "default".into(),
        workload_name: "pod-a".into(),
        workload_namespace: "default".into(),
    }
}

fn passive_options() -> Options {
    Options { sub_path: None, keep_current_always: false, commit_changes_on: CommitChangesOn::Off, conflict_policy: None, oversize_policy: None }
}

fn harness() -> (TempDir, Arc<VolumeEngine>, Arc<FakeStore>) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let layout = FilesystemLayout::new(tmp.path());
    layout.ensure_dirs().expect("ensure_dirs");
    let store = Arc::new(FakeStore::new());
    store.seed("default", "cfg", &[("a.txt", "hello"), ("b.txt", "world")]);
    let engine = VolumeEngine::new(layout, store.clone());
    (tmp, engine, store)
}

#[tokio::test]
async fn prepare_writes_sidecar_and_payload() {
    let (tmp, engine, _store) = harness();
    let vid = VolumeId::new("vol-1");

    let path = engine.prepare(vid.clone(), "/target".into(), identity(), passive_options()).await.expect("prepare");

    assert_eq!(std::fs::read_to_string(path.join("a.txt")).unwrap(), "hello");
    assert_eq!(std::fs::read_to_string(path.join("b.txt")).unwrap(), "world");

    let layout = FilesystemLayout::new(tmp.path());
    assert!(layout.metadata_path(&vid).exists());
}

#[tokio::test]
async fn teardown_removes_sidecar_and_payload() {
    let (tmp, engine, _store) = harness();
    let vid = VolumeId::new("vol-1");
    engine.prepare(vid.clone(), "/target".into(), identity(), passive_options()).await.expect("prepare");

    engine.teardown(vid.clone()).await.expect("teardown");

    let layout = FilesystemLayout::new(tmp.path());
    assert!(!layout.metadata_path(&vid).exists());
    assert!(!layout.volume_path(&vid).exists());
}

#[tokio::test]
async fn double_teardown_is_a_fatal_bug() {
    let (_tmp, engine, _store) = harness();
    let vid = VolumeId::new("vol-1");
    engine.prepare(vid.clone(), "/target".into(), identity(), passive_options()).await.expect("prepare");
    engine.teardown(vid.clone()).await.expect("first teardown");

    let err = engine.teardown(vid).await.unwrap_err();
    assert!(matches!(err, EngineError::FatalBug(_)));
    assert_eq!(err.kind(), cmv_core::ErrorKind::FatalBug);
}

#[tokio::test]
async fn prepare_on_missing_bundle_performs_no_local_mutation() {
    let (tmp, engine, _store) = harness();
    let vid = VolumeId::new("vol-missing");
    let mut bad_identity = identity();
    bad_identity.bundle_name = "does-not-exist".into();

    let err = engine.prepare(vid.clone(), "/target".into(), bad_identity, passive_options()).await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)));

    let layout = FilesystemLayout::new(tmp.path());
    assert!(!layout.metadata_path(&vid).exists());
    assert!(!layout.volume_path(&vid).exists());
}

#[tokio::test]
async fn reconcile_restores_the_index_after_a_restart() {
    let (tmp, engine, store) = harness();
    let vid = VolumeId::new("vol-1");
    engine.prepare(vid.clone(), "/target".into(), identity(), passive_options()).await.expect("prepare");
    drop(engine);

    let layout = FilesystemLayout::new(tmp.path());
    let engine2 = VolumeEngine::new(layout, store.clone());
    engine2.reconcile().await.expect("reconcile");

    // A restored volume tears down cleanly, proving it re-entered the index
    // (a FatalBug on double-teardown would fire for an untracked volume).
    engine2.teardown(vid).await.expect("teardown after reconcile");
}

#[tokio::test]
async fn reconcile_drops_dangling_sidecar_with_no_payload() {
    let (tmp, engine, store) = harness();
    let layout = FilesystemLayout::new(tmp.path());
    let vid = VolumeId::new("vol-1");
    engine.prepare(vid.clone(), "/target".into(), identity(), passive_options()).await.expect("prepare");
    std::fs::remove_dir_all(layout.volume_path(&vid)).expect("remove payload, leaving sidecar dangling");
    drop(engine);

    let engine2 = VolumeEngine::new(layout.clone(), store);
    engine2.reconcile().await.expect("reconcile");

    assert!(!layout.metadata_path(&vid).exists());
}

#[tokio::test]
async fn unmount_commit_pushes_local_edits_back() {
    let (tmp, engine, store) = harness();
    let vid = VolumeId::new("vol-1");
    let options = Options {
        sub_path: Some("a.txt".into()),
        keep_current_always: false,
        commit_changes_on: CommitChangesOn::Unmount,
        conflict_policy: Some(ConflictPolicy::Override),
        oversize_policy: Some(OversizePolicy::TruncTail),
    };
    let path = engine.prepare(vid.clone(), "/target".into(), identity(), options).await.expect("prepare");
    std::fs::write(&path, "edited-locally").expect("simulate a local edit");

    engine.teardown(vid).await.expect("teardown commits on unmount");

    let remote = store.fetch("default", "cfg").await.expect("fetch");
    assert_eq!(remote.text.get("a.txt").unwrap(), "edited-locally");
    assert_eq!(remote.text.get("b.txt").unwrap(), "world");

    let _ = tmp;
}

#[tokio::test]
async fn unmount_commit_discards_on_conflict_when_policy_says_so() {
    let (_tmp, engine, store) = harness();
    let vid = VolumeId::new("vol-1");
    let options = Options {
        sub_path: Some("a.txt".into()),
        keep_current_always: false,
        commit_changes_on: CommitChangesOn::Unmount,
        conflict_policy: Some(ConflictPolicy::Discard),
        oversize_policy: Some(OversizePolicy::TruncTail),
    };
    let path = engine.prepare(vid.clone(), "/target".into(), identity(), options).await.expect("prepare");
    std::fs::write(&path, "edited-locally").expect("simulate a local edit");

    // Someone else updates the remote bundle first, moving its version
    // past what this volume last observed.
    store.seed("default", "cfg", &[("a.txt", "someone-else"), ("b.txt", "world")]);
    {
        let mut bundles = store.bundles.lock();
        let bundle = bundles.get_mut(&("default".to_string(), "cfg".to_string())).unwrap();
        bundle.version = BundleVersion("99".into());
    }

    engine.teardown(vid).await.expect("teardown discards the commit silently");

    let remote = store.fetch("default", "cfg").await.expect("fetch");
    assert_eq!(remote.text.get("a.txt").unwrap(), "someone-else");
}
