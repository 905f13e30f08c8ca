// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cmv_core::{Bundle, BundleVersion};
use cmv_engine::VolumeEngine;
use cmv_orchestrator::{BundleEventStream, BundleStore, OrchestratorError};
use cmv_storage::FilesystemLayout;
use std::sync::Mutex;

use crate::mount::MountPrimitive;
use crate::node_plugin::NodePlugin;

/// Same role as `cmv-engine`'s own `FakeStore`: a `BundleStore` the tests
/// can seed without a real Kubernetes cluster.
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
        self.bundles.lock().unwrap().insert((namespace.into(), name.into()), bundle);
    }
}

#[async_trait]
impl BundleStore for FakeStore {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Bundle, OrchestratorError> {
        self.bundles
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound { namespace: namespace.into(), name: name.into() })
    }

    async fn update(
        &self,
        namespace: &str,
        name: &str,
        _expected_version: &BundleVersion,
        _text: BTreeMap<String, String>,
    ) -> Result<BundleVersion, OrchestratorError> {
        Err(OrchestratorError::NotFound { namespace: namespace.into(), name: name.into() })
    }

    async fn watch(&self, _namespace: &str, _name: &str) -> Result<BundleEventStream, OrchestratorError> {
        Ok(Box::pin(futures_util::stream::pending()))
    }

    async fn probe_workload(&self, _namespace: &str, _name: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// `MountPrimitive` test double: never actually mounted, so
/// `NodePlugin::publish`/`unpublish` exercise the full path without
/// requiring real mount-namespace privileges.
struct NoopMount;

impl MountPrimitive for NoopMount {
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

fn context(extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut ctx = BTreeMap::new();
    ctx.insert("configMap".to_string(), "cfg".to_string());
    ctx.insert("namespace".to_string(), "default".to_string());
    ctx.insert("csi.storage.k8s.io/pod.namespace".to_string(), "default".to_string());
    ctx.insert("csi.storage.k8s.io/pod.name".to_string(), "pod-a".to_string());
    for (k, v) in extra {
        ctx.insert(k.to_string(), v.to_string());
    }
    ctx
}

#[tokio::test]
async fn publish_then_unpublish_round_trips() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let layout = FilesystemLayout::new(tmp.path());
    layout.ensure_dirs().expect("ensure_dirs");

    let store = Arc::new(FakeStore::new());
    store.seed("default", "cfg", &[("a.txt", "hello")]);
    let engine = VolumeEngine::new(layout, store);
    let plugin = NodePlugin::new(engine, Box::new(NoopMount));

    let target = tmp.path().join("target-mount");
    plugin.publish("vol-1", &target, &context(&[]), false).await.expect("publish");
    assert_eq!(std::fs::read_to_string(target.join("a.txt")).unwrap(), "hello");

    plugin.unpublish("vol-1", &target).await.expect("unpublish");
}

#[tokio::test]
async fn publish_rejects_context_missing_configmap_key() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let layout = FilesystemLayout::new(tmp.path());
    layout.ensure_dirs().expect("ensure_dirs");

    let store = Arc::new(FakeStore::new());
    let engine = VolumeEngine::new(layout, store);
    let plugin = NodePlugin::new(engine, Box::new(NoopMount));

    let mut ctx = context(&[]);
    ctx.remove("configMap");

    let target = tmp.path().join("target-mount");
    let err = plugin.publish("vol-1", &target, &ctx, false).await.unwrap_err();
    assert_eq!(err.kind(), cmv_core::ErrorKind::InvalidArgument);
}
