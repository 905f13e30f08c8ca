// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes `ConfigMap`-backed [`BundleStore`]. Grounded on the original
//! driver's `clientset.CoreV1().ConfigMaps(ns)` calls: `Get` for fetch,
//! `retry.RetryOnConflict` around `Get`+`Update` for push-back, a
//! `ListWatch` scoped to one object by name for the watch stream, and
//! `Pods(ns).Get` to probe workload existence.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use cmv_core::{Bundle, BundleVersion};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tracing::{info, warn};

use crate::{BundleEvent, BundleEventStream, BundleStore, OrchestratorError};

/// Conflict-retry budget for `update`: re-fetch-and-retry this many times,
/// doubling the backoff from `RETRY_BASE_DELAY` each time. The original
/// driver used `client-go`'s `retry.DefaultBackoff` (also 5 steps);
/// this mirrors its shape without depending on that package.
const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

pub struct KubeConfigMapStore {
    client: Client,
}

impl KubeConfigMapStore {
    pub async fn try_default() -> Result<Self, OrchestratorError> {
        let client = Client::try_default().await.map_err(|e| OrchestratorError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn configmaps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn to_bundle(cm: ConfigMap) -> Bundle {
    let version = cm.metadata.resource_version.unwrap_or_default();
    Bundle {
        name: cm.metadata.name.unwrap_or_default(),
        namespace: cm.metadata.namespace.unwrap_or_default(),
        version: BundleVersion(version),
        text: cm.data.unwrap_or_default().into_iter().collect(),
        binary: cm.binary_data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)).collect(),
    }
}

#[async_trait]
impl BundleStore for KubeConfigMapStore {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Bundle, OrchestratorError> {
        let api = self.configmaps(namespace);
        let cm = api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ref ae) if ae.code == 404 => {
                OrchestratorError::NotFound { namespace: namespace.into(), name: name.into() }
            }
            e => OrchestratorError::Unavailable(e.to_string()),
        })?;
        Ok(to_bundle(cm))
    }

    async fn update(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &BundleVersion,
        text: BTreeMap<String, String>,
    ) -> Result<BundleVersion, OrchestratorError> {
        let api = self.configmaps(namespace);
        let mut delay = RETRY_BASE_DELAY;

        for attempt in 0..RETRY_ATTEMPTS {
            let mut cm = api.get(name).await.map_err(|e| match e {
                kube::Error::Api(ref ae) if ae.code == 404 => {
                    OrchestratorError::NotFound { namespace: namespace.into(), name: name.into() }
                }
                e => OrchestratorError::Unavailable(e.to_string()),
            })?;

            let current_version = cm.metadata.resource_version.clone().unwrap_or_default();
            if current_version != expected_version.0 {
                return Err(OrchestratorError::Conflict {
                    namespace: namespace.into(),
                    name: name.into(),
                    expected: expected_version.clone(),
                });
            }

            cm.data = Some(text.clone().into_iter().collect());

            match api.replace(name, &PostParams::default(), &cm).await {
                Ok(updated) => {
                    let new_version = updated.metadata.resource_version.unwrap_or_default();
                    info!(%namespace, %name, version = %new_version, "bundle updated");
                    return Ok(BundleVersion(new_version));
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    warn!(%namespace, %name, attempt, "update conflict, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                Err(e) => return Err(OrchestratorError::Unavailable(e.to_string())),
            }
        }

        Err(OrchestratorError::Conflict { namespace: namespace.into(), name: name.into(), expected: expected_version.clone() })
    }

    async fn watch(&self, namespace: &str, name: &str) -> Result<BundleEventStream, OrchestratorError> {
        let api = self.configmaps(namespace);
        let cfg = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let stream = watcher(api, cfg).default_backoff().filter_map(|event| {
            std::future::ready(match event {
                Ok(watcher::Event::Apply(cm)) => Some(BundleEvent::Modified(to_bundle(cm))),
                Ok(watcher::Event::InitApply(cm)) => Some(BundleEvent::Added(to_bundle(cm))),
                Ok(watcher::Event::Delete(_)) => Some(BundleEvent::Deleted),
                Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                Err(e) => Some(BundleEvent::Error(e.to_string())),
            })
        });
        Ok(Box::pin(stream))
    }

    async fn probe_workload(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError> {
        self.pods(namespace)
            .get(name)
            .await
            .map(|_| ())
            .map_err(|e| OrchestratorError::Unavailable(format!("pod {namespace}/{name}: {e}")))
    }
}
