// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator boundary: fetching and updating a bundle, watching one
//! for remote changes, and probing workload existence. [`kube_configmap`]
//! is the only implementation today, backed by Kubernetes `ConfigMap`s;
//! the trait exists so the engine crate never depends on `kube` directly.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod kube_configmap;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use cmv_core::{Bundle, BundleVersion};
use futures_util::Stream;
use thiserror::Error;

pub use kube_configmap::KubeConfigMapStore;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("bundle {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("remote update conflict on {namespace}/{name}: expected version {expected}")]
    Conflict { namespace: String, name: String, expected: BundleVersion },
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

/// One event from a bundle's remote watch stream.
#[derive(Debug, Clone)]
pub enum BundleEvent {
    Added(Bundle),
    Modified(Bundle),
    Deleted,
    Error(String),
}

pub type BundleEventStream = Pin<Box<dyn Stream<Item = BundleEvent> + Send>>;

/// The three orchestrator capabilities the engine needs. Every method is
/// keyed by `(namespace, name)`, never by volume — the orchestrator has
/// no notion of a volume.
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Bundle, OrchestratorError>;

    /// Update `name`'s text half, failing with `Conflict` if the remote
    /// version has moved past `expected_version` since the caller last
    /// observed it.
    async fn update(
        &self,
        namespace: &str,
        name: &str,
        expected_version: &BundleVersion,
        text: BTreeMap<String, String>,
    ) -> Result<BundleVersion, OrchestratorError>;

    /// Start a watch on a single bundle. The stream runs until dropped;
    /// callers own cancellation.
    async fn watch(&self, namespace: &str, name: &str) -> Result<BundleEventStream, OrchestratorError>;

    /// Confirm the workload identified by `(namespace, name)` still exists.
    async fn probe_workload(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError>;
}
