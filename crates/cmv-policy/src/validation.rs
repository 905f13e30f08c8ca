// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-input validation and `PublishContext` parsing.

use std::collections::BTreeMap;

use cmv_core::{CommitChangesOn, ConflictPolicy, ErrorKind, Options, OversizePolicy};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("{0}")]
    InvalidArgument(String),
}

impl PolicyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolicyError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Identity fields a `Publish` call carries alongside its `Options`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIdentity {
    pub bundle_name: String,
    pub bundle_namespace: String,
    pub workload_name: String,
    pub workload_namespace: String,
}

/// Reject empty identifiers and options that name a `CommitChangesOn`
/// without the two policies it requires.
pub fn validate(volume_id: &str, target_path: &str, identity: &VolumeIdentity, options: &Options) -> Result<(), PolicyError> {
    if volume_id.is_empty() {
        return Err(PolicyError::InvalidArgument("volumeId must not be empty".into()));
    }
    if target_path.is_empty() {
        return Err(PolicyError::InvalidArgument("targetPath must not be empty".into()));
    }
    if identity.bundle_name.is_empty() {
        return Err(PolicyError::InvalidArgument("configMap name must not be empty".into()));
    }
    if identity.bundle_namespace.is_empty() {
        return Err(PolicyError::InvalidArgument("configMap namespace must not be empty".into()));
    }
    if identity.workload_name.is_empty() || identity.workload_namespace.is_empty() {
        return Err(PolicyError::InvalidArgument("workload identity must not be empty".into()));
    }

    if options.commit_changes_on != CommitChangesOn::Off
        && (options.conflict_policy.is_none() || options.oversize_policy.is_none())
    {
        return Err(PolicyError::InvalidArgument(format!(
            "commitChangesOn={:?} requires both conflictPolicy ({{discard, override}}) and oversizePolicy ({{truncateHead, truncateHeadLine, truncateTail, truncateTailLine}}) to be set",
            options.commit_changes_on
        )));
    }

    Ok(())
}

/// Parse a node-plugin `Publish` context into `Options` plus the identity
/// fields the engine needs to resolve the bundle. `pod_namespace` is used
/// as the `namespace` default when the context omits it.
pub fn parse_context(
    context: &BTreeMap<String, String>,
    pod_namespace: &str,
    pod_name: &str,
) -> Result<(VolumeIdentity, Options), PolicyError> {
    let bundle_name = context
        .get("configMap")
        .cloned()
        .ok_or_else(|| PolicyError::InvalidArgument("context key \"configMap\" is required".into()))?;
    let bundle_namespace = context.get("namespace").cloned().unwrap_or_else(|| pod_namespace.to_string());

    let sub_path = context.get("subPath").cloned();

    let keep_current_always = match context.get("keepCurrentAlways").map(String::as_str) {
        None => false,
        Some(s) if s.eq_ignore_ascii_case("true") => true,
        Some(s) if s.eq_ignore_ascii_case("false") => false,
        Some(other) => {
            return Err(PolicyError::InvalidArgument(format!(
                "context key \"keepCurrentAlways\" must be \"true\" or \"false\", got {other:?}"
            )))
        }
    };

    let commit_changes_on = match context.get("commitChangesOn").map(String::as_str) {
        None | Some("") => CommitChangesOn::Off,
        Some("modify") => CommitChangesOn::Modify,
        Some("unmount") => CommitChangesOn::Unmount,
        Some(other) => {
            return Err(PolicyError::InvalidArgument(format!(
                "context key \"commitChangesOn\" must be \"\", \"modify\", or \"unmount\", got {other:?}"
            )))
        }
    };

    let conflict_policy = match context.get("conflictPolicy").map(String::as_str) {
        None => None,
        Some("discard") => Some(ConflictPolicy::Discard),
        Some("override") => Some(ConflictPolicy::Override),
        Some(other) => {
            return Err(PolicyError::InvalidArgument(format!(
                "context key \"conflictPolicy\" must be \"discard\" or \"override\", got {other:?}"
            )))
        }
    };

    let oversize_policy = match context.get("oversizePolicy").map(String::as_str) {
        None => None,
        Some("truncateHead") => Some(OversizePolicy::TruncHead),
        Some("truncateHeadLine") => Some(OversizePolicy::TruncHeadLine),
        Some("truncateTail") => Some(OversizePolicy::TruncTail),
        Some("truncateTailLine") => Some(OversizePolicy::TruncTailLine),
        Some(other) => {
            return Err(PolicyError::InvalidArgument(format!(
                "context key \"oversizePolicy\" must name a truncation policy, got {other:?}"
            )))
        }
    };

    let workload_namespace = context
        .get("csi.storage.k8s.io/pod.namespace")
        .cloned()
        .unwrap_or_else(|| pod_namespace.to_string());
    let workload_name = context.get("csi.storage.k8s.io/pod.name").cloned().unwrap_or_else(|| pod_name.to_string());

    let identity = VolumeIdentity { bundle_name, bundle_namespace, workload_name, workload_namespace };
    let options = Options { sub_path, keep_current_always, commit_changes_on, conflict_policy, oversize_policy };

    Ok((identity, options))
}
