// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Per-volume options set at `Prepare` time and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Single-file mode selector. When set, the volume is one file holding
    /// the named bundle entry; when unset, the volume is a directory of
    /// files, one per bundle entry.
    #[serde(default)]
    pub sub_path: Option<String>,
    /// Propagate remote bundle changes to the local payload.
    #[serde(default)]
    pub keep_current_always: bool,
    /// When local edits get pushed back to the remote bundle.
    #[serde(default)]
    pub commit_changes_on: CommitChangesOn,
    /// Required when `commit_changes_on != Off`.
    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicy>,
    /// Required when `commit_changes_on != Off`.
    #[serde(default)]
    pub oversize_policy: Option<OversizePolicy>,
}

impl Options {
    /// Directory mode iff no `sub_path` was given.
    pub fn is_dir_mode(&self) -> bool {
        self.sub_path.is_none()
    }
}

/// When local modifications are pushed back to the remote bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitChangesOn {
    #[default]
    Off,
    Modify,
    Unmount,
}

/// What to do when the remote bundle has moved on since the volume last
/// observed it and a local commit wants to push anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    Discard,
    Override,
}

/// How to shrink a pushed bundle that would otherwise exceed the 1 MiB
/// orchestrator limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OversizePolicy {
    TruncHead,
    TruncHeadLine,
    TruncTail,
    TruncTailLine,
}
