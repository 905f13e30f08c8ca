// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque token identifying a bundle revision. Compared only for equality;
/// never parsed or ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleVersion(pub String);

impl fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a bundle by its orchestrator-side coordinates, independent of
/// any volume that happens to be watching it. Used as the remote watch
/// registry's map key: at most one stream per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleRef {
    pub namespace: String,
    pub name: String,
}

impl BundleRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A snapshot of a remote bundle: a named, namespaced, versioned map from
/// file name to content, with text and binary halves merged on read but
/// written back only into the text half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub namespace: String,
    pub version: BundleVersion,
    /// The "text" half: entries the orchestrator stores as UTF-8 strings.
    /// This is the only half `commit` writes back into.
    pub text: BTreeMap<String, String>,
    /// The "binary" half: entries the orchestrator stores as raw bytes.
    pub binary: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    pub fn bundle_ref(&self) -> BundleRef {
        BundleRef::new(self.namespace.clone(), self.name.clone())
    }

    /// Merge the text and binary halves into a single read-only view, text
    /// entries taking precedence over a same-named binary entry.
    pub fn merged(&self) -> BTreeMap<String, Vec<u8>> {
        let mut out: BTreeMap<String, Vec<u8>> =
            self.binary.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (k, v) in &self.text {
            out.insert(k.clone(), v.clone().into_bytes());
        }
        out
    }

    /// Look up a single entry in the merged view (used for single-file /
    /// `subPath` mode).
    pub fn get_merged(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(v) = self.text.get(key) {
            return Some(v.clone().into_bytes());
        }
        self.binary.get(key).cloned()
    }
}
