// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level configuration, resolved once at startup from CLI flags.
//! Mirrors `daemon::lifecycle::Config`'s shape: a plain struct of
//! already-resolved paths, not re-read per call.

use std::path::PathBuf;

use clap::Parser;

/// Default value of `--cm-source-root`.
pub const DEFAULT_SOURCE_ROOT: &str = "/var/lib/warm-metal/cm-volume";

/// `cmv-node` CLI flags, carried verbatim from the original driver's
/// `main.go` flag definitions.
#[derive(Debug, Parser)]
#[command(name = "cmv-node", about = "ConfigMap volume lifecycle node plugin")]
pub struct Cli {
    /// Unix domain socket the CSI RPC transport listens on (out of scope
    /// for this core; recorded so the surrounding gRPC layer, not built
    /// here, knows where to bind).
    #[arg(long, default_value = "unix:///var/lib/kubelet/plugins/cm-volume/csi.sock")]
    pub endpoint: String,

    /// This node's identity, as reported to the orchestrator.
    #[arg(long)]
    pub node: String,

    /// Root directory under which every volume's payload and metadata
    /// sidecar is stored.
    #[arg(long = "cm-source-root", default_value = DEFAULT_SOURCE_ROOT)]
    pub cm_source_root: PathBuf,
}

/// Resolved configuration the rest of the process is built from.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub node_id: String,
    pub source_root: PathBuf,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self { endpoint: cli.endpoint, node_id: cli.node, source_root: cli.cm_source_root }
    }
}
