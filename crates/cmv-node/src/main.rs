// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process bootstrap for the ConfigMap volume lifecycle node plugin. Wires
//! CLI flags into a [`Config`], builds the orchestrator client, constructs
//! the [`VolumeEngine`], runs startup reconciliation, and hands a
//! [`NodePlugin`] to the (not built here) CSI gRPC transport.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod mount;
mod node_plugin;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cmv_engine::VolumeEngine;
use cmv_orchestrator::KubeConfigMapStore;
use cmv_storage::FilesystemLayout;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Cli, Config};
use mount::HostMount;
use node_plugin::NodePlugin;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config: Config = Cli::parse().into();
    info!(endpoint = %config.endpoint, node_id = %config.node_id, source_root = %config.source_root.display(), "starting cmv-node");

    if !config.source_root.is_absolute() {
        anyhow::bail!("--cm-source-root must be an absolute path, got {}", config.source_root.display());
    }

    let layout = FilesystemLayout::new(config.source_root.clone());
    layout.ensure_dirs().context("failed to create source-root directories")?;

    let store = Arc::new(KubeConfigMapStore::try_default().await.context("failed to build Kubernetes client")?);
    let engine = VolumeEngine::new(layout, store);

    engine.reconcile().await.context("startup reconciliation failed")?;
    info!("startup reconciliation complete");

    let _node_plugin = NodePlugin::new(engine, Box::new(HostMount));

    info!("cmv-node ready; awaiting shutdown signal (the CSI RPC transport that would drive NodePlugin::publish/unpublish is out of this core's scope)");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, exiting");

    Ok(())
}


#[cfg(test)]
#[path = "node_plugin_tests.rs"]
mod node_plugin_tests;
