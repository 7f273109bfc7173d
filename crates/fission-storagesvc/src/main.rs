// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Storage Service - Function Archive Store
//!
//! An HTTP server that stores function package archives in a local directory
//! or an S3 bucket, and periodically prunes archives no package refers to.

use std::sync::Arc;
use tracing::{info, warn};

use fission_core::store::KubeResourceStore;
use fission_storagesvc::config::Config;
use fission_storagesvc::runtime::StorageRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fission_storagesvc=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        bind_addr = %config.bind_addr,
        storage_type = %config.storage.storage_type(),
        prune_enabled = config.pruner.enabled,
        prune_interval_mins = config.pruner.interval.as_secs() / 60,
        "Starting Fission Storage Service"
    );

    let resources = KubeResourceStore::try_default(None).await?;

    let runtime = StorageRuntime::builder()
        .storage(config.storage)
        .resources(Arc::new(resources))
        .bind_addr(config.bind_addr)
        .pruner(config.pruner)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Storage service ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Fission Storage Service shut down");

    Ok(())
}
