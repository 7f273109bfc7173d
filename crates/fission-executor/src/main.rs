// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Executor - Pre-warmed Pools and Function Specialization
//!
//! Keeps a pool of generic containers per environment and, when the router
//! asks for a function, specializes one of them and hands back its address.

use std::sync::Arc;
use tracing::{info, warn};

use fission_core::store::KubeResourceStore;
use fission_core::types::{Environment, Function, Package, Resource};
use fission_executor::config::Config;
use fission_executor::orchestrator::KubeOrchestrator;
use fission_executor::runtime::ExecutorRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fission_executor=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        bind_addr = %config.bind_addr,
        function_namespace = %config.function_namespace,
        instance_id = %config.pool.instance_id,
        fetcher_image = %config.pool.fetcher_image,
        idle_timeout_secs = config.pool.idle_timeout.as_secs(),
        "Starting Fission Executor"
    );

    let resources = KubeResourceStore::try_default(None).await?;
    let _change_watchers = resources.spawn_change_watchers(&[
        (Environment::KIND, Environment::PLURAL),
        (Function::KIND, Function::PLURAL),
        (Package::KIND, Package::PLURAL),
    ]);
    let orchestrator = KubeOrchestrator::try_default().await?;

    let runtime = ExecutorRuntime::builder()
        .orchestrator(Arc::new(orchestrator))
        .resources(Arc::new(resources))
        .bind_addr(config.bind_addr)
        .function_namespace(config.function_namespace)
        .pool(config.pool)
        .cleanup_grace(Some(config.cleanup_grace))
        .watch_interval(config.watch_interval)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Executor ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Fission Executor shut down");

    Ok(())
}
