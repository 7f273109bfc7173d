// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Timer - Cron Schedules to Function Invocations
//!
//! Invokes functions on the schedules of their time triggers.

use std::sync::Arc;
use tracing::{info, warn};

use fission_core::store::KubeResourceStore;
use fission_core::types::{Resource, TimeTrigger};
use fission_timer::config::Config;
use fission_timer::runtime::TimerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fission_timer=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        router_url = %config.router_url,
        resync_interval_secs = config.resync_interval.as_secs(),
        "Starting Fission Timer"
    );

    let resources = KubeResourceStore::try_default(None).await?;
    let _change_watchers =
        resources.spawn_change_watchers(&[(TimeTrigger::KIND, TimeTrigger::PLURAL)]);

    let runtime = TimerRuntime::builder()
        .resources(Arc::new(resources))
        .router_url(config.router_url)
        .resync_interval(config.resync_interval)
        .build()?
        .start()
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;
    info!("Fission Timer shut down");

    Ok(())
}
