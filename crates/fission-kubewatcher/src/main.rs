// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Kube Watcher - Kubernetes Events to Function Bridge
//!
//! Forwards Kubernetes watch events to the functions named by watch
//! triggers. Exits non-zero when a watch cannot be restarted.

use std::sync::Arc;
use tracing::{error, info, warn};

use fission_core::store::KubeResourceStore;
use fission_core::types::{KubernetesWatchTrigger, Resource};
use fission_kubewatcher::config::Config;
use fission_kubewatcher::runtime::KubeWatcherRuntime;
use fission_kubewatcher::source::KubeWatchSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fission_kubewatcher=info".into()),
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
        "Starting Fission Kube Watcher"
    );

    let resources = KubeResourceStore::try_default(None).await?;
    let _change_watchers = resources.spawn_change_watchers(&[
        (KubernetesWatchTrigger::KIND, KubernetesWatchTrigger::PLURAL),
    ]);
    let source = KubeWatchSource::try_default().await?;

    let mut runtime = KubeWatcherRuntime::builder()
        .resources(Arc::new(resources))
        .source(Arc::new(source))
        .router_url(config.router_url)
        .resync_interval(config.resync_interval)
        .build()?
        .start()
        .await?;

    let failure = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            None
        }
        failure = runtime.next_failure() => failure,
    };

    runtime.shutdown().await?;

    if let Some(failure) = failure {
        error!(
            trigger = %failure.trigger,
            error = %failure.error,
            "Watch could not be restarted, exiting"
        );
        std::process::exit(1);
    }

    info!("Fission Kube Watcher shut down");

    Ok(())
}
