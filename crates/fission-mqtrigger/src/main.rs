// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission MQ Trigger - Message Queue to Function Bridge
//!
//! Consumes the topics named by message queue triggers and invokes their
//! functions. Exits non-zero when a consumer loses its broker.

use std::sync::Arc;
use tracing::{error, info, warn};

use fission_core::store::KubeResourceStore;
use fission_core::types::{MessageQueueTrigger, Resource};
use fission_mqtrigger::config::Config;
use fission_mqtrigger::runtime::MqTriggerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fission_mqtrigger=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        queue_type = %config.broker.queue_type,
        url = %config.broker.url,
        secrets = config.broker.secrets.len(),
        router_url = %config.router_url,
        resync_interval_secs = config.resync_interval.as_secs(),
        "Starting Fission MQ Trigger"
    );

    let resources = KubeResourceStore::try_default(None).await?;
    let _change_watchers = resources.spawn_change_watchers(&[
        (MessageQueueTrigger::KIND, MessageQueueTrigger::PLURAL),
    ]);

    let mut runtime = MqTriggerRuntime::builder()
        .resources(Arc::new(resources))
        .broker_settings(config.broker)
        .router_url(config.router_url)
        .resync_interval(config.resync_interval)
        .retry_delay(config.retry_delay)
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
            "Consumer lost its broker, exiting"
        );
        std::process::exit(1);
    }

    info!("Fission MQ Trigger shut down");

    Ok(())
}
