// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fission-mqtrigger.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fission_core::store::KubeResourceStore;
//! use fission_core::types::MessageQueueType;
//! use fission_mqtrigger::broker::BrokerSettings;
//! use fission_mqtrigger::runtime::MqTriggerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resources = Arc::new(KubeResourceStore::try_default(None).await?);
//!
//!     let mut runtime = MqTriggerRuntime::builder()
//!         .resources(resources)
//!         .broker_settings(BrokerSettings::new(MessageQueueType::Nats, "nats://nats:4222"))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     if let Some(failure) = runtime.next_failure().await {
//!         eprintln!("{} failed: {}", failure.trigger, failure.error);
//!     }
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fission_core::reconcile::{Reconciler, ReconcilerConfig};
use fission_core::store::ResourceStore;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broker::{BrokerRegistry, BrokerSettings, MessageQueue};
use crate::config::DEFAULT_ROUTER_URL;
use crate::manager::{HandlerSettings, MqtManager, QueueSubscriber, SubscriptionFailure};
use crate::reconciler::MqtReconciler;

const FAILURE_QUEUE_CAPACITY: usize = 16;

/// Builder for creating an [`MqTriggerRuntime`].
pub struct MqTriggerRuntimeBuilder {
    resources: Option<Arc<dyn ResourceStore>>,
    broker: Option<Arc<dyn MessageQueue>>,
    broker_settings: Option<BrokerSettings>,
    registry: Option<BrokerRegistry>,
    router_url: String,
    resync_interval: Duration,
    retry_delay: Duration,
}

impl Default for MqTriggerRuntimeBuilder {
    fn default() -> Self {
        Self {
            resources: None,
            broker: None,
            broker_settings: None,
            registry: None,
            router_url: DEFAULT_ROUTER_URL.to_string(),
            resync_interval: Duration::from_secs(30),
            retry_delay: Duration::ZERO,
        }
    }
}

impl MqTriggerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource store triggers are read from (required).
    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Use an already connected broker backend.
    ///
    /// Either this or [`Self::broker_settings`] is required.
    pub fn broker(mut self, broker: Arc<dyn MessageQueue>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Connect a backend from settings when the runtime starts.
    pub fn broker_settings(mut self, settings: BrokerSettings) -> Self {
        self.broker_settings = Some(settings);
        self
    }

    /// Set the backend factories consulted for [`Self::broker_settings`].
    ///
    /// Default: [`BrokerRegistry::with_defaults`]
    pub fn registry(mut self, registry: BrokerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the router base URL functions are invoked through.
    ///
    /// Default: `http://router.fission`
    pub fn router_url(mut self, url: impl Into<String>) -> Self {
        self.router_url = url.into();
        self
    }

    /// Set the time between full trigger resyncs.
    ///
    /// Default: 30 seconds
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the delay before the first invocation retry; doubles afterwards.
    ///
    /// Default: 0 (retry immediately)
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<MqTriggerRuntimeConfig> {
        let resources = self
            .resources
            .ok_or_else(|| anyhow::anyhow!("resources is required"))?;
        let broker = match (self.broker, self.broker_settings) {
            (Some(broker), _) => BrokerSource::Connected(broker),
            (None, Some(settings)) => BrokerSource::Settings(
                settings,
                self.registry.unwrap_or_else(BrokerRegistry::with_defaults),
            ),
            (None, None) => anyhow::bail!("broker or broker_settings is required"),
        };

        Ok(MqTriggerRuntimeConfig {
            resources,
            broker,
            handler: HandlerSettings {
                router_url: self.router_url,
                retry_delay: self.retry_delay,
            },
            resync_interval: self.resync_interval,
        })
    }
}

enum BrokerSource {
    Connected(Arc<dyn MessageQueue>),
    Settings(BrokerSettings, BrokerRegistry),
}

/// Configuration for an [`MqTriggerRuntime`].
pub struct MqTriggerRuntimeConfig {
    resources: Arc<dyn ResourceStore>,
    broker: BrokerSource,
    handler: HandlerSettings,
    resync_interval: Duration,
}

impl MqTriggerRuntimeConfig {
    /// Connect the broker and start reconciling triggers.
    pub async fn start(self) -> Result<MqTriggerRuntime> {
        let broker = match self.broker {
            BrokerSource::Connected(broker) => broker,
            BrokerSource::Settings(settings, registry) => registry.connect(settings).await?,
        };
        let queue_type = broker.queue_type();

        let (failures_tx, failures) = mpsc::channel(FAILURE_QUEUE_CAPACITY);
        let subscriber = Arc::new(QueueSubscriber::new(
            broker.clone(),
            self.handler.clone(),
            failures_tx,
        )?);
        let manager = MqtManager::start(subscriber);

        let reconciler = Reconciler::new(
            Arc::new(MqtReconciler::new(
                self.resources.clone(),
                manager.clone(),
                queue_type,
            )),
            self.resources.changes(),
            ReconcilerConfig {
                resync_interval: self.resync_interval,
            },
        );
        let reconciler_shutdown = reconciler.shutdown_handle();
        let reconciler_handle = tokio::spawn(reconciler.run());

        info!(
            queue_type = %queue_type,
            router_url = %self.handler.router_url,
            resync_interval_secs = self.resync_interval.as_secs(),
            "MqTriggerRuntime started"
        );

        Ok(MqTriggerRuntime {
            reconciler_handle,
            reconciler_shutdown,
            manager,
            broker,
            failures,
        })
    }
}

/// A running message queue trigger runtime.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct MqTriggerRuntime {
    reconciler_handle: JoinHandle<()>,
    reconciler_shutdown: Arc<Notify>,
    manager: MqtManager,
    broker: Arc<dyn MessageQueue>,
    failures: mpsc::Receiver<SubscriptionFailure>,
}

impl MqTriggerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> MqTriggerRuntimeBuilder {
        MqTriggerRuntimeBuilder::new()
    }

    /// The subscription manager.
    pub fn manager(&self) -> &MqtManager {
        &self.manager
    }

    /// The broker backend.
    pub fn broker(&self) -> &Arc<dyn MessageQueue> {
        &self.broker
    }

    /// Wait for a consumer to fail on its own.
    pub async fn next_failure(&mut self) -> Option<SubscriptionFailure> {
        self.failures.recv().await
    }

    /// Whether the reconciler task is still running.
    pub fn is_running(&self) -> bool {
        !self.reconciler_handle.is_finished()
    }

    /// Stop reconciling and unsubscribe every trigger.
    pub async fn shutdown(self) -> Result<()> {
        info!("MqTriggerRuntime shutting down...");

        self.reconciler_shutdown.notify_one();
        if let Err(e) = self.reconciler_handle.await {
            error!("Reconciler task panicked: {}", e);
        }

        self.manager.shutdown().await?;
        info!("MqTriggerRuntime shutdown complete");
        Ok(())
    }
}
