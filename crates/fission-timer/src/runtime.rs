// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fission-timer.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fission_core::store::KubeResourceStore;
//! use fission_timer::runtime::TimerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = TimerRuntime::builder()
//!         .resources(Arc::new(KubeResourceStore::try_default(None).await?))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fission_core::publisher::{Publisher, PublisherConfig, WebhookPublisher};
use fission_core::reconcile::{Reconciler, ReconcilerConfig};
use fission_core::store::ResourceStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::DEFAULT_ROUTER_URL;
use crate::reconciler::TimerReconciler;
use crate::timer::Timer;

/// Builder for creating a [`TimerRuntime`].
pub struct TimerRuntimeBuilder {
    resources: Option<Arc<dyn ResourceStore>>,
    router_url: String,
    resync_interval: Duration,
    publisher: PublisherConfig,
    sink: Option<Arc<dyn Publisher>>,
}

impl Default for TimerRuntimeBuilder {
    fn default() -> Self {
        Self {
            resources: None,
            router_url: DEFAULT_ROUTER_URL.to_string(),
            resync_interval: Duration::from_secs(30),
            publisher: PublisherConfig::default(),
            sink: None,
        }
    }
}

impl TimerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource store triggers are read from (required).
    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Set the router base URL.
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

    /// Set webhook delivery retries.
    ///
    /// Default: 10 retries starting at 500ms
    pub fn publisher(mut self, config: PublisherConfig) -> Self {
        self.publisher = config;
        self
    }

    /// Deliver through `sink` instead of starting a [`WebhookPublisher`].
    pub fn sink(mut self, sink: Arc<dyn Publisher>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<TimerRuntimeConfig> {
        let resources = self
            .resources
            .ok_or_else(|| anyhow::anyhow!("resources is required"))?;

        Ok(TimerRuntimeConfig {
            resources,
            router_url: self.router_url,
            resync_interval: self.resync_interval,
            publisher: self.publisher,
            sink: self.sink,
        })
    }
}

/// Configuration for a [`TimerRuntime`].
pub struct TimerRuntimeConfig {
    resources: Arc<dyn ResourceStore>,
    router_url: String,
    resync_interval: Duration,
    publisher: PublisherConfig,
    sink: Option<Arc<dyn Publisher>>,
}

impl TimerRuntimeConfig {
    /// Start the publisher and begin reconciling time triggers.
    pub async fn start(self) -> Result<TimerRuntime> {
        let (sink, webhook) = match self.sink {
            Some(sink) => (sink, None),
            None => {
                let webhook = WebhookPublisher::start(self.publisher)?;
                (Arc::new(webhook.clone()) as Arc<dyn Publisher>, Some(webhook))
            }
        };
        let timer = Timer::start(sink, self.router_url.clone());

        let reconciler = Reconciler::new(
            Arc::new(TimerReconciler::new(self.resources.clone(), timer.clone())),
            self.resources.changes(),
            ReconcilerConfig {
                resync_interval: self.resync_interval,
            },
        );
        let reconciler_shutdown = reconciler.shutdown_handle();
        let reconciler_handle = tokio::spawn(reconciler.run());

        info!(
            router_url = %self.router_url,
            resync_interval_secs = self.resync_interval.as_secs(),
            "TimerRuntime started"
        );

        Ok(TimerRuntime {
            reconciler_handle,
            reconciler_shutdown,
            timer,
            webhook,
        })
    }
}

/// A running time trigger runtime.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct TimerRuntime {
    reconciler_handle: JoinHandle<()>,
    reconciler_shutdown: Arc<Notify>,
    timer: Timer,
    webhook: Option<WebhookPublisher>,
}

impl TimerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> TimerRuntimeBuilder {
        TimerRuntimeBuilder::new()
    }

    /// The timer.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Whether the reconciler task is still running.
    pub fn is_running(&self) -> bool {
        !self.reconciler_handle.is_finished()
    }

    /// Stop reconciling, every cron job, then the publisher.
    pub async fn shutdown(self) -> Result<()> {
        info!("TimerRuntime shutting down...");

        self.reconciler_shutdown.notify_one();
        if let Err(e) = self.reconciler_handle.await {
            error!("Reconciler task panicked: {}", e);
        }

        self.timer.shutdown().await?;
        if let Some(webhook) = self.webhook {
            webhook.shutdown();
        }

        info!("TimerRuntime shutdown complete");
        Ok(())
    }
}
