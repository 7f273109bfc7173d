// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fission-kubewatcher.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fission_core::store::KubeResourceStore;
//! use fission_kubewatcher::runtime::KubeWatcherRuntime;
//! use fission_kubewatcher::source::KubeWatchSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = KubeWatcherRuntime::builder()
//!         .resources(Arc::new(KubeResourceStore::try_default(None).await?))
//!         .source(Arc::new(KubeWatchSource::try_default().await?))
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
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::DEFAULT_ROUTER_URL;
use crate::reconciler::WatchReconciler;
use crate::source::WatchSource;
use crate::subscription::SubscriptionConfig;
use crate::watcher::{KubeWatcher, WatchFailure, WatchSubscriber};

const FAILURE_QUEUE_CAPACITY: usize = 16;

/// Builder for creating a [`KubeWatcherRuntime`].
pub struct KubeWatcherRuntimeBuilder {
    resources: Option<Arc<dyn ResourceStore>>,
    source: Option<Arc<dyn WatchSource>>,
    router_url: String,
    resync_interval: Duration,
    publisher: PublisherConfig,
    subscription: SubscriptionConfig,
}

impl Default for KubeWatcherRuntimeBuilder {
    fn default() -> Self {
        Self {
            resources: None,
            source: None,
            router_url: DEFAULT_ROUTER_URL.to_string(),
            resync_interval: Duration::from_secs(30),
            publisher: PublisherConfig::default(),
            subscription: SubscriptionConfig::default(),
        }
    }
}

impl KubeWatcherRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource store triggers are read from (required).
    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Set the source watches are opened on (required).
    pub fn source(mut self, source: Arc<dyn WatchSource>) -> Self {
        self.source = Some(source);
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

    /// Set watch restart behaviour.
    ///
    /// Default: 60 attempts 500ms apart, 1s pause after an error event
    pub fn subscription(mut self, config: SubscriptionConfig) -> Self {
        self.subscription = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<KubeWatcherRuntimeConfig> {
        let resources = self
            .resources
            .ok_or_else(|| anyhow::anyhow!("resources is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("source is required"))?;

        Ok(KubeWatcherRuntimeConfig {
            resources,
            source,
            router_url: self.router_url,
            resync_interval: self.resync_interval,
            publisher: self.publisher,
            subscription: self.subscription,
        })
    }
}

/// Configuration for a [`KubeWatcherRuntime`].
pub struct KubeWatcherRuntimeConfig {
    resources: Arc<dyn ResourceStore>,
    source: Arc<dyn WatchSource>,
    router_url: String,
    resync_interval: Duration,
    publisher: PublisherConfig,
    subscription: SubscriptionConfig,
}

impl KubeWatcherRuntimeConfig {
    /// Start the publisher and begin reconciling watch triggers.
    pub async fn start(self) -> Result<KubeWatcherRuntime> {
        let publisher = WebhookPublisher::start(self.publisher)?;

        let (failures_tx, failures) = mpsc::channel(FAILURE_QUEUE_CAPACITY);
        let subscriber = WatchSubscriber::new(
            self.source,
            Arc::new(publisher.clone()) as Arc<dyn Publisher>,
            self.router_url.clone(),
            self.subscription,
            failures_tx,
        );
        let watcher = KubeWatcher::start(Arc::new(subscriber));

        let reconciler = Reconciler::new(
            Arc::new(WatchReconciler::new(self.resources.clone(), watcher.clone())),
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
            "KubeWatcherRuntime started"
        );

        Ok(KubeWatcherRuntime {
            reconciler_handle,
            reconciler_shutdown,
            watcher,
            publisher,
            failures,
        })
    }
}

/// A running watch trigger runtime.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct KubeWatcherRuntime {
    reconciler_handle: JoinHandle<()>,
    reconciler_shutdown: Arc<Notify>,
    watcher: KubeWatcher,
    publisher: WebhookPublisher,
    failures: mpsc::Receiver<WatchFailure>,
}

impl KubeWatcherRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> KubeWatcherRuntimeBuilder {
        KubeWatcherRuntimeBuilder::new()
    }

    /// The watcher.
    pub fn watcher(&self) -> &KubeWatcher {
        &self.watcher
    }

    /// Wait for a watch to fail on its own.
    pub async fn next_failure(&mut self) -> Option<WatchFailure> {
        self.failures.recv().await
    }

    /// Stop reconciling, every watch, then the publisher.
    pub async fn shutdown(self) -> Result<()> {
        info!("KubeWatcherRuntime shutting down...");

        self.reconciler_shutdown.notify_one();
        if let Err(e) = self.reconciler_handle.await {
            error!("Reconciler task panicked: {}", e);
        }

        self.watcher.shutdown().await?;
        self.publisher.shutdown();

        info!("KubeWatcherRuntime shutdown complete");
        Ok(())
    }
}
