// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fission-executor.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fission_core::store::KubeResourceStore;
//! use fission_executor::orchestrator::KubeOrchestrator;
//! use fission_executor::runtime::ExecutorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resources = Arc::new(KubeResourceStore::try_default(None).await?);
//!     let orchestrator = Arc::new(KubeOrchestrator::try_default().await?);
//!
//!     let runtime = ExecutorRuntime::builder()
//!         .orchestrator(orchestrator)
//!         .resources(resources)
//!         .bind_addr("0.0.0.0:8888".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fission_core::SharedClock;
use fission_core::clock::system_clock;
use fission_core::reconcile::{Reconciler, ReconcilerConfig};
use fission_core::store::ResourceStore;
use fission_core::types::DEFAULT_NAMESPACE;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api;
use crate::cleanup::StartupCleanup;
use crate::config::DEFAULT_FUNCTION_NAMESPACE;
use crate::executor::Executor;
use crate::fscache::FunctionServiceCache;
use crate::orchestrator::Orchestrator;
use crate::pool::{PoolDeps, PoolSettings};
use crate::poolmgr::{EagerPoolCreator, EagerPoolCreatorConfig, PoolManager};
use crate::specialize::{Specializer, SpecializerConfig};
use crate::watcher::FunctionServiceWatcher;

/// Builder for creating an [`ExecutorRuntime`].
pub struct ExecutorRuntimeBuilder {
    orchestrator: Option<Arc<dyn Orchestrator>>,
    resources: Option<Arc<dyn ResourceStore>>,
    bind_addr: SocketAddr,
    function_namespace: String,
    pool: PoolSettings,
    specializer: SpecializerConfig,
    eager: EagerPoolCreatorConfig,
    cleanup_grace: Option<Duration>,
    watch_interval: Duration,
    clock: SharedClock,
}

impl Default for ExecutorRuntimeBuilder {
    fn default() -> Self {
        Self {
            orchestrator: None,
            resources: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            function_namespace: DEFAULT_FUNCTION_NAMESPACE.to_string(),
            pool: PoolSettings::default(),
            specializer: SpecializerConfig::default(),
            eager: EagerPoolCreatorConfig::default(),
            cleanup_grace: Some(Duration::from_secs(360)),
            watch_interval: Duration::from_secs(5),
            clock: system_clock(),
        }
    }
}

impl ExecutorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container orchestrator (required).
    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Set the resource store functions and environments are read from (required).
    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8888`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the namespace of pools for environments in `default`.
    ///
    /// Default: `fission-function`
    pub fn function_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.function_namespace = namespace.into();
        self
    }

    /// Set the pool settings.
    pub fn pool(mut self, settings: PoolSettings) -> Self {
        self.pool = settings;
        self
    }

    /// Set the specializer settings (ports, retry policy).
    pub fn specializer(mut self, config: SpecializerConfig) -> Self {
        self.specializer = config;
        self
    }

    /// Set the eager pool creation loop settings.
    ///
    /// Default: every 2 seconds, giving up after 5 failed listings
    pub fn eager_pools(mut self, config: EagerPoolCreatorConfig) -> Self {
        self.eager = config;
        self
    }

    /// Set the grace window of the startup cleanup, or `None` to skip it.
    ///
    /// Default: 6 minutes
    pub fn cleanup_grace(mut self, grace: Option<Duration>) -> Self {
        self.cleanup_grace = grace;
        self
    }

    /// Set how often cached function services are checked against their
    /// pods. Function and package changes are picked up as they happen.
    ///
    /// Default: 5 seconds
    pub fn watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Set the clock cache timestamps are read from.
    ///
    /// Default: system clock
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ExecutorRuntimeConfig> {
        let orchestrator = self
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("orchestrator is required"))?;
        let resources = self
            .resources
            .ok_or_else(|| anyhow::anyhow!("resources is required"))?;

        Ok(ExecutorRuntimeConfig {
            orchestrator,
            resources,
            bind_addr: self.bind_addr,
            function_namespace: self.function_namespace,
            pool: self.pool,
            specializer: self.specializer,
            eager: self.eager,
            cleanup_grace: self.cleanup_grace,
            watch_interval: self.watch_interval,
            clock: self.clock,
        })
    }
}

/// Configuration for an [`ExecutorRuntime`].
pub struct ExecutorRuntimeConfig {
    orchestrator: Arc<dyn Orchestrator>,
    resources: Arc<dyn ResourceStore>,
    bind_addr: SocketAddr,
    function_namespace: String,
    pool: PoolSettings,
    specializer: SpecializerConfig,
    eager: EagerPoolCreatorConfig,
    cleanup_grace: Option<Duration>,
    watch_interval: Duration,
    clock: SharedClock,
}

impl ExecutorRuntimeConfig {
    /// Start the runtime: cache, pool manager, eager pool creation, function
    /// service eviction, startup cleanup and the HTTP server.
    pub async fn start(self) -> Result<ExecutorRuntime> {
        let cache = FunctionServiceCache::start(self.clock.clone());
        let specializer = Specializer::new(reqwest::Client::new(), self.specializer);
        let deps = PoolDeps {
            orchestrator: self.orchestrator.clone(),
            specializer,
            cache: cache.clone(),
            clock: self.clock.clone(),
        };
        let instance_id = self.pool.instance_id.clone();
        let pools = PoolManager::start(deps, self.pool, self.function_namespace.clone());
        let executor = Executor::start(self.resources.clone(), pools.clone(), cache.clone());

        let watcher = Reconciler::new(
            Arc::new(FunctionServiceWatcher::new(
                self.resources.clone(),
                self.orchestrator.clone(),
                cache,
            )),
            self.resources.changes(),
            ReconcilerConfig {
                resync_interval: self.watch_interval,
            },
        );
        let watcher_shutdown = watcher.shutdown_handle();
        let watcher_handle = tokio::spawn(watcher.run());

        let eager = EagerPoolCreator::new(self.resources.clone(), pools.clone(), self.eager);
        let eager_shutdown = eager.shutdown_handle();
        let eager_handle = tokio::spawn(async move {
            eager.run().await;
        });

        let cleanup_handle = self.cleanup_grace.map(|grace| {
            let orchestrator = self.orchestrator.clone();
            let resources = self.resources.clone();
            let pools = pools.clone();
            let function_namespace = self.function_namespace.clone();
            let instance_id = instance_id.clone();
            tokio::spawn(async move {
                let namespaces =
                    cleanup_namespaces(resources.as_ref(), &function_namespace).await;
                let cleanup = StartupCleanup::new(
                    orchestrator.as_ref(),
                    &pools,
                    &instance_id,
                    namespaces,
                    grace,
                );
                if let Err(e) = cleanup.run().await {
                    error!(error = %e, "Error cleaning up objects of previous instances");
                }
            })
        });

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let app = api::router(executor.clone());

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await?;
            Ok(())
        });

        info!(
            bind_addr = %local_addr,
            instance_id = %instance_id,
            function_namespace = %self.function_namespace,
            "ExecutorRuntime started"
        );

        Ok(ExecutorRuntime {
            server_handle,
            eager_handle,
            watcher_handle,
            cleanup_handle,
            server_shutdown_tx,
            eager_shutdown,
            watcher_shutdown,
            executor,
            pools,
            instance_id,
            local_addr,
        })
    }
}

/// Namespaces executor-owned objects can live in: the function namespace
/// plus every non-default environment namespace.
async fn cleanup_namespaces(resources: &dyn ResourceStore, function_namespace: &str) -> Vec<String> {
    let mut namespaces = BTreeSet::from([function_namespace.to_string()]);
    match resources.list_environments().await {
        Ok(envs) => {
            namespaces.extend(
                envs.iter()
                    .map(|env| env.metadata.namespace_or_default())
                    .filter(|ns| *ns != DEFAULT_NAMESPACE)
                    .map(str::to_string),
            );
        }
        Err(e) => {
            warn!(error = %e, "Error listing environments, cleaning up the function namespace only");
        }
    }
    namespaces.into_iter().collect()
}

/// A running executor: HTTP API, pool manager and background loops.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ExecutorRuntime {
    server_handle: JoinHandle<Result<()>>,
    eager_handle: JoinHandle<()>,
    watcher_handle: JoinHandle<()>,
    cleanup_handle: Option<JoinHandle<()>>,
    server_shutdown_tx: watch::Sender<bool>,
    eager_shutdown: Arc<Notify>,
    watcher_shutdown: Arc<Notify>,
    executor: Executor,
    pools: PoolManager,
    instance_id: String,
    local_addr: SocketAddr,
}

impl ExecutorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ExecutorRuntimeBuilder {
        ExecutorRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for clients of this runtime.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// The executor facade.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The pool manager.
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Id stamped on every object this runtime creates.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether the HTTP server task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("ExecutorRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.eager_shutdown.notify_one();
        self.watcher_shutdown.notify_one();
        if let Some(cleanup) = self.cleanup_handle {
            cleanup.abort();
        }

        if let Err(e) = self.eager_handle.await {
            error!("Eager pool creator task panicked: {}", e);
        }
        if let Err(e) = self.watcher_handle.await {
            error!("Function service watcher task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ExecutorRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Executor server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Executor server task panicked: {}", e);
                Err(anyhow::anyhow!("Server task panicked: {}", e))
            }
        }
    }
}
