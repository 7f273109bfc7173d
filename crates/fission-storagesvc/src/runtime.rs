// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fission-storagesvc.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fission_core::store::KubeResourceStore;
//! use fission_storagesvc::config::StorageConfig;
//! use fission_storagesvc::runtime::StorageRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resources = Arc::new(KubeResourceStore::try_default(None).await?);
//!
//!     let runtime = StorageRuntime::builder()
//!         .storage(StorageConfig::Local { root: "/fission".into(), sub_dir: "fission-functions".into() })
//!         .resources(resources)
//!         .bind_addr("0.0.0.0:8000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use fission_core::store::ResourceStore;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::ArchiveStore;
use crate::config::StorageConfig;
use crate::pruner::{ArchivePruner, PrunerConfig};
use crate::server;

/// Builder for creating a [`StorageRuntime`].
pub struct StorageRuntimeBuilder {
    storage: Option<StorageConfig>,
    resources: Option<Arc<dyn ResourceStore>>,
    bind_addr: SocketAddr,
    pruner: PrunerConfig,
}

impl Default for StorageRuntimeBuilder {
    fn default() -> Self {
        Self {
            storage: None,
            resources: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            pruner: PrunerConfig::default(),
        }
    }
}

impl StorageRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage backend (required).
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the resource store the pruner reads packages from (required).
    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8000`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the pruner configuration.
    ///
    /// Default: enabled, every 60 minutes
    pub fn pruner(mut self, config: PrunerConfig) -> Self {
        self.pruner = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<StorageRuntimeConfig> {
        let storage = self
            .storage
            .ok_or_else(|| anyhow::anyhow!("storage is required"))?;
        let resources = self
            .resources
            .ok_or_else(|| anyhow::anyhow!("resources is required"))?;

        Ok(StorageRuntimeConfig {
            storage,
            resources,
            bind_addr: self.bind_addr,
            pruner: self.pruner,
        })
    }
}

/// Configuration for a [`StorageRuntime`].
pub struct StorageRuntimeConfig {
    storage: StorageConfig,
    resources: Arc<dyn ResourceStore>,
    bind_addr: SocketAddr,
    pruner: PrunerConfig,
}

impl StorageRuntimeConfig {
    /// Start the runtime, spawning the HTTP server and the pruner.
    pub async fn start(self) -> Result<StorageRuntime> {
        let store = ArchiveStore::from_config(&self.storage)?;

        let pruner = ArchivePruner::new(store.clone(), self.resources.clone(), self.pruner);
        let pruner_shutdown = pruner.shutdown_handle();
        let pruner_handle = tokio::spawn(async move {
            pruner.run().await;
        });

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let app = server::router(store.clone());

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
            storage_type = %store.storage_type(),
            container = store.container(),
            "StorageRuntime started"
        );

        Ok(StorageRuntime {
            server_handle,
            pruner_handle,
            server_shutdown_tx,
            pruner_shutdown,
            store,
            local_addr,
        })
    }
}

/// A running archive store: HTTP API plus pruner.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct StorageRuntime {
    server_handle: JoinHandle<Result<()>>,
    pruner_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    pruner_shutdown: Arc<Notify>,
    store: ArchiveStore,
    local_addr: SocketAddr,
}

impl StorageRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> StorageRuntimeBuilder {
        StorageRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for clients of this runtime.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// The archive store behind the HTTP API.
    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Whether the HTTP server task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("StorageRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.pruner_shutdown.notify_one();

        if let Err(e) = self.pruner_handle.await {
            error!("Archive pruner task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("StorageRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Storage server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Storage server task panicked: {}", e);
                Err(anyhow::anyhow!("Server task panicked: {}", e))
            }
        }
    }
}
