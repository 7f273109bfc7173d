// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that deletes archives no package refers to.
//!
//! Each tick:
//! 1. Lists packages and collects the archive ids their source and
//!    deployment URLs point at (the `id` query parameter)
//! 2. Lists stored archives, skipping ones modified within `min_age`
//! 3. Deletes every remaining archive that is not referenced
//!
//! A failed package listing or an unparseable package URL aborts the tick
//! before anything is deleted. Individual delete failures are logged and the
//! tick moves on to the next id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fission_core::store::ResourceStore;
use fission_core::types::Archive;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backend::ArchiveStore;
use crate::error::{Result, StorageError};

/// Configuration for the archive pruner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunerConfig {
    /// Whether pruning is enabled.
    pub enabled: bool,
    /// How often to prune.
    pub interval: Duration,
    /// Archives younger than this are never pruned (an upload may be about
    /// to be referenced by a package that is still being created).
    pub min_age: Duration,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60), // 1 hour
            min_age: Duration::from_secs(60),
        }
    }
}

impl PrunerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PRUNE_ENABLED`: "false" or "0" to disable (default: true)
    /// - `PRUNE_INTERVAL`: minutes between runs (default: 60)
    pub fn from_env() -> Self {
        let enabled = std::env::var("PRUNE_ENABLED")
            .map(|v| !(v.eq_ignore_ascii_case("false") || v == "0"))
            .unwrap_or(true);

        let interval_mins = std::env::var("PRUNE_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(60);

        Self {
            enabled,
            interval: Duration::from_secs(interval_mins * 60),
            ..Self::default()
        }
    }
}

/// Outcome of one pruning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Archives inspected.
    pub scanned: usize,
    /// Archives skipped because they were too recent.
    pub skipped_recent: usize,
    /// Archives kept because a package refers to them.
    pub referenced: usize,
    /// Archive ids deleted.
    pub deleted: Vec<String>,
    /// Archive ids whose deletion failed.
    pub failed: Vec<String>,
}

/// Background worker that prunes unreferenced archives.
pub struct ArchivePruner {
    store: ArchiveStore,
    resources: Arc<dyn ResourceStore>,
    config: PrunerConfig,
    shutdown: Arc<Notify>,
}

impl ArchivePruner {
    /// Create a new pruner.
    pub fn new(store: ArchiveStore, resources: Arc<dyn ResourceStore>, config: PrunerConfig) -> Self {
        Self {
            store,
            resources,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the pruner loop until shutdown is signalled.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Archive pruner disabled");
            return;
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            min_age_secs = self.config.min_age.as_secs(),
            "Archive pruner started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Archive pruner received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.prune_once().await {
                        error!(error = %e, "Failed to prune archives");
                    }
                }
            }
        }

        info!("Archive pruner stopped");
    }

    /// Run a single pruning pass.
    pub async fn prune_once(&self) -> Result<PruneReport> {
        let referenced = self.referenced_ids().await?;
        let items = self.store.list().await?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.min_age)
                .map_err(|e| StorageError::BadRequest(format!("invalid prune min age: {}", e)))?;

        let mut report = PruneReport {
            scanned: items.len(),
            ..PruneReport::default()
        };

        for item in items {
            if item.last_modified > cutoff {
                report.skipped_recent += 1;
                continue;
            }
            if referenced.contains(&item.id) {
                report.referenced += 1;
                continue;
            }
            match self.store.delete(&item.id).await {
                Ok(()) => {
                    debug!(id = %item.id, "Deleted orphaned archive");
                    report.deleted.push(item.id);
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Error deleting archive");
                    report.failed.push(item.id);
                }
            }
        }

        if report.deleted.is_empty() {
            debug!(scanned = report.scanned, "Archive prune completed, nothing to delete");
        } else {
            info!(
                scanned = report.scanned,
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Archive prune completed"
            );
        }
        Ok(report)
    }

    async fn referenced_ids(&self) -> Result<HashSet<String>> {
        let packages = self.resources.list_packages().await?;
        let mut ids = HashSet::new();
        for pkg in &packages {
            for archive in [&pkg.spec.deployment, &pkg.spec.source] {
                if let Some(id) = archive_id(archive)? {
                    ids.insert(id);
                }
            }
        }
        Ok(ids)
    }
}

/// Archive id referenced by a URL-typed archive, if any.
///
/// Literal archives and URLs without an `id` query parameter reference
/// nothing in this store.
pub fn archive_id(archive: &Archive) -> Result<Option<String>> {
    let Some(raw) = archive.url.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let parsed = url::Url::parse(raw)
        .map_err(|e| StorageError::BadRequest(format!("error parsing package archive url '{}': {}", raw, e)))?;
    Ok(parsed
        .query_pairs()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty()))
}
