// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation pass for watch triggers.

use std::sync::Arc;

use async_trait::async_trait;
use fission_core::Result;
use fission_core::reconcile::Reconcile;
use fission_core::store::ResourceStore;
use tracing::debug;

use crate::watcher::KubeWatcher;

/// Lists watch triggers and syncs the watcher with them.
pub struct WatchReconciler {
    resources: Arc<dyn ResourceStore>,
    watcher: KubeWatcher,
}

impl WatchReconciler {
    /// Create the pass.
    pub fn new(resources: Arc<dyn ResourceStore>, watcher: KubeWatcher) -> Self {
        Self { resources, watcher }
    }
}

#[async_trait]
impl Reconcile for WatchReconciler {
    fn name(&self) -> &'static str {
        "kubewatcher"
    }

    async fn reconcile(&self) -> Result<()> {
        let desired = self.resources.list_watch_triggers().await?;
        let report = self.watcher.sync(desired).await?;
        debug!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed,
            "Watch triggers reconciled"
        );
        Ok(())
    }
}
