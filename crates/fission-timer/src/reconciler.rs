// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation pass for time triggers.

use std::sync::Arc;

use async_trait::async_trait;
use fission_core::Result;
use fission_core::reconcile::Reconcile;
use fission_core::store::ResourceStore;
use tracing::debug;

use crate::timer::Timer;

/// Lists time triggers and syncs the timer with them.
pub struct TimerReconciler {
    resources: Arc<dyn ResourceStore>,
    timer: Timer,
}

impl TimerReconciler {
    /// Create the pass.
    pub fn new(resources: Arc<dyn ResourceStore>, timer: Timer) -> Self {
        Self { resources, timer }
    }
}

#[async_trait]
impl Reconcile for TimerReconciler {
    fn name(&self) -> &'static str {
        "timer"
    }

    async fn reconcile(&self) -> Result<()> {
        let desired = self.resources.list_time_triggers().await?;
        let report = self.timer.sync(desired).await?;
        debug!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed,
            "Time triggers reconciled"
        );
        Ok(())
    }
}
