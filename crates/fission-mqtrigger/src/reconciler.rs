// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation pass for message queue triggers.

use std::sync::Arc;

use async_trait::async_trait;
use fission_core::Result;
use fission_core::reconcile::Reconcile;
use fission_core::store::ResourceStore;
use fission_core::types::{MessageQueueTrigger, MessageQueueType, MqtKind};
use tracing::debug;

use crate::manager::MqtManager;

/// Lists triggers for this runtime's broker and syncs the manager with them.
pub struct MqtReconciler {
    resources: Arc<dyn ResourceStore>,
    manager: MqtManager,
    queue_type: MessageQueueType,
}

impl MqtReconciler {
    /// Create a pass serving triggers of `queue_type`.
    pub fn new(resources: Arc<dyn ResourceStore>, manager: MqtManager, queue_type: MessageQueueType) -> Self {
        Self {
            resources,
            manager,
            queue_type,
        }
    }

    fn wanted(&self, trigger: &MessageQueueTrigger) -> bool {
        trigger.spec.message_queue_type == self.queue_type && trigger.spec.mqtkind == MqtKind::Fission
    }
}

#[async_trait]
impl Reconcile for MqtReconciler {
    fn name(&self) -> &'static str {
        "mqtrigger"
    }

    async fn reconcile(&self) -> Result<()> {
        let desired: Vec<_> = self
            .resources
            .list_message_queue_triggers()
            .await?
            .into_iter()
            .filter(|t| self.wanted(t))
            .collect();

        let report = self.manager.sync(desired).await?;
        debug!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed,
            "Message queue triggers reconciled"
        );
        Ok(())
    }
}
