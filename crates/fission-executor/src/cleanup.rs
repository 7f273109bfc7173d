// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup cleanup of resources left behind by earlier executor instances.
//!
//! Everything the executor creates carries its instance id. On startup,
//! objects carrying a different id are deleted: deployments first, then
//! replica sets, then (after a grace window so in-flight requests finish)
//! pods, and services last. Objects of an environment this executor already
//! serves are left alone.

use std::time::Duration;

use fission_core::{ObjectKey, labels};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::orchestrator::{ObjectKind, ObjectSummary, Orchestrator};
use crate::poolmgr::PoolManager;

/// What a cleanup pass deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Deleted objects, in deletion order.
    pub deleted: Vec<(ObjectKind, String)>,
    /// Foreign objects kept because their environment is served locally.
    pub kept: Vec<(ObjectKind, String)>,
}

/// Deletes foreign-instance objects in a fixed order.
pub struct StartupCleanup<'a> {
    orchestrator: &'a dyn Orchestrator,
    pools: &'a PoolManager,
    instance_id: &'a str,
    namespaces: Vec<String>,
    grace: Duration,
}

impl<'a> StartupCleanup<'a> {
    /// Create a cleanup pass over `namespaces`.
    pub fn new(
        orchestrator: &'a dyn Orchestrator,
        pools: &'a PoolManager,
        instance_id: &'a str,
        namespaces: Vec<String>,
        grace: Duration,
    ) -> Self {
        Self {
            orchestrator,
            pools,
            instance_id,
            namespaces,
            grace,
        }
    }

    /// Run the pass.
    pub async fn run(&self) -> Result<CleanupReport> {
        info!(
            instance_id = %self.instance_id,
            namespaces = ?self.namespaces,
            grace_secs = self.grace.as_secs(),
            "Cleaning up objects of previous executor instances"
        );
        let mut report = CleanupReport::default();

        self.sweep(ObjectKind::Deployment, &mut report).await?;
        self.sweep(ObjectKind::ReplicaSet, &mut report).await?;

        // Old pods may still be serving requests routed to them.
        tokio::time::sleep(self.grace).await;
        self.sweep(ObjectKind::Pod, &mut report).await?;
        self.sweep(ObjectKind::Service, &mut report).await?;

        info!(
            deleted = report.deleted.len(),
            kept = report.kept.len(),
            "Startup cleanup finished"
        );
        Ok(report)
    }

    async fn sweep(&self, kind: ObjectKind, report: &mut CleanupReport) -> Result<()> {
        for namespace in &self.namespaces {
            let objects = self.orchestrator.list_objects(kind, namespace).await?;
            for object in objects {
                if !self.is_foreign(&object) {
                    continue;
                }
                if self.environment_is_served(&object).await? {
                    debug!(kind = %kind, name = %object.name, "Keeping object of a served environment");
                    report.kept.push((kind, object.name));
                    continue;
                }
                match self
                    .orchestrator
                    .delete_object(kind, &object.namespace, &object.name)
                    .await
                {
                    Ok(()) => {
                        debug!(kind = %kind, name = %object.name, namespace = %object.namespace, "Deleted object of previous instance");
                        report.deleted.push((kind, object.name));
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(kind = %kind, name = %object.name, error = %e, "Error deleting object of previous instance");
                    }
                }
            }
        }
        Ok(())
    }

    fn is_foreign(&self, object: &ObjectSummary) -> bool {
        object
            .labels
            .get(labels::EXECUTOR_INSTANCE_ID)
            .is_some_and(|id| id != self.instance_id)
    }

    async fn environment_is_served(&self, object: &ObjectSummary) -> Result<bool> {
        let (Some(name), Some(namespace)) = (
            object.labels.get(labels::ENVIRONMENT_NAME),
            object.labels.get(labels::ENVIRONMENT_NAMESPACE),
        ) else {
            return Ok(false);
        };
        self.pools
            .is_valid_environment(&ObjectKey::new(namespace, name))
            .await
    }
}
