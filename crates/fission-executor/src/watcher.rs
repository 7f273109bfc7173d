// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Eviction of function services that can no longer serve their function.
//!
//! A cached record goes stale when its pod dies or stops reporting ready,
//! when its function is deleted, or when the function or its package moves
//! to a new resource version. Each pass compares every record against the
//! orchestrator and the resource store, deletes the pod and service of stale
//! ones, then drops them from the cache so the next lookup specializes a
//! fresh pod.
//!
//! Passes run through [`fission_core::reconcile::Reconciler`], so they happen
//! on every resource change plus a periodic resync that catches pods dying
//! behind the executor's back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fission_core::reconcile::Reconcile;
use fission_core::store::ResourceStore;
use fission_core::types::{Function, Package};
use fission_core::{ObjectKey, Resource};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fscache::{FunctionService, FunctionServiceCache};
use crate::orchestrator::Orchestrator;
use crate::pool::delete_function_objects;

/// Why a function service was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The specialized pod no longer exists.
    PodGone,
    /// The specialized pod exists but is not ready.
    PodNotReady,
    /// The function was deleted.
    FunctionDeleted,
    /// The function has a new resource version or UID.
    FunctionChanged,
    /// The function's package was deleted or has a new resource version.
    PackageChanged,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvictReason::PodGone => "pod gone",
            EvictReason::PodNotReady => "pod not ready",
            EvictReason::FunctionDeleted => "function deleted",
            EvictReason::FunctionChanged => "function changed",
            EvictReason::PackageChanged => "package changed",
        })
    }
}

/// A record removed by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Function the record served.
    pub function: ObjectKey,
    /// Its pod.
    pub pod_name: String,
    /// Why it went.
    pub reason: EvictReason,
}

/// Compares cached function services with live state and evicts stale ones.
pub struct FunctionServiceWatcher {
    resources: Arc<dyn ResourceStore>,
    orchestrator: Arc<dyn Orchestrator>,
    cache: FunctionServiceCache,
}

impl FunctionServiceWatcher {
    /// Create the watcher.
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        orchestrator: Arc<dyn Orchestrator>,
        cache: FunctionServiceCache,
    ) -> Self {
        Self {
            resources,
            orchestrator,
            cache,
        }
    }

    /// One pass over the cache. Returns what was evicted.
    ///
    /// Nothing is evicted when the resource store cannot be read.
    pub async fn sweep(&self) -> Result<Vec<Eviction>> {
        let cached = self.cache.list().await?;
        if cached.is_empty() {
            return Ok(Vec::new());
        }

        let functions: HashMap<ObjectKey, Function> = self
            .resources
            .list_functions()
            .await?
            .into_iter()
            .map(|f| (f.key(), f))
            .collect();
        let packages: HashMap<ObjectKey, Package> = self
            .resources
            .list_packages()
            .await?
            .into_iter()
            .map(|p| (p.key(), p))
            .collect();

        let mut evicted = Vec::new();
        for fsvc in cached {
            let reason = match functions.get(&fsvc.function) {
                None => Some(EvictReason::FunctionDeleted),
                Some(function) => match stale_resource(&fsvc, function, &packages) {
                    Some(reason) => Some(reason),
                    None => self.pod_health(&fsvc).await,
                },
            };
            let Some(reason) = reason else {
                continue;
            };
            if self.evict(&fsvc, reason).await? {
                evicted.push(Eviction {
                    function: fsvc.function,
                    pod_name: fsvc.pod_name,
                    reason,
                });
            }
        }

        self.cache.log().await?;
        Ok(evicted)
    }

    async fn pod_health(&self, fsvc: &FunctionService) -> Option<EvictReason> {
        match self.orchestrator.get_pod(&fsvc.namespace, &fsvc.pod_name).await {
            Ok(pod) if pod.ready => None,
            Ok(_) => Some(EvictReason::PodNotReady),
            Err(e) if e.is_not_found() => Some(EvictReason::PodGone),
            Err(e) => {
                warn!(pod = %fsvc.pod_name, error = %e, "Error reading function pod, keeping it");
                None
            }
        }
    }

    /// Delete the record's pod and service, then drop it from the cache.
    async fn evict(&self, fsvc: &FunctionService, reason: EvictReason) -> Result<bool> {
        info!(
            function = %fsvc.function,
            pod = %fsvc.pod_name,
            reason = %reason,
            "Evicting function service"
        );
        delete_function_objects(self.orchestrator.as_ref(), fsvc).await;

        let removed = match reason {
            EvictReason::FunctionDeleted => self.cache.delete_by_function(&fsvc.function).await?,
            _ => self.cache.delete_by_pod(&fsvc.pod_name, Duration::ZERO).await?,
        };
        Ok(removed.is_some())
    }
}

fn stale_resource(
    fsvc: &FunctionService,
    function: &Function,
    packages: &HashMap<ObjectKey, Package>,
) -> Option<EvictReason> {
    if function.metadata.resource_version != fsvc.function_rv
        || function.metadata.uid != fsvc.function_uid
    {
        return Some(EvictReason::FunctionChanged);
    }
    match packages.get(&function.package_key()) {
        Some(package) if package.metadata.resource_version == fsvc.package_rv => None,
        _ => Some(EvictReason::PackageChanged),
    }
}

#[async_trait]
impl Reconcile for FunctionServiceWatcher {
    fn name(&self) -> &'static str {
        "function-services"
    }

    async fn reconcile(&self) -> fission_core::Result<()> {
        let evicted = self.sweep().await?;
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "Function services evicted");
        }
        Ok(())
    }
}
