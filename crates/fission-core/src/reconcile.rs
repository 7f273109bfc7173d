// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger reconciliation.
//!
//! A reconciler drives a [`SubscriptionMap`] toward the desired set of
//! triggers read from the resource store:
//!
//! ```text
//!   ResourceStore ──list──► desired ──diff──► add / update / remove
//!        │                                       │
//!        └── change signal ──┐                   ▼
//!   resync timer ────────────┴──► Reconciler ──► Subscriber (runtime I/O)
//! ```
//!
//! [`Reconciler`] is the loop (resync tick plus change events), [`Reconcile`]
//! is one pass, and [`sync_subscriptions`] is the shared diff-and-apply step
//! most passes are built from.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::subscription::{AddError, SubscriptionMap};
use crate::types::{ObjectKey, Resource};

/// Difference between the current subscriptions and the desired triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<T> {
    /// Triggers with no subscription yet.
    pub added: Vec<T>,
    /// Triggers whose resource version changed.
    pub changed: Vec<T>,
    /// Keys subscribed but no longer desired.
    pub removed: Vec<ObjectKey>,
}

impl<T> Diff<T> {
    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Compute the [`Diff`] between `current` and `desired`, keyed by
/// `namespace/name` and compared by resource version.
pub fn diff<T: Resource>(current: &[(ObjectKey, T)], desired: Vec<T>) -> Diff<T> {
    let current: BTreeMap<&ObjectKey, &T> = current.iter().map(|(k, t)| (k, t)).collect();
    let mut seen = BTreeSet::new();
    let mut added = Vec::new();
    let mut changed = Vec::new();

    for trigger in desired {
        let key = trigger.key();
        match current.get(&key) {
            None => added.push(trigger),
            Some(existing) if existing.resource_version() != trigger.resource_version() => {
                changed.push(trigger)
            }
            Some(_) => {}
        }
        seen.insert(key);
    }

    let removed = current
        .keys()
        .filter(|k| !seen.contains(**k))
        .map(|k| (*k).clone())
        .collect();

    Diff {
        added,
        changed,
        removed,
    }
}

/// Runtime side of a subscription: start and stop the I/O for one trigger.
#[async_trait]
pub trait Subscriber<T>: Send + Sync {
    /// Handle kept in the subscription map while the subscription runs.
    type Handle: Send + 'static;

    /// Start serving `trigger`.
    async fn subscribe(&self, trigger: &T) -> Result<Self::Handle>;

    /// Stop a subscription previously returned by [`Self::subscribe`].
    async fn unsubscribe(&self, key: &ObjectKey, handle: Self::Handle);
}

/// Outcome of one [`sync_subscriptions`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// New subscriptions started.
    pub added: usize,
    /// Subscriptions restarted because their trigger changed.
    pub updated: usize,
    /// Subscriptions stopped.
    pub removed: usize,
    /// Subscriptions that failed to start (retried on the next pass).
    pub failed: usize,
}

/// Bring `map` in line with `desired`, starting and stopping subscriptions
/// through `subscriber`.
///
/// A failed subscribe is logged and counted; the trigger stays absent from
/// the map so the next pass tries again.
pub async fn sync_subscriptions<T, S>(
    map: &SubscriptionMap<T, S::Handle>,
    subscriber: &S,
    desired: Vec<T>,
) -> Result<SyncReport>
where
    T: Resource,
    S: Subscriber<T> + ?Sized,
{
    let current = map.list().await?;
    let diff = diff(&current, desired);
    let mut report = SyncReport::default();

    if diff.is_empty() {
        return Ok(report);
    }

    for key in &diff.removed {
        if let Some(old) = map.delete(key).await? {
            subscriber.unsubscribe(key, old.handle).await;
            info!(kind = T::KIND, trigger = %key, "Subscription removed");
            report.removed += 1;
        }
    }

    for trigger in diff.changed {
        let key = trigger.key();
        if let Some(old) = map.delete(&key).await? {
            subscriber.unsubscribe(&key, old.handle).await;
        }
        if start(map, subscriber, key.clone(), trigger).await? {
            info!(kind = T::KIND, trigger = %key, "Subscription updated");
            report.updated += 1;
        } else {
            report.failed += 1;
        }
    }

    for trigger in diff.added {
        let key = trigger.key();
        if start(map, subscriber, key.clone(), trigger).await? {
            info!(kind = T::KIND, trigger = %key, "Subscription added");
            report.added += 1;
        } else {
            report.failed += 1;
        }
    }

    Ok(report)
}

async fn start<T, S>(
    map: &SubscriptionMap<T, S::Handle>,
    subscriber: &S,
    key: ObjectKey,
    trigger: T,
) -> Result<bool>
where
    T: Resource,
    S: Subscriber<T> + ?Sized,
{
    let handle = match subscriber.subscribe(&trigger).await {
        Ok(h) => h,
        Err(e) => {
            error!(kind = T::KIND, trigger = %key, error = %e, error_kind = %e.kind(), "Failed to subscribe");
            return Ok(false);
        }
    };

    match map.add(key.clone(), trigger, handle).await {
        Ok(()) => Ok(true),
        Err(AddError::AlreadyExists { rejected, .. }) => {
            warn!(kind = T::KIND, trigger = %key, "Subscription appeared concurrently, stopping duplicate");
            subscriber.unsubscribe(&key, rejected.handle).await;
            Ok(false)
        }
        Err(AddError::Stopped(e)) => Err(e),
    }
}

/// One reconciliation pass.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Read desired state and apply it.
    async fn reconcile(&self) -> Result<()>;
}

/// Configuration for the [`Reconciler`] loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between full resyncs.
    pub resync_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(30),
        }
    }
}

/// Periodic plus change-driven reconciliation loop.
pub struct Reconciler<R: ?Sized> {
    inner: Arc<R>,
    changes: watch::Receiver<u64>,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl<R: Reconcile + ?Sized> Reconciler<R> {
    /// Create a reconciler.
    pub fn new(inner: Arc<R>, changes: watch::Receiver<u64>, config: ReconcilerConfig) -> Self {
        Self {
            inner,
            changes,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown. Reconciles once immediately, then on every
    /// change signal and every resync tick. Errors are logged and retried on
    /// the next trigger.
    pub async fn run(mut self) {
        let name = self.inner.name();
        info!(
            reconciler = name,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Reconciler started"
        );

        self.tick(name).await;
        let mut changes_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!(reconciler = name, "Reconciler received shutdown signal");
                    break;
                }

                changed = self.changes.changed(), if changes_open => {
                    if changed.is_err() {
                        debug!(reconciler = name, "Change signal closed, relying on resync");
                        changes_open = false;
                        continue;
                    }
                    self.tick(name).await;
                }

                _ = tokio::time::sleep(self.config.resync_interval) => {
                    self.tick(name).await;
                }
            }
        }

        info!(reconciler = name, "Reconciler stopped");
    }

    async fn tick(&self, name: &'static str) {
        if let Err(e) = self.inner.reconcile().await {
            error!(reconciler = name, error = %e, error_kind = %e.kind(), "Reconcile failed");
        }
    }
}
