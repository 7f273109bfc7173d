// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watch subscriptions keyed by trigger.
//!
//! [`KubeWatcher`] keeps one [`WatchSubscription`] per trigger in the shared
//! subscription map and brings the set in line with the desired triggers on
//! every [`KubeWatcher::sync`]. A subscription that dies on its own (restart
//! budget exhausted) is reported on the failure channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fission_core::publisher::Publisher;
use fission_core::reconcile::{Subscriber, SyncReport, sync_subscriptions};
use fission_core::subscription::SubscriptionMap;
use fission_core::types::KubernetesWatchTrigger;
use fission_core::{Error, ObjectKey, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::WatchSource;
use crate::subscription::{SubscriptionConfig, WatchSubscription};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A subscription that stopped without being asked to.
#[derive(Debug)]
pub struct WatchFailure {
    /// Trigger whose watch failed.
    pub trigger: ObjectKey,
    /// Why it stopped.
    pub error: Error,
}

/// Handle kept in the subscription map.
pub struct WatchHandle {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl WatchHandle {
    /// Whether the watch is still running.
    pub fn is_running(&self) -> bool {
        !self.supervisor.is_finished()
    }
}

/// Starts and stops watch subscriptions.
pub struct WatchSubscriber {
    source: Arc<dyn WatchSource>,
    publisher: Arc<dyn Publisher>,
    router_url: String,
    config: SubscriptionConfig,
    failures: mpsc::Sender<WatchFailure>,
}

impl WatchSubscriber {
    /// Create a subscriber. Failed watches are reported on `failures`.
    pub fn new(
        source: Arc<dyn WatchSource>,
        publisher: Arc<dyn Publisher>,
        router_url: impl Into<String>,
        config: SubscriptionConfig,
        failures: mpsc::Sender<WatchFailure>,
    ) -> Self {
        Self {
            source,
            publisher,
            router_url: router_url.into(),
            config,
            failures,
        }
    }
}

#[async_trait]
impl Subscriber<KubernetesWatchTrigger> for WatchSubscriber {
    type Handle = WatchHandle;

    async fn subscribe(&self, trigger: &KubernetesWatchTrigger) -> Result<WatchHandle> {
        let key = trigger.metadata.key();
        info!(
            trigger = %key,
            object_type = %trigger.spec.object_type,
            function = %trigger.spec.functionref.name,
            "Adding watch"
        );

        let subscription = WatchSubscription::start(
            trigger,
            self.source.clone(),
            self.publisher.clone(),
            &self.router_url,
            self.config.clone(),
        )
        .await?;
        let cancel = subscription.cancel_token();

        let failures = self.failures.clone();
        let stopped = cancel.clone();
        let supervisor = tokio::spawn(async move {
            let error = match subscription.join().await {
                Ok(()) => {
                    debug!(trigger = %key, "Watch stopped");
                    return;
                }
                Err(error) => error,
            };
            if stopped.is_cancelled() {
                debug!(trigger = %key, error = %error, "Watch stopped with error after cancel");
                return;
            }
            error!(trigger = %key, error = %error, error_kind = %error.kind(), "Watch failed");
            let _ = failures.send(WatchFailure { trigger: key, error }).await;
        });

        Ok(WatchHandle { cancel, supervisor })
    }

    async fn unsubscribe(&self, key: &ObjectKey, handle: WatchHandle) {
        info!(trigger = %key, "Removing watch");
        handle.cancel.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, handle.supervisor).await.is_err() {
            warn!(trigger = %key, "Watch did not stop in time");
        }
    }
}

/// Subscription map plus subscriber.
#[derive(Clone)]
pub struct KubeWatcher {
    map: SubscriptionMap<KubernetesWatchTrigger, WatchHandle>,
    subscriber: Arc<WatchSubscriber>,
}

impl KubeWatcher {
    /// Start the subscription map actor.
    pub fn start(subscriber: Arc<WatchSubscriber>) -> Self {
        Self {
            map: SubscriptionMap::start(),
            subscriber,
        }
    }

    /// Bring the watches in line with `desired`.
    pub async fn sync(&self, desired: Vec<KubernetesWatchTrigger>) -> Result<SyncReport> {
        sync_subscriptions(&self.map, self.subscriber.as_ref(), desired).await
    }

    /// The trigger watched under `key`.
    pub async fn get(&self, key: &ObjectKey) -> Result<Option<KubernetesWatchTrigger>> {
        self.map.get(key).await
    }

    /// Every watched trigger, ordered by key.
    pub async fn list(&self) -> Result<Vec<(ObjectKey, KubernetesWatchTrigger)>> {
        self.map.list().await
    }

    /// Stop every watch.
    pub async fn shutdown(&self) -> Result<()> {
        for (key, entry) in self.map.drain().await? {
            self.subscriber.unsubscribe(&key, entry.handle).await;
        }
        Ok(())
    }
}
