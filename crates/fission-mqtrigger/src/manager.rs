// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger subscriptions.
//!
//! [`QueueSubscriber`] turns a trigger into a running consumer on the
//! configured broker and supervises it: a consumer that exits on its own
//! (lost connection) is reported on the failure channel, which makes the
//! runtime exit so the orchestrator restarts it.
//!
//! [`MqtManager`] is the subscription map plus the subscriber, with
//! add/update/remove operations on top of the map actor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fission_core::reconcile::{Subscriber, SyncReport, sync_subscriptions};
use fission_core::subscription::{AddError, SubscriptionMap};
use fission_core::types::MessageQueueTrigger;
use fission_core::{Error, ObjectKey, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::MessageQueue;
use crate::handler::MessageHandler;
use crate::validate::validate_topic;

const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A consumer that stopped without being asked to.
#[derive(Debug)]
pub struct SubscriptionFailure {
    /// Trigger whose consumer failed.
    pub trigger: ObjectKey,
    /// Why it stopped.
    pub error: Error,
}

/// Handle of a running consumer, kept in the subscription map.
pub struct ConsumerHandle {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Whether the consumer is still running.
    pub fn is_running(&self) -> bool {
        !self.supervisor.is_finished()
    }
}

/// Settings shared by every trigger's handler.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Router base URL.
    pub router_url: String,
    /// Delay before the first invocation retry.
    pub retry_delay: Duration,
}

/// Starts and stops consumers on one broker.
pub struct QueueSubscriber {
    broker: Arc<dyn MessageQueue>,
    settings: HandlerSettings,
    http: reqwest::Client,
    failures: mpsc::Sender<SubscriptionFailure>,
}

impl QueueSubscriber {
    /// Create a subscriber. Failed consumers are reported on `failures`.
    pub fn new(
        broker: Arc<dyn MessageQueue>,
        settings: HandlerSettings,
        failures: mpsc::Sender<SubscriptionFailure>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = broker.invoke_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            broker,
            settings,
            http: builder.build()?,
            failures,
        })
    }

    /// The broker consumers run on.
    pub fn broker(&self) -> &Arc<dyn MessageQueue> {
        &self.broker
    }

    fn validate(&self, trigger: &MessageQueueTrigger) -> Result<()> {
        let spec = &trigger.spec;
        if spec.message_queue_type != self.broker.queue_type() {
            return Err(Error::InvalidArgument(format!(
                "trigger {} is for {}, this runtime serves {}",
                trigger.metadata.key(),
                spec.message_queue_type,
                self.broker.queue_type()
            )));
        }
        validate_topic(spec.message_queue_type, &spec.topic)?;
        for topic in [spec.response_topic(), spec.error_topic()].into_iter().flatten() {
            validate_topic(spec.message_queue_type, topic)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber<MessageQueueTrigger> for QueueSubscriber {
    type Handle = ConsumerHandle;

    async fn subscribe(&self, trigger: &MessageQueueTrigger) -> Result<ConsumerHandle> {
        self.validate(trigger)?;

        let handler = Arc::new(MessageHandler::new(
            trigger,
            &self.settings.router_url,
            self.settings.retry_delay,
            self.http.clone(),
            self.broker.producer(),
            self.broker.uses_poison_queue(),
        )?);

        let key = trigger.metadata.key();
        let cancel = CancellationToken::new();
        let task = self
            .broker
            .subscribe(trigger, handler, cancel.clone())
            .await?;

        let failures = self.failures.clone();
        let stopped = cancel.clone();
        let trigger_key = key.clone();
        let supervisor = tokio::spawn(async move {
            let error = match task.await {
                Ok(Ok(())) => {
                    debug!(trigger = %trigger_key, "Consumer stopped");
                    return;
                }
                Ok(Err(e)) => Error::from(e),
                Err(e) => Error::Fatal(format!("consumer task panicked: {}", e)),
            };
            if stopped.is_cancelled() {
                debug!(trigger = %trigger_key, error = %error, "Consumer stopped with error after cancel");
                return;
            }
            error!(trigger = %trigger_key, error = %error, error_kind = %error.kind(), "Consumer failed");
            let _ = failures
                .send(SubscriptionFailure {
                    trigger: trigger_key,
                    error,
                })
                .await;
        });

        info!(
            trigger = %key,
            topic = %trigger.spec.topic,
            function = %trigger.spec.function_reference.name,
            sequential = trigger.spec.sequential,
            "Subscribed"
        );
        Ok(ConsumerHandle { cancel, supervisor })
    }

    async fn unsubscribe(&self, key: &ObjectKey, handle: ConsumerHandle) {
        handle.cancel.cancel();
        match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, handle.supervisor).await {
            Ok(_) => info!(trigger = %key, "Unsubscribed"),
            Err(_) => warn!(trigger = %key, "Consumer did not stop in time"),
        }
    }
}

/// Subscription map plus subscriber.
#[derive(Clone)]
pub struct MqtManager {
    map: SubscriptionMap<MessageQueueTrigger, ConsumerHandle>,
    subscriber: Arc<QueueSubscriber>,
}

impl MqtManager {
    /// Start the subscription map actor.
    pub fn start(subscriber: Arc<QueueSubscriber>) -> Self {
        Self {
            map: SubscriptionMap::start(),
            subscriber,
        }
    }

    /// The subscriber.
    pub fn subscriber(&self) -> &Arc<QueueSubscriber> {
        &self.subscriber
    }

    /// Subscribe a new trigger.
    ///
    /// Fails with `already-exists` if the trigger is subscribed; the
    /// existing subscription is left alone.
    pub async fn add(&self, trigger: MessageQueueTrigger) -> Result<()> {
        let key = trigger.metadata.key();
        if self.map.get(&key).await?.is_some() {
            return Err(Error::AlreadyExists(format!("subscription {}", key)));
        }
        let handle = self.subscriber.subscribe(&trigger).await?;
        match self.map.add(key.clone(), trigger, handle).await {
            Ok(()) => Ok(()),
            Err(AddError::AlreadyExists { rejected, .. }) => {
                self.subscriber.unsubscribe(&key, rejected.handle).await;
                Err(Error::AlreadyExists(format!("subscription {}", key)))
            }
            Err(AddError::Stopped(e)) => Err(e),
        }
    }

    /// Replace a trigger's subscription (subscribing it if absent).
    pub async fn update(&self, trigger: MessageQueueTrigger) -> Result<()> {
        let key = trigger.metadata.key();
        let handle = self.subscriber.subscribe(&trigger).await?;
        if let Some(previous) = self.map.update(key.clone(), trigger, handle).await? {
            self.subscriber.unsubscribe(&key, previous.handle).await;
        }
        Ok(())
    }

    /// Unsubscribe a trigger; returns whether it was subscribed.
    pub async fn remove(&self, key: &ObjectKey) -> Result<bool> {
        match self.map.delete(key).await? {
            Some(entry) => {
                self.subscriber.unsubscribe(key, entry.handle).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The trigger subscribed under `key`.
    pub async fn get(&self, key: &ObjectKey) -> Result<Option<MessageQueueTrigger>> {
        self.map.get(key).await
    }

    /// Every subscribed trigger, ordered by key.
    pub async fn list(&self) -> Result<Vec<(ObjectKey, MessageQueueTrigger)>> {
        self.map.list().await
    }

    /// Bring the subscriptions in line with `desired`.
    pub async fn sync(&self, desired: Vec<MessageQueueTrigger>) -> Result<SyncReport> {
        sync_subscriptions(&self.map, self.subscriber.as_ref(), desired).await
    }

    /// Stop every consumer.
    pub async fn shutdown(&self) -> Result<()> {
        for (key, entry) in self.map.drain().await? {
            self.subscriber.unsubscribe(&key, entry.handle).await;
        }
        Ok(())
    }
}
