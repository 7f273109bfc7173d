// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process broker for tests and local runs.
//!
//! Every topic keeps a log of everything published to it, so tests can look
//! at response, error and poison topics after the fact. Each subscription
//! gets its own copy of every message published after it subscribed.
//! [`MemoryBroker::disconnect`] simulates a lost connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use fission_core::types::{MessageQueueTrigger, MessageQueueType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{ConsumerTask, InboundMessage, MessageQueue, OutboundMessage, Producer, dispatch};
use crate::error::{BrokerError, Result};
use crate::handler::MessageHandler;

#[derive(Default)]
struct Topic {
    log: Vec<InboundMessage>,
    subscribers: Vec<mpsc::UnboundedSender<InboundMessage>>,
    acked: usize,
}

#[derive(Default)]
struct Shared {
    topics: DashMap<String, Topic>,
    poison_queue: AtomicBool,
}

impl Shared {
    fn publish(&self, topic: &str, message: InboundMessage) {
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        entry.log.push(message.clone());
        entry
            .subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    fn ack(&self, topic: &str) {
        self.topics.entry(topic.to_string()).or_default().acked += 1;
    }
}

/// In-process broker. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// An empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a cloud queue: final failures also go to `<topic>-poison`.
    pub fn with_poison_queue(self) -> Self {
        self.shared.poison_queue.store(true, Ordering::SeqCst);
        self
    }

    /// Publish a message to `topic`.
    pub fn send(&self, topic: &str, message: InboundMessage) {
        self.shared.publish(topic, message);
    }

    /// Everything ever published to `topic`, in order.
    pub fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        self.shared
            .topics
            .get(topic)
            .map(|t| t.log.clone())
            .unwrap_or_default()
    }

    /// Messages of `topic` acked by consumers.
    pub fn acked(&self, topic: &str) -> usize {
        self.shared.topics.get(topic).map_or(0, |t| t.acked)
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .topics
            .get(topic)
            .map_or(0, |t| t.subscribers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Drop every subscription channel, as a broken connection would.
    pub fn disconnect(&self) {
        for mut topic in self.shared.topics.iter_mut() {
            topic.subscribers.clear();
        }
        info!("Memory broker disconnected all consumers");
    }
}

#[async_trait]
impl Producer for MemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let inbound = InboundMessage {
            payload: message.payload,
            headers: message.headers,
        };
        self.shared.publish(&message.topic, inbound);
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for MemoryBroker {
    fn queue_type(&self) -> MessageQueueType {
        MessageQueueType::Memory
    }

    fn producer(&self) -> Arc<dyn Producer> {
        Arc::new(self.clone())
    }

    fn uses_poison_queue(&self) -> bool {
        self.shared.poison_queue.load(Ordering::SeqCst)
    }

    async fn subscribe(
        &self,
        trigger: &MessageQueueTrigger,
        handler: Arc<MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<ConsumerTask> {
        let topic = trigger.spec.topic.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.shared
            .topics
            .entry(topic.clone())
            .or_default()
            .subscribers
            .push(tx);

        let shared = self.shared.clone();
        Ok(tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!(trigger = %handler.trigger(), "Memory consumer cancelled");
                        return Ok(());
                    }

                    message = rx.recv() => message,
                };

                let Some(message) = message else {
                    return Err(BrokerError::ConnectionLost(format!(
                        "memory topic {} closed",
                        topic
                    )));
                };

                let shared = shared.clone();
                let acked_topic = topic.clone();
                dispatch(&handler, message, move || async move {
                    shared.ack(&acked_topic);
                    Ok(())
                })
                .await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_log_keeps_everything_published() {
        let broker = MemoryBroker::new();
        broker.send("t", "a".into());
        broker
            .publish(OutboundMessage {
                topic: "t".into(),
                payload: Bytes::from_static(b"b"),
                headers: vec![("k".into(), "v".into())],
            })
            .await
            .unwrap();

        let log = broker.messages("t");
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].header("k"), Some("v"));
        assert!(broker.messages("other").is_empty());
    }

    #[test]
    fn test_poison_queue_flag() {
        assert!(!MemoryBroker::new().uses_poison_queue());
        assert!(MemoryBroker::new().with_poison_queue().uses_poison_queue());
    }
}
