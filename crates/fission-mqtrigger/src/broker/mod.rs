// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker backends.
//!
//! A backend owns the connection to one broker and turns each trigger into a
//! consumer task. Everything that happens to a message once it is read (the
//! function call, retries, response and error topics) lives in
//! [`MessageHandler`]; a backend only reads, hands over, and acks.
//!
//! Backends are picked at startup from a [`BrokerRegistry`], an explicit
//! `queue type → factory` map.
//!
//! | Backend | Queue type | Consumer identity |
//! |---------|------------|-------------------|
//! | [`memory::MemoryBroker`] | `memory` | one channel per trigger |
//! | [`azure::AzureQueueBroker`] | `azure-storage-queue` | queue named by the topic |
//! | `nats::NatsBroker` | `nats-streaming` | JetStream durable named by the trigger UID |
//! | `kafka::KafkaBroker` | `kafka` | consumer group named by the trigger UID |

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fission_core::types::{MessageQueueTrigger, MessageQueueType};
use futures::future::BoxFuture;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{BrokerError, Result};
use crate::handler::MessageHandler;

/// Azure storage queue REST backend.
pub mod azure;
/// Kafka consumer groups.
#[cfg(feature = "kafka")]
pub mod kafka;
/// In-process broker.
pub mod memory;
/// NATS JetStream durable consumers.
#[cfg(feature = "nats")]
pub mod nats;

/// A message read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message body.
    pub payload: Bytes,
    /// Record headers, in order; keys may repeat.
    pub headers: Vec<(String, String)>,
}

impl InboundMessage {
    /// Message with no headers.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<&str> for InboundMessage {
    fn from(payload: &str) -> Self {
        InboundMessage::new(Bytes::copy_from_slice(payload.as_bytes()))
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target topic.
    pub topic: String,
    /// Message body.
    pub payload: Bytes,
    /// Headers; dropped by brokers without header support.
    pub headers: Vec<(String, String)>,
}

/// Publishing side of a broker.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Publish one message.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;
}

/// A running consumer. Resolves with `Ok` when cancelled and with an error
/// (usually [`BrokerError::ConnectionLost`]) when it gave up on its own.
pub type ConsumerTask = JoinHandle<Result<()>>;

/// A broker backend.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue type this backend serves.
    fn queue_type(&self) -> MessageQueueType;

    /// Producer for response, error and poison topics.
    fn producer(&self) -> Arc<dyn Producer>;

    /// Whether final failures also publish the original payload to
    /// `<topic>-poison` (cloud queues without dead-lettering).
    fn uses_poison_queue(&self) -> bool {
        false
    }

    /// HTTP timeout for function calls made for this broker's messages.
    fn invoke_timeout(&self) -> Option<Duration> {
        None
    }

    /// Start consuming `trigger`'s topic, handing every message to
    /// `handler`. The consumer stops when `cancel` fires.
    async fn subscribe(
        &self,
        trigger: &MessageQueueTrigger,
        handler: Arc<MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<ConsumerTask>;
}

/// Hand a message to the handler and ack it once handling has finished.
///
/// Sequential triggers are handled inline, so the consumer loop does not read
/// the next message before this one is acked. Other triggers are handled on
/// a spawned task.
pub(crate) async fn dispatch<A, Fut>(handler: &Arc<MessageHandler>, message: InboundMessage, ack: A)
where
    A: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if handler.sequential() {
        handle_and_ack(handler.clone(), message, ack).await;
        return;
    }
    tokio::spawn(handle_and_ack(handler.clone(), message, ack));
}

/// Hand a polled batch to the handler, returning once every message in it
/// has been handled and acked.
///
/// Sequential triggers handle the batch one message at a time; other
/// triggers handle it concurrently. Polling backends call this so no message
/// they hold is still in flight when they poll again.
pub(crate) async fn dispatch_batch<A, Fut>(
    handler: &Arc<MessageHandler>,
    batch: Vec<(InboundMessage, A)>,
) where
    A: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if handler.sequential() {
        for (message, ack) in batch {
            handle_and_ack(handler.clone(), message, ack).await;
        }
        return;
    }

    let mut in_flight = JoinSet::new();
    for (message, ack) in batch {
        in_flight.spawn(handle_and_ack(handler.clone(), message, ack));
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!(trigger = %handler.trigger(), error = %e, "Message handler task failed");
        }
    }
}

async fn handle_and_ack<A, Fut>(handler: Arc<MessageHandler>, message: InboundMessage, ack: A)
where
    A: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    handler.handle(message).await;
    if let Err(e) = ack().await {
        warn!(trigger = %handler.trigger(), error = %e, "Failed to ack message");
    }
}

/// Connection settings for a broker backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Backend to use.
    pub queue_type: MessageQueueType,
    /// Broker URL; empty for `memory`.
    pub url: String,
    /// Contents of the mounted secret directory.
    pub secrets: BTreeMap<String, String>,
}

impl BrokerSettings {
    /// Settings with no secrets.
    pub fn new(queue_type: MessageQueueType, url: impl Into<String>) -> Self {
        Self {
            queue_type,
            url: url.into(),
            secrets: BTreeMap::new(),
        }
    }

    /// A secret value, with surrounding whitespace trimmed.
    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Creates a backend from its settings.
pub type BrokerFactory =
    Box<dyn Fn(BrokerSettings) -> BoxFuture<'static, Result<Arc<dyn MessageQueue>>> + Send + Sync>;

/// `queue type → factory` map consulted once at startup.
pub struct BrokerRegistry {
    factories: HashMap<MessageQueueType, BrokerFactory>,
}

impl BrokerRegistry {
    /// A registry with no backends.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every backend compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            MessageQueueType::Memory,
            Box::new(|_| {
                Box::pin(async {
                    let broker: Arc<dyn MessageQueue> = Arc::new(memory::MemoryBroker::new());
                    Ok(broker)
                })
            }),
        );
        registry.register(
            MessageQueueType::AzureStorageQueue,
            Box::new(|settings| {
                Box::pin(async move {
                    let broker: Arc<dyn MessageQueue> =
                        Arc::new(azure::AzureQueueBroker::connect(&settings)?);
                    Ok(broker)
                })
            }),
        );
        #[cfg(feature = "nats")]
        registry.register(
            MessageQueueType::Nats,
            Box::new(|settings| {
                Box::pin(async move {
                    let broker: Arc<dyn MessageQueue> =
                        Arc::new(nats::NatsBroker::connect(&settings).await?);
                    Ok(broker)
                })
            }),
        );
        #[cfg(feature = "kafka")]
        registry.register(
            MessageQueueType::Kafka,
            Box::new(|settings| {
                Box::pin(async move {
                    let broker: Arc<dyn MessageQueue> =
                        Arc::new(kafka::KafkaBroker::connect(&settings)?);
                    Ok(broker)
                })
            }),
        );
        registry
    }

    /// Register (or replace) the factory for a queue type.
    pub fn register(&mut self, queue_type: MessageQueueType, factory: BrokerFactory) {
        self.factories.insert(queue_type, factory);
    }

    /// Whether a backend is registered for `queue_type`.
    pub fn supports(&self, queue_type: MessageQueueType) -> bool {
        self.factories.contains_key(&queue_type)
    }

    /// Create the backend for `settings.queue_type`.
    pub async fn connect(&self, settings: BrokerSettings) -> Result<Arc<dyn MessageQueue>> {
        let factory = self.factories.get(&settings.queue_type).ok_or_else(|| {
            BrokerError::Config(format!(
                "no backend for message queue type '{}' in this build",
                settings.queue_type
            ))
        })?;
        factory(settings).await
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let msg = InboundMessage::new("x")
            .with_header("Trace-Id", "a")
            .with_header("trace-id", "b");
        assert_eq!(msg.header("TRACE-ID"), Some("a"));
        assert_eq!(msg.header("missing"), None);
    }

    #[test]
    fn test_secret_trims_and_ignores_blank() {
        let mut settings = BrokerSettings::new(MessageQueueType::Kafka, "broker:9092");
        settings.secrets.insert("caCert".into(), "  PEM\n".into());
        settings.secrets.insert("userKey".into(), "\n".into());
        assert_eq!(settings.secret("caCert"), Some("PEM"));
        assert_eq!(settings.secret("userKey"), None);
    }

    #[tokio::test]
    async fn test_registry_connects_memory() {
        let registry = BrokerRegistry::with_defaults();
        let broker = registry
            .connect(BrokerSettings::new(MessageQueueType::Memory, ""))
            .await
            .unwrap();
        assert_eq!(broker.queue_type(), MessageQueueType::Memory);
    }

    #[tokio::test]
    async fn test_registry_rejects_unregistered_type() {
        let registry = BrokerRegistry::empty();
        let err = registry
            .connect(BrokerSettings::new(MessageQueueType::Kafka, "broker:9092"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BrokerError::Config(_)));
    }

    struct NullProducer;

    #[async_trait]
    impl Producer for NullProducer {
        async fn publish(&self, _message: OutboundMessage) -> Result<()> {
            Ok(())
        }
    }

    /// Handler whose function answers `slow` after 200ms and anything else
    /// right away.
    async fn timed_handler(
        router: &wiremock::MockServer,
        sequential: bool,
    ) -> Arc<MessageHandler> {
        use wiremock::matchers::{body_string, method};
        use wiremock::{Mock, ResponseTemplate};

        Mock::given(method("POST"))
            .and(body_string("slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(router)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(router)
            .await;

        let trigger = MessageQueueTrigger {
            metadata: fission_core::types::Metadata::new("default", "orders"),
            spec: fission_core::types::MessageQueueTriggerSpec {
                function_reference: fission_core::types::FunctionReference::by_name("process"),
                message_queue_type: MessageQueueType::Memory,
                topic: "orders".into(),
                resp_topic: None,
                error_topic: None,
                max_retries: 0,
                content_type: "text/plain".into(),
                polling_interval: None,
                cooldown_period: None,
                min_replica_count: None,
                max_replica_count: None,
                metadata: BTreeMap::new(),
                secret: None,
                mqtkind: fission_core::types::MqtKind::Fission,
                sequential,
            },
        };
        Arc::new(
            MessageHandler::new(
                &trigger,
                &router.uri(),
                Duration::ZERO,
                reqwest::Client::new(),
                Arc::new(NullProducer),
                false,
            )
            .unwrap(),
        )
    }

    type Acks = Arc<std::sync::Mutex<Vec<&'static str>>>;

    fn recording_ack(acks: &Acks, name: &'static str) -> impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static {
        let acks = acks.clone();
        move || {
            Box::pin(async move {
                acks.lock().unwrap().push(name);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_acks_in_completion_order() {
        let router = wiremock::MockServer::start().await;
        let handler = timed_handler(&router, false).await;
        let acks: Acks = Default::default();

        dispatch(&handler, InboundMessage::new("slow"), recording_ack(&acks, "slow")).await;
        dispatch(&handler, InboundMessage::new("fast"), recording_ack(&acks, "fast")).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while acks.lock().unwrap().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The later message is acked first.
        assert_eq!(*acks.lock().unwrap(), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_sequential_dispatch_acks_in_arrival_order() {
        let router = wiremock::MockServer::start().await;
        let handler = timed_handler(&router, true).await;
        let acks: Acks = Default::default();

        dispatch(&handler, InboundMessage::new("slow"), recording_ack(&acks, "slow")).await;
        dispatch(&handler, InboundMessage::new("fast"), recording_ack(&acks, "fast")).await;

        assert_eq!(*acks.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_dispatch_batch_returns_after_every_ack() {
        let router = wiremock::MockServer::start().await;
        let handler = timed_handler(&router, false).await;
        let acks: Acks = Default::default();

        let batch = vec![
            (InboundMessage::new("slow"), recording_ack(&acks, "slow")),
            (InboundMessage::new("fast"), recording_ack(&acks, "fast")),
        ];
        let started = tokio::time::Instant::now();
        dispatch_batch(&handler, batch).await;

        assert_eq!(*acks.lock().unwrap(), vec!["fast", "slow"]);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(router.received_requests().await.unwrap().len(), 2);
    }
}
