// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kafka backend.
//!
//! Every trigger runs its own consumer in a group named after the trigger
//! UID. Offsets are stored by hand once a message has been handled and
//! committed by librdkafka's auto-commit, so a message is never committed
//! before its handler finished. One shared producer serves response, error
//! and poison topics.
//!
//! Non-sequential triggers handle records on spawned tasks and store each
//! offset when its handler finishes, so offsets within a partition can be
//! stored out of order. A later record finishing first commits past an
//! earlier one still in flight; if the consumer dies then, that earlier
//! record is not redelivered. Sequential triggers store offsets in order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fission_core::types::{MessageQueueTrigger, MessageQueueType};
use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{
    BrokerSettings, ConsumerTask, InboundMessage, MessageQueue, OutboundMessage, Producer,
    dispatch,
};
use crate::error::{BrokerError, Result};
use crate::handler::MessageHandler;

/// Secret holding the CA certificate (PEM).
pub const CA_CERT_KEY: &str = "caCert";
/// Secret holding the client certificate (PEM).
pub const USER_CERT_KEY: &str = "userCert";
/// Secret holding the client key (PEM).
pub const USER_KEY_KEY: &str = "userKey";

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Kafka backend.
#[derive(Clone)]
pub struct KafkaBroker {
    base: ClientConfig,
    producer: FutureProducer,
}

impl KafkaBroker {
    /// Create the shared producer for `settings.url` (a comma separated
    /// broker list). TLS is enabled when a CA certificate secret is present.
    pub fn connect(settings: &BrokerSettings) -> Result<Self> {
        let base = base_config(settings);
        let producer: FutureProducer = base
            .clone()
            .set("message.timeout.ms", PRODUCE_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|e| BrokerError::Connect(format!("kafka producer: {}", e)))?;
        info!(brokers = %settings.url, "Kafka producer ready");
        Ok(Self { base, producer })
    }
}

fn base_config(settings: &BrokerSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &settings.url);
    if let Some(ca) = settings.secret(CA_CERT_KEY) {
        config.set("security.protocol", "ssl").set("ssl.ca.pem", ca);
        if let (Some(cert), Some(key)) = (
            settings.secret(USER_CERT_KEY),
            settings.secret(USER_KEY_KEY),
        ) {
            config
                .set("ssl.certificate.pem", cert)
                .set("ssl.key.pem", key);
        }
    }
    config
}

fn is_connection_loss(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::Fatal)
    )
}

#[async_trait]
impl Producer for KafkaBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            });
        }
        let record = FutureRecord::<(), [u8]>::to(&message.topic)
            .payload(&message.payload[..])
            .headers(headers);
        self.producer
            .send(record, Timeout::After(PRODUCE_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::Publish {
                topic: message.topic.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl MessageQueue for KafkaBroker {
    fn queue_type(&self) -> MessageQueueType {
        MessageQueueType::Kafka
    }

    fn producer(&self) -> Arc<dyn Producer> {
        Arc::new(self.clone())
    }

    async fn subscribe(
        &self,
        trigger: &MessageQueueTrigger,
        handler: Arc<MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<ConsumerTask> {
        let topic = trigger.spec.topic.clone();
        let group = trigger.metadata.uid.clone();
        if group.is_empty() {
            return Err(BrokerError::Config(format!(
                "trigger {} has no UID to name its consumer group",
                trigger.metadata.key()
            )));
        }

        let consumer: StreamConsumer = self
            .base
            .clone()
            .set("group.id", &group)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Connect(format!("kafka consumer {}: {}", group, e)))?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| BrokerError::Connect(format!("subscribe {}: {}", topic, e)))?;
        let consumer = Arc::new(consumer);

        Ok(tokio::spawn(async move {
            info!(trigger = %handler.trigger(), topic = %topic, group = %group, "Consuming Kafka topic");
            loop {
                let received = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        consumer.unsubscribe();
                        return Ok(());
                    }

                    received = consumer.recv() => received.map(|m| m.detach()),
                };

                let message = match received {
                    Ok(message) => message,
                    Err(e) if is_connection_loss(&e) => {
                        return Err(BrokerError::ConnectionLost(e.to_string()));
                    }
                    Err(e) => {
                        warn!(trigger = %handler.trigger(), error = %e, "Kafka consumer error");
                        continue;
                    }
                };

                let headers = message
                    .headers()
                    .map(|headers| {
                        headers
                            .iter()
                            .map(|h| {
                                let value = h
                                    .value
                                    .map(|v| String::from_utf8_lossy(v).into_owned())
                                    .unwrap_or_default();
                                (h.key.to_string(), value)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let inbound = InboundMessage {
                    payload: message
                        .payload()
                        .map(bytes::Bytes::copy_from_slice)
                        .unwrap_or_default(),
                    headers,
                };

                debug!(
                    trigger = %handler.trigger(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Received Kafka record"
                );

                let consumer = consumer.clone();
                dispatch(&handler, inbound, move || async move {
                    consumer
                        .store_offset(message.topic(), message.partition(), message.offset() + 1)
                        .map_err(|e| BrokerError::Publish {
                            topic: message.topic().to_string(),
                            message: format!("store offset: {}", e),
                        })
                })
                .await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_enabled_by_ca_secret() {
        let mut settings = BrokerSettings::new(MessageQueueType::Kafka, "k1:9093,k2:9093");
        settings.secrets.insert(CA_CERT_KEY.into(), "CA".into());
        settings.secrets.insert(USER_CERT_KEY.into(), "CERT".into());
        settings.secrets.insert(USER_KEY_KEY.into(), "KEY".into());

        let config = base_config(&settings);
        assert_eq!(config.get("bootstrap.servers"), Some("k1:9093,k2:9093"));
        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(config.get("ssl.certificate.pem"), Some("CERT"));
    }

    #[test]
    fn test_plaintext_without_secrets() {
        let settings = BrokerSettings::new(MessageQueueType::Kafka, "k1:9092");
        assert_eq!(base_config(&settings).get("security.protocol"), None);
    }
}
