// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NATS backend.
//!
//! Each trigger gets a durable JetStream pull consumer named after the
//! trigger UID, so a restarted runtime resumes where the previous one
//! stopped. Acks are explicit and sent after the handler returns. The client
//! reconnects on its own; once it gives up, every consumer of this backend
//! exits with a lost connection.

use std::sync::Arc;

use async_nats::jetstream::{self, consumer::pull, stream};
use async_trait::async_trait;
use fission_core::types::{MessageQueueTrigger, MessageQueueType};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{
    BrokerSettings, ConsumerTask, InboundMessage, MessageQueue, OutboundMessage, Producer,
    dispatch,
};
use crate::error::{BrokerError, Result};
use crate::handler::MessageHandler;

/// Secret holding a NATS credentials file.
pub const CREDENTIALS_KEY: &str = "credentials";
/// Secret holding a user name (used with [`PASSWORD_KEY`]).
pub const USERNAME_KEY: &str = "username";
/// Secret holding a password.
pub const PASSWORD_KEY: &str = "password";
/// Secret holding an auth token.
pub const TOKEN_KEY: &str = "token";

const MAX_RECONNECTS: usize = 60;

/// NATS JetStream backend.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    lost: CancellationToken,
}

impl NatsBroker {
    /// Connect to `settings.url`, authenticating with whatever the secrets
    /// provide (credentials file, user and password, or token).
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let mut options = match (
            settings.secret(CREDENTIALS_KEY),
            settings.secret(USERNAME_KEY),
            settings.secret(TOKEN_KEY),
        ) {
            (Some(creds), _, _) => async_nats::ConnectOptions::with_credentials(creds)
                .map_err(|e| BrokerError::Config(format!("invalid NATS credentials: {}", e)))?,
            (None, Some(user), _) => async_nats::ConnectOptions::with_user_and_password(
                user.to_string(),
                settings.secret(PASSWORD_KEY).unwrap_or_default().to_string(),
            ),
            (None, None, Some(token)) => async_nats::ConnectOptions::with_token(token.to_string()),
            (None, None, None) => async_nats::ConnectOptions::new(),
        };

        let lost = CancellationToken::new();
        let on_event = lost.clone();
        options = options
            .name("fission-mqtrigger")
            .max_reconnects(MAX_RECONNECTS)
            .event_callback(move |event| {
                let lost = on_event.clone();
                async move {
                    match event {
                        async_nats::Event::Disconnected => warn!("NATS connection lost, reconnecting"),
                        async_nats::Event::Connected => info!("NATS connected"),
                        async_nats::Event::Closed => {
                            error!("NATS connection closed");
                            lost.cancel();
                        }
                        other => debug!(event = %other, "NATS event"),
                    }
                }
            });

        let client = options
            .connect(settings.url.as_str())
            .await
            .map_err(|e| BrokerError::Connect(format!("{}: {}", settings.url, e)))?;
        info!(url = %settings.url, "Connected to NATS");

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            lost,
        })
    }

    async fn stream_for(&self, topic: &str) -> Result<stream::Stream> {
        if let Ok(name) = self.jetstream.stream_by_subject(topic).await {
            return self
                .jetstream
                .get_stream(name)
                .await
                .map_err(|e| BrokerError::Connect(e.to_string()));
        }
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: stream_name(topic),
                subjects: vec![topic.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Connect(format!("create stream for {}: {}", topic, e)))
    }
}

/// Stream name for a subject: names cannot contain `.`, `*` or `>`.
fn stream_name(subject: &str) -> String {
    subject
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl Producer for NatsBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        for (k, v) in &message.headers {
            headers.append(k.as_str(), v.as_str());
        }
        self.client
            .publish_with_headers(message.topic.clone(), headers, message.payload)
            .await
            .map_err(|e| BrokerError::Publish {
                topic: message.topic,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl MessageQueue for NatsBroker {
    fn queue_type(&self) -> MessageQueueType {
        MessageQueueType::Nats
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
        let durable = trigger.metadata.uid.clone();
        if durable.is_empty() {
            return Err(BrokerError::Config(format!(
                "trigger {} has no UID to name its durable consumer",
                trigger.metadata.key()
            )));
        }

        let stream = self.stream_for(&topic).await?;
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: topic.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Connect(format!("consumer {}: {}", durable, e)))?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Connect(format!("consumer {}: {}", durable, e)))?;

        let lost = self.lost.clone();
        Ok(tokio::spawn(async move {
            info!(trigger = %handler.trigger(), subject = %topic, durable = %durable, "Consuming NATS subject");
            loop {
                let next = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return Ok(()),
                    _ = lost.cancelled() => {
                        return Err(BrokerError::ConnectionLost("NATS connection closed".into()));
                    }

                    next = messages.next() => next,
                };

                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) if e.kind() == pull::MessagesErrorKind::MissingHeartbeat => {
                        warn!(trigger = %handler.trigger(), error = %e, "NATS consumer missed a heartbeat");
                        continue;
                    }
                    Some(Err(e)) => return Err(BrokerError::ConnectionLost(e.to_string())),
                    None => {
                        return Err(BrokerError::ConnectionLost(format!(
                            "NATS consumer {} ended",
                            durable
                        )));
                    }
                };

                let headers = message
                    .headers
                    .as_ref()
                    .map(|headers| {
                        headers
                            .iter()
                            .flat_map(|(name, values)| {
                                values.iter().map(move |v| (name.to_string(), v.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let inbound = InboundMessage {
                    payload: message.payload.clone(),
                    headers,
                };

                dispatch(&handler, inbound, move || async move {
                    message
                        .ack()
                        .await
                        .map_err(|e| BrokerError::Publish {
                            topic: "ack".to_string(),
                            message: e.to_string(),
                        })
                })
                .await;
            }
        }))
    }
}
