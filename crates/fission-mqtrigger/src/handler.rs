// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-message handling shared by every broker backend.
//!
//! For each message:
//!
//! 1. POST the payload to the function behind the router. Record headers
//!    are copied first (duplicates kept), then the trigger headers are set
//!    on top. From the first retry on, the attempt number is sent in
//!    `X-Fission-MQTrigger-RetryCount`.
//! 2. Up to `maxRetries + 1` attempts; any non-2xx status or transport
//!    error is retried.
//! 3. On success the response body (with the response headers) goes to the
//!    response topic, if any.
//! 4. On final failure the error text goes to the error topic with
//!    `MessageSource` and `RecycleCounter` headers, and cloud queues also
//!    get the payload in `<topic>-poison`.
//!
//! The backend acks the message after [`MessageHandler::handle`] returns,
//! whatever the outcome.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use fission_core::invoke::{
    HEADER_MQ_ERROR_TOPIC, HEADER_MQ_RESP_TOPIC, HEADER_MQ_RETRY_COUNT, HEADER_MQ_TOPIC,
    function_url,
};
use fission_core::types::{FunctionReferenceType, MessageQueueTrigger};
use fission_core::{Backoff, Error, ObjectKey};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info, warn};

use crate::broker::{InboundMessage, OutboundMessage, Producer};

/// Header naming the topic a failed message came from.
pub const HEADER_MESSAGE_SOURCE: &str = "MessageSource";
/// Header counting how often the same error text has been published.
pub const HEADER_RECYCLE_COUNTER: &str = "RecycleCounter";
/// Suffix of the queue receiving payloads of failed messages.
pub const POISON_SUFFIX: &str = "-poison";

/// What became of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The function answered with a 2xx status.
    Delivered {
        /// Status returned.
        status: u16,
    },
    /// Every attempt failed.
    Failed {
        /// Text of the last failure.
        error: String,
    },
}

impl Outcome {
    /// Whether the function accepted the message.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered { .. })
    }
}

struct FunctionResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

/// Invokes a trigger's function for each message and routes the result.
pub struct MessageHandler {
    trigger: ObjectKey,
    function_url: String,
    topic: String,
    response_topic: Option<String>,
    error_topic: Option<String>,
    content_type: String,
    sequential: bool,
    backoff: Backoff,
    http: reqwest::Client,
    producer: Arc<dyn Producer>,
    poison_queue: bool,
    recycle_counts: DashMap<String, u64>,
}

impl MessageHandler {
    /// Build the handler for `trigger`.
    ///
    /// Fails with `invalid-argument` if the trigger does not reference its
    /// function by name.
    pub fn new(
        trigger: &MessageQueueTrigger,
        router_url: &str,
        retry_delay: Duration,
        http: reqwest::Client,
        producer: Arc<dyn Producer>,
        poison_queue: bool,
    ) -> fission_core::Result<Self> {
        let spec = &trigger.spec;
        if spec.function_reference.reference_type != FunctionReferenceType::FunctionName {
            return Err(Error::InvalidArgument(format!(
                "trigger {} uses an unsupported function reference type {:?}",
                trigger.metadata.key(),
                spec.function_reference.reference_type
            )));
        }

        let url = function_url(
            router_url,
            &spec.function_reference.name,
            trigger.metadata.namespace_or_default(),
        );
        debug!(trigger = %trigger.metadata.key(), url = %url, "Function URL");

        Ok(Self {
            trigger: trigger.metadata.key(),
            function_url: url,
            topic: spec.topic.clone(),
            response_topic: spec.response_topic().map(str::to_string),
            error_topic: spec.error_topic().map(str::to_string),
            content_type: spec.content_type.clone(),
            sequential: spec.sequential,
            backoff: Backoff::new(spec.max_retries, retry_delay, 2.0),
            http,
            producer,
            poison_queue,
            recycle_counts: DashMap::new(),
        })
    }

    /// Trigger this handler serves.
    pub fn trigger(&self) -> &ObjectKey {
        &self.trigger
    }

    /// Whether messages must be handled one at a time, in order.
    pub fn sequential(&self) -> bool {
        self.sequential
    }

    /// URL the function is invoked at.
    pub fn function_url(&self) -> &str {
        &self.function_url
    }

    /// Source topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Invoke the function for `message` and publish the result.
    pub async fn handle(&self, message: InboundMessage) -> Outcome {
        let result = self
            .backoff
            .retry(|attempt| self.invoke(&message, attempt), |_| true)
            .await;

        match result {
            Ok(response) => {
                debug!(
                    trigger = %self.trigger,
                    status = response.status,
                    body_len = response.body.len(),
                    "Function invocation succeeded"
                );
                self.publish_response(response.headers, response.body).await;
                Outcome::Delivered {
                    status: response.status,
                }
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    trigger = %self.trigger,
                    url = %self.function_url,
                    attempts = self.backoff.max_attempts(),
                    error = %error,
                    "Function invocation failed, giving up on message"
                );
                self.publish_failure(&message, &error).await;
                Outcome::Failed { error }
            }
        }
    }

    async fn invoke(
        &self,
        message: &InboundMessage,
        attempt: u32,
    ) -> fission_core::Result<FunctionResponse> {
        let response = self
            .http
            .post(&self.function_url)
            .headers(self.request_headers(message, attempt))
            .body(message.payload.clone())
            .send()
            .await
            .inspect_err(|e| {
                warn!(trigger = %self.trigger, attempt, error = %e, "Function invocation request failed");
            })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        if !status.is_success() {
            warn!(trigger = %self.trigger, attempt, status = status.as_u16(), "Function returned an error status");
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(FunctionResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn request_headers(&self, message: &InboundMessage, attempt: u32) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &message.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(trigger = %self.trigger, header = %name, "Skipping record header that is not a valid HTTP header"),
            }
        }

        set_header(&mut headers, CONTENT_TYPE.as_str(), &self.content_type);
        set_header(&mut headers, HEADER_MQ_TOPIC, &self.topic);
        set_header(
            &mut headers,
            HEADER_MQ_RESP_TOPIC,
            self.response_topic.as_deref().unwrap_or_default(),
        );
        set_header(
            &mut headers,
            HEADER_MQ_ERROR_TOPIC,
            self.error_topic.as_deref().unwrap_or_default(),
        );
        if attempt > 0 {
            set_header(&mut headers, HEADER_MQ_RETRY_COUNT, &attempt.to_string());
        }
        headers
    }

    async fn publish_response(&self, headers: Vec<(String, String)>, body: Bytes) {
        let Some(topic) = &self.response_topic else {
            return;
        };
        let message = OutboundMessage {
            topic: topic.clone(),
            payload: body,
            headers,
        };
        match self.producer.publish(message).await {
            Ok(()) => debug!(trigger = %self.trigger, topic = %topic, "Published response"),
            Err(e) => {
                warn!(trigger = %self.trigger, topic = %topic, error = %e, "Failed to publish function response")
            }
        }
    }

    async fn publish_failure(&self, message: &InboundMessage, error: &str) {
        if let Some(topic) = &self.error_topic {
            let count = {
                let mut entry = self.recycle_counts.entry(error.to_string()).or_insert(0);
                *entry += 1;
                *entry
            };
            let out = OutboundMessage {
                topic: topic.clone(),
                payload: Bytes::from(error.to_string()),
                headers: vec![
                    (HEADER_MESSAGE_SOURCE.to_string(), self.topic.clone()),
                    (HEADER_RECYCLE_COUNTER.to_string(), count.to_string()),
                ],
            };
            match self.producer.publish(out).await {
                Ok(()) => info!(trigger = %self.trigger, topic = %topic, recycle_counter = count, "Published error"),
                Err(e) => {
                    warn!(trigger = %self.trigger, topic = %topic, error = %e, "Failed to publish error")
                }
            }
        } else if self.response_topic.is_none() {
            info!(trigger = %self.trigger, "No response or error topic, dropping failed message");
        }

        if self.poison_queue {
            let topic = format!("{}{}", self.topic, POISON_SUFFIX);
            let out = OutboundMessage {
                topic: topic.clone(),
                payload: message.payload.clone(),
                headers: message.headers.clone(),
            };
            if let Err(e) = self.producer.publish(out).await {
                warn!(trigger = %self.trigger, topic = %topic, error = %e, "Failed to publish to poison queue");
            }
        }
    }
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => debug!(header = %name, "Skipping header with an invalid value"),
    }
}
