// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook publisher.
//!
//! Fire-and-forget HTTP POST delivery used by the timer and kube-watch
//! runtimes. Requests go through a bounded queue to a single delivery task
//! that sends them one at a time, in queue order: a slow target holds up
//! every request queued behind it, for up to the request timeout.
//!
//! Only `200 OK` counts as delivered; anything else (including network errors)
//! is retried with exponential backoff. The backoff wait runs on its own timer
//! task, which puts the request back at the end of the queue, so waiting for
//! a retry does not block other requests. Requests that exhaust their retries
//! are dropped with a warning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{Error, Result};

/// Capacity of the request queue.
pub const REQUEST_QUEUE_CAPACITY: usize = 32;

/// A single outbound webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Absolute target URL.
    pub url: String,
    /// Request body.
    pub body: Vec<u8>,
    /// Headers, sent in order.
    pub headers: Vec<(String, String)>,
}

impl PublishRequest {
    /// POST `body` to `url` with no extra headers.
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Something that accepts webhook deliveries.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Queue a request for delivery.
    ///
    /// Returns once the request is queued, not once it is delivered.
    async fn publish(&self, request: PublishRequest) -> Result<()>;
}

/// Configuration for [`WebhookPublisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles afterwards.
    pub initial_delay: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Envelope {
    request: PublishRequest,
    retries: u32,
}

/// Bounded-queue webhook publisher with rescheduled retries.
#[derive(Clone)]
pub struct WebhookPublisher {
    tx: mpsc::Sender<Envelope>,
    shutdown: Arc<Notify>,
}

impl WebhookPublisher {
    /// Spawn the delivery task and return a handle to it.
    ///
    /// The task stops once every handle is dropped or [`Self::shutdown`] is
    /// called.
    pub fn start(config: PublisherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let shutdown = Arc::new(Notify::new());

        let worker = DeliveryWorker {
            client,
            backoff: Backoff::new(config.max_retries, config.initial_delay, 2.0),
            requeue: tx.downgrade(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(worker.run(rx));

        Ok(Self { tx, shutdown })
    }

    /// Stop the delivery task. Queued and rescheduled requests are dropped.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<()> {
        self.tx
            .send(Envelope {
                request,
                retries: 0,
            })
            .await
            .map_err(|_| Error::Transient("webhook publisher stopped".to_string()))
    }
}

struct DeliveryWorker {
    client: reqwest::Client,
    backoff: Backoff,
    requeue: mpsc::WeakSender<Envelope>,
    shutdown: Arc<Notify>,
}

impl DeliveryWorker {
    async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        info!(max_retries = self.backoff.max_retries, "Webhook publisher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Webhook publisher received shutdown signal");
                    break;
                }

                envelope = rx.recv() => match envelope {
                    Some(envelope) => self.deliver(envelope).await,
                    None => break,
                },
            }
        }

        info!("Webhook publisher stopped");
    }

    async fn deliver(&self, envelope: Envelope) {
        let Envelope { request, retries } = envelope;

        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let failure = match builder.send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                debug!(url = %request.url, retries, "Webhook delivered");
                return;
            }
            Ok(resp) => format!("status {}", resp.status()),
            Err(e) => e.to_string(),
        };

        if retries >= self.backoff.max_retries {
            warn!(
                url = %request.url,
                attempts = retries + 1,
                error = %failure,
                "Webhook retries exhausted, dropping request"
            );
            return;
        }

        let next = retries + 1;
        let delay = self.backoff.delay_for_retry(next);
        debug!(url = %request.url, retry = next, delay_ms = delay.as_millis() as u64, error = %failure, "Rescheduling webhook");

        let requeue = self.requeue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(tx) = requeue.upgrade() else {
                warn!(url = %request.url, "Webhook publisher stopped before retry");
                return;
            };
            if tx
                .send(Envelope {
                    request,
                    retries: next,
                })
                .await
                .is_err()
            {
                warn!("Webhook publisher stopped before retry");
            }
        });
    }
}
