// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One watch per trigger.
//!
//! A subscription keeps the resource version of the last event it
//! forwarded. When the server closes the stream (the 120 s watch timeout)
//! the watch is reopened from that version. An error event means the
//! version can no longer be trusted (typically "too old resource version"),
//! so it is reset to `""`, and the watch reopens after a short pause with
//! the current objects replayed. Reopening is retried a bounded number of
//! times before the subscription gives up with a fatal error.

use std::sync::Arc;
use std::time::Duration;

use fission_core::invoke::{HEADER_KUBE_EVENT_TYPE, HEADER_KUBE_OBJECT_TYPE, function_url};
use fission_core::publisher::{PublishRequest, Publisher};
use fission_core::types::{FunctionReferenceType, KubernetesWatchTrigger};
use fission_core::{Error, ErrorKind, ObjectKey, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::{EventType, WatchEvent, WatchSource, WatchTarget, resource_version};

/// Restart behaviour of a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Attempts to (re)open a watch before giving up.
    pub restart_attempts: u32,
    /// Pause between failed attempts.
    pub restart_interval: Duration,
    /// Pause after an error event before reopening.
    pub error_backoff: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            restart_attempts: 60,
            restart_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// A running watch subscription.
pub struct WatchSubscription {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl WatchSubscription {
    /// Open the first watch for `trigger` and start forwarding its events.
    ///
    /// Fails if the trigger's object type cannot be watched or the first
    /// watch cannot be opened within the restart budget.
    pub async fn start(
        trigger: &KubernetesWatchTrigger,
        source: Arc<dyn WatchSource>,
        publisher: Arc<dyn Publisher>,
        router_url: &str,
        config: SubscriptionConfig,
    ) -> Result<Self> {
        let target = WatchTarget::for_trigger(trigger)?;
        let function_url = match trigger.spec.functionref.reference_type {
            FunctionReferenceType::FunctionName => Some(function_url(
                router_url,
                &trigger.spec.functionref.name,
                trigger.metadata.namespace_or_default(),
            )),
            _ => None,
        };

        let cancel = CancellationToken::new();
        let mut watch = WatchLoop {
            trigger: trigger.metadata.key(),
            target,
            function_url,
            source,
            publisher,
            config,
            last_resource_version: String::new(),
        };
        let Some(stream) = watch.open(&cancel).await? else {
            return Err(Error::Transient("subscription cancelled while starting".into()));
        };

        let task = tokio::spawn(watch.run(stream, cancel.clone()));
        Ok(Self { cancel, task })
    }

    /// Ask the subscription to stop; it does so before its next event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription was asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that stops the subscription when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the forwarding task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the forwarding task to end.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Fatal(format!("watch task panicked: {}", e))),
        }
    }
}

struct WatchLoop {
    trigger: ObjectKey,
    target: WatchTarget,
    function_url: Option<String>,
    source: Arc<dyn WatchSource>,
    publisher: Arc<dyn Publisher>,
    config: SubscriptionConfig,
    last_resource_version: String,
}

impl WatchLoop {
    /// Open a watch at the last resource version. `Ok(None)` means cancelled.
    async fn open(&self, cancel: &CancellationToken) -> Result<Option<BoxStream<'static, WatchEvent>>> {
        let attempts = self.config.restart_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            info!(
                trigger = %self.trigger,
                kind = self.target.kind,
                namespace = %self.target.namespace,
                resource_version = %self.last_resource_version,
                attempt,
                "(Re)starting watch"
            );
            match self.source.watch(&self.target, &self.last_resource_version).await {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) if e.kind() == ErrorKind::InvalidArgument => return Err(e.into()),
                Err(e) => {
                    warn!(trigger = %self.trigger, attempt, error = %e, "Failed to open watch");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.config.restart_interval) => {}
                }
            }
        }

        Err(Error::Fatal(format!(
            "failed to restart watch for {} after {} attempts: {}",
            self.trigger,
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn run(mut self, mut stream: BoxStream<'static, WatchEvent>, cancel: CancellationToken) -> Result<()> {
        info!(trigger = %self.trigger, kind = self.target.kind, "Listening to watch");

        loop {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    event = stream.next() => event,
                };

                match event {
                    None => {
                        debug!(trigger = %self.trigger, "Watch stream ended");
                        break;
                    }
                    Some(WatchEvent::Error(message)) => {
                        warn!(trigger = %self.trigger, error = %message, "Watch error, restarting from the current state");
                        self.last_resource_version.clear();
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(self.config.error_backoff) => {}
                        }
                        break;
                    }
                    Some(WatchEvent::Object { event_type, object }) => {
                        self.forward(event_type, object).await;
                    }
                }
            }

            if cancel.is_cancelled() {
                return Ok(());
            }
            stream = match self.open(&cancel).await? {
                Some(stream) => stream,
                None => return Ok(()),
            };
        }
    }

    async fn forward(&mut self, event_type: EventType, object: Value) {
        match &self.function_url {
            Some(url) => match serde_json::to_vec_pretty(&object) {
                Ok(body) => {
                    let kind = object
                        .get("kind")
                        .and_then(Value::as_str)
                        .unwrap_or(self.target.kind);
                    let request = PublishRequest::new(url.clone(), body)
                        .with_header("Content-Type", "application/json")
                        .with_header(HEADER_KUBE_EVENT_TYPE, event_type.as_str())
                        .with_header(HEADER_KUBE_OBJECT_TYPE, kind);
                    if let Err(e) = self.publisher.publish(request).await {
                        warn!(trigger = %self.trigger, error = %e, "Failed to queue watch event");
                    }
                }
                Err(e) => warn!(trigger = %self.trigger, error = %e, "Failed to serialize watch event"),
            },
            None => warn!(
                trigger = %self.trigger,
                "Unsupported function reference type, dropping watch event"
            ),
        }

        if let Some(rv) = resource_version(&object) {
            debug!(trigger = %self.trigger, event_type = %event_type, resource_version = rv, "Watch event forwarded");
            self.last_resource_version = rv.to_string();
        }
    }
}
