// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for mqtrigger integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fission_core::types::{
    FunctionReference, MessageQueueTrigger, MessageQueueTriggerSpec, MessageQueueType, Metadata,
    MqtKind,
};
use fission_mqtrigger::broker::MessageQueue;
use fission_mqtrigger::manager::{HandlerSettings, MqtManager, QueueSubscriber, SubscriptionFailure};
use tokio::sync::mpsc;
use wiremock::MockServer;

/// Path the router serves `process` in the default namespace under.
pub const FUNCTION_PATH: &str = "/fission-function/process";

/// A memory trigger on `topic` invoking `process`.
pub fn mq_trigger(name: &str, topic: &str) -> MessageQueueTrigger {
    MessageQueueTrigger {
        metadata: Metadata::new("default", name),
        spec: MessageQueueTriggerSpec {
            function_reference: FunctionReference::by_name("process"),
            message_queue_type: MessageQueueType::Memory,
            topic: topic.to_string(),
            resp_topic: None,
            error_topic: None,
            max_retries: 0,
            content_type: "application/json".to_string(),
            polling_interval: None,
            cooldown_period: None,
            min_replica_count: None,
            max_replica_count: None,
            metadata: BTreeMap::new(),
            secret: None,
            mqtkind: MqtKind::Fission,
            sequential: false,
        },
    }
}

/// Manager over `broker` routing invocations to `router`.
pub fn start_manager(
    broker: Arc<dyn MessageQueue>,
    router: &MockServer,
) -> (MqtManager, mpsc::Receiver<SubscriptionFailure>) {
    let (tx, rx) = mpsc::channel(8);
    let subscriber = QueueSubscriber::new(
        broker,
        HandlerSettings {
            router_url: router.uri(),
            retry_delay: Duration::from_millis(5),
        },
        tx,
    )
    .expect("http client");
    (MqtManager::start(Arc::new(subscriber)), rx)
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Number of requests `server` has received.
pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|r| r.len())
        .unwrap_or_default()
}
