// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for kubewatcher integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fission_core::publisher::{PublisherConfig, WebhookPublisher};
use fission_core::types::{FunctionReference, KubernetesWatchTrigger, KubernetesWatchTriggerSpec, Metadata};
use fission_kubewatcher::source::MockWatchSource;
use fission_kubewatcher::subscription::SubscriptionConfig;
use fission_kubewatcher::watcher::{KubeWatcher, WatchFailure, WatchSubscriber};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the router serves `hello` in the default namespace under.
pub const FUNCTION_PATH: &str = "/fission-function/hello";

/// A trigger watching pods in `default` and invoking `hello`.
pub fn watch_trigger(name: &str) -> KubernetesWatchTrigger {
    KubernetesWatchTrigger {
        metadata: Metadata::new("default", name),
        spec: KubernetesWatchTriggerSpec {
            namespace: "default".to_string(),
            object_type: "pod".to_string(),
            label_selector: Default::default(),
            field_selector: None,
            functionref: FunctionReference::by_name("hello"),
        },
    }
}

/// A pod object at resource version `rv`.
pub fn pod(name: &str, rv: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": "default", "resourceVersion": rv},
        "status": {"phase": "Running"}
    })
}

/// Restarts fast enough for tests.
pub fn fast_subscription() -> SubscriptionConfig {
    SubscriptionConfig {
        restart_attempts: 3,
        restart_interval: Duration::from_millis(5),
        error_backoff: Duration::from_millis(10),
    }
}

/// A router answering every POST with 200.
pub async fn ok_router() -> MockServer {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&router)
        .await;
    router
}

/// Watcher over `source` posting to `router`.
pub fn start_watcher(
    source: Arc<MockWatchSource>,
    router: &MockServer,
) -> (KubeWatcher, mpsc::Receiver<WatchFailure>) {
    let publisher = WebhookPublisher::start(PublisherConfig {
        max_retries: 0,
        initial_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
    })
    .expect("publisher");
    let (tx, rx) = mpsc::channel(8);
    let subscriber = WatchSubscriber::new(
        source,
        Arc::new(publisher),
        router.uri(),
        fast_subscription(),
        tx,
    );
    (KubeWatcher::start(Arc::new(subscriber)), rx)
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
