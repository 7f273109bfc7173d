// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure storage queue backend against a mocked queue service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FUNCTION_PATH, eventually, mq_trigger, start_manager};
use fission_core::types::MessageQueueType;
use fission_mqtrigger::broker::azure::{AzureCredentials, AzureQueueBroker, AzureQueueConfig};
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const ONE_MESSAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<QueueMessagesList>
  <QueueMessage>
    <MessageId>msg-1</MessageId>
    <PopReceipt>receipt+1</PopReceipt>
    <DequeueCount>1</DequeueCount>
    <MessageText>aW5wdXQ=</MessageText>
  </QueueMessage>
</QueueMessagesList>"#;

const EMPTY_BATCH: &str = "<QueueMessagesList />";

fn broker(queue_service: &MockServer) -> AzureQueueBroker {
    let credentials = AzureCredentials::new("acct", "bm90IGEga2V5", &queue_service.uri()).unwrap();
    AzureQueueBroker::with_config(
        credentials,
        AzureQueueConfig {
            empty_poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(2),
            ..AzureQueueConfig::default()
        },
    )
    .unwrap()
}

async fn mount_queue(server: &MockServer, queue: &str) {
    Mock::given(method("PUT"))
        .and(path(format!("/{}", queue)))
        .and(header_exists("authorization"))
        .and(header_exists("x-ms-date"))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
}

fn azure_trigger() -> fission_core::types::MessageQueueTrigger {
    let mut trigger = mq_trigger("azure", "inputqueue");
    trigger.spec.message_queue_type = MessageQueueType::AzureStorageQueue;
    trigger
}

fn requests_matching<'a>(requests: &'a [Request], verb: &str, prefix: &str) -> Vec<&'a Request> {
    requests
        .iter()
        .filter(|r| r.method.as_str() == verb && r.url.path().starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn test_failed_message_deleted_and_poisoned() {
    let queue_service = MockServer::start().await;
    mount_queue(&queue_service, "inputqueue").await;
    mount_queue(&queue_service, "inputqueue-poison").await;
    Mock::given(method("GET"))
        .and(path("/inputqueue/messages"))
        .and(query_param("numofmessages", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONE_MESSAGE))
        .up_to_n_times(1)
        .mount(&queue_service)
        .await;
    Mock::given(method("GET"))
        .and(path("/inputqueue/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH))
        .mount(&queue_service)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/inputqueue/messages/msg-1"))
        .and(query_param("popreceipt", "receipt+1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&queue_service)
        .await;
    Mock::given(method("POST"))
        .and(path("/inputqueue-poison/messages"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&queue_service)
        .await;

    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&router)
        .await;

    let (manager, _failures) = start_manager(Arc::new(broker(&queue_service)), &router);
    let mut trigger = azure_trigger();
    trigger.spec.max_retries = 1;
    manager.add(trigger).await.unwrap();

    eventually("message deleted", || async {
        let requests = queue_service.received_requests().await.unwrap_or_default();
        !requests_matching(&requests, "DELETE", "/inputqueue/messages/msg-1").is_empty()
    })
    .await;
    manager.shutdown().await.unwrap();

    let invocations = router.received_requests().await.unwrap();
    assert_eq!(invocations.len(), 2);
    assert_eq!(&invocations[0].body[..], b"input");

    let requests = queue_service.received_requests().await.unwrap();
    let poisoned = requests_matching(&requests, "POST", "/inputqueue-poison/messages");
    assert_eq!(poisoned.len(), 1);
    let body = String::from_utf8_lossy(&poisoned[0].body);
    assert!(body.contains("<MessageText>aW5wdXQ=</MessageText>"));
    assert!(
        poisoned[0]
            .headers
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("SharedKeyLite acct:")
    );
}

#[tokio::test]
async fn test_unreachable_queue_service_fails_subscribe() {
    let router = MockServer::start().await;
    let queue_service = MockServer::start().await;
    let broker = broker(&queue_service);
    drop(queue_service);

    let (manager, _failures) = start_manager(Arc::new(broker), &router);
    assert!(manager.add(azure_trigger()).await.is_err());
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_next_batch_waits_for_handlers() {
    let queue_service = MockServer::start().await;
    mount_queue(&queue_service, "inputqueue").await;
    Mock::given(method("GET"))
        .and(path("/inputqueue/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ONE_MESSAGE))
        .up_to_n_times(1)
        .mount(&queue_service)
        .await;
    Mock::given(method("GET"))
        .and(path("/inputqueue/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH))
        .mount(&queue_service)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/inputqueue/messages/msg-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&queue_service)
        .await;

    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&router)
        .await;

    let (manager, _failures) = start_manager(Arc::new(broker(&queue_service)), &router);
    manager.add(azure_trigger()).await.unwrap();

    eventually("poll after the delete", || async {
        let requests = queue_service.received_requests().await.unwrap_or_default();
        requests_matching(&requests, "GET", "/inputqueue/messages").len() >= 2
    })
    .await;
    manager.shutdown().await.unwrap();

    let requests = queue_service.received_requests().await.unwrap();
    let position = |verb: &str, nth: usize| {
        requests
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.method.as_str() == verb && r.url.path().starts_with("/inputqueue/messages")
            })
            .nth(nth)
            .map(|(i, _)| i)
            .unwrap()
    };
    // The message is deleted before the queue is polled again.
    assert!(position("DELETE", 0) < position("GET", 1));
    assert_eq!(router.received_requests().await.unwrap().len(), 1);
}

/// Keeps paused time moving in small steps so requests to the mock servers
/// complete long before any client timeout comes due.
fn tick_paused_clock() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {
        loop {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

async fn message_polls(server: &MockServer) -> usize {
    let requests = server.received_requests().await.unwrap_or_default();
    requests_matching(&requests, "GET", "/inputqueue/messages").len()
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_sleeps_a_minute_by_default() {
    let queue_service = MockServer::start().await;
    mount_queue(&queue_service, "inputqueue").await;
    Mock::given(method("GET"))
        .and(path("/inputqueue/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_BATCH))
        .mount(&queue_service)
        .await;
    let router = MockServer::start().await;
    let ticker = tick_paused_clock();

    let credentials = AzureCredentials::new("acct", "bm90IGEga2V5", &queue_service.uri()).unwrap();
    let broker = AzureQueueBroker::with_config(credentials, AzureQueueConfig::default()).unwrap();
    let (manager, _failures) = start_manager(Arc::new(broker), &router);
    manager.add(azure_trigger()).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while message_polls(&queue_service).await == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no first poll");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let first_poll = tokio::time::Instant::now();

    tokio::time::sleep_until(first_poll + Duration::from_secs(59)).await;
    assert_eq!(message_polls(&queue_service).await, 1);

    while message_polls(&queue_service).await < 2 {
        assert!(
            first_poll.elapsed() < Duration::from_secs(100),
            "no second poll"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(message_polls(&queue_service).await, 2);

    manager.shutdown().await.unwrap();
    ticker.abort();
}
