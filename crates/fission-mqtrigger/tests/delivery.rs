// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message delivery through the memory broker: retries, response and error
//! topics, poison queue, ordering.

mod common;

use std::sync::Arc;

use common::{FUNCTION_PATH, eventually, mq_trigger, request_count, start_manager};
use fission_core::invoke::{HEADER_MQ_ERROR_TOPIC, HEADER_MQ_RETRY_COUNT, HEADER_MQ_TOPIC};
use fission_mqtrigger::broker::InboundMessage;
use fission_mqtrigger::broker::memory::MemoryBroker;
use fission_mqtrigger::handler::{HEADER_MESSAGE_SOURCE, HEADER_RECYCLE_COUNTER};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_failed_message_retried_then_published_to_error_topic() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&router)
        .await;

    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    let mut trigger = mq_trigger("orders", "orders");
    trigger.spec.max_retries = 2;
    trigger.spec.error_topic = Some("orders-errors".into());
    manager.add(trigger).await.unwrap();

    broker.send("orders", InboundMessage::from("{\"id\":1}"));

    eventually("message acked", || async { broker.acked("orders") == 1 }).await;
    assert_eq!(request_count(&router).await, 3);

    let errors = broker.messages("orders-errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].header(HEADER_MESSAGE_SOURCE), Some("orders"));
    assert_eq!(errors[0].header(HEADER_RECYCLE_COUNTER), Some("1"));
    assert!(String::from_utf8_lossy(&errors[0].payload).contains("boom"));

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recycle_counter_grows_for_repeated_error() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&router)
        .await;

    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    let mut trigger = mq_trigger("orders", "orders");
    trigger.spec.error_topic = Some("orders-errors".into());
    trigger.spec.sequential = true;
    manager.add(trigger).await.unwrap();

    broker.send("orders", "a".into());
    broker.send("orders", "b".into());

    eventually("both acked", || async { broker.acked("orders") == 2 }).await;
    let counters: Vec<_> = broker
        .messages("orders-errors")
        .iter()
        .map(|m| m.header(HEADER_RECYCLE_COUNTER).map(str::to_string))
        .collect();
    assert_eq!(counters, vec![Some("1".to_string()), Some("2".to_string())]);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_count_header_sent_from_first_retry() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&router)
        .await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&router)
        .await;

    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    let mut trigger = mq_trigger("orders", "orders");
    trigger.spec.max_retries = 3;
    trigger.spec.error_topic = Some("orders-errors".into());
    manager.add(trigger).await.unwrap();

    broker.send("orders", "payload".into());
    eventually("message acked", || async { broker.acked("orders") == 1 }).await;

    let requests = router.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let retry_counts: Vec<_> = requests
        .iter()
        .map(|r| {
            r.headers
                .get(HEADER_MQ_RETRY_COUNT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect();
    assert_eq!(
        retry_counts,
        vec![None, Some("1".to_string()), Some("2".to_string())]
    );
    assert_eq!(requests[0].headers.get(HEADER_MQ_TOPIC).unwrap(), "orders");
    assert_eq!(
        requests[0].headers.get(HEADER_MQ_ERROR_TOPIC).unwrap(),
        "orders-errors"
    );
    assert!(broker.messages("orders-errors").is_empty());

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_response_published_with_function_headers() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Result", "ok")
                .set_body_string("done"),
        )
        .mount(&router)
        .await;

    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    let mut trigger = mq_trigger("orders", "orders");
    trigger.spec.resp_topic = Some("results".into());
    manager.add(trigger).await.unwrap();

    broker.send(
        "orders",
        InboundMessage::new("in").with_header("X-Trace", "abc"),
    );

    eventually("response published", || async {
        broker.messages("results").len() == 1
    })
    .await;
    let response = &broker.messages("results")[0];
    assert_eq!(&response.payload[..], b"done");
    assert_eq!(response.header("x-result"), Some("ok"));

    let requests = router.received_requests().await.unwrap();
    assert_eq!(requests[0].headers.get("x-trace").unwrap(), "abc");
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/json"
    );

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failure_without_topics_is_acked_and_dropped() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&router)
        .await;

    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);
    manager.add(mq_trigger("orders", "orders")).await.unwrap();

    broker.send("orders", "x".into());

    eventually("message acked", || async { broker.acked("orders") == 1 }).await;
    assert_eq!(request_count(&router).await, 1);
    assert!(broker.messages("orders-poison").is_empty());

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cloud_queue_failure_goes_to_poison_queue() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&router)
        .await;

    let broker = MemoryBroker::new().with_poison_queue();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);
    manager.add(mq_trigger("orders", "orders")).await.unwrap();

    broker.send("orders", InboundMessage::new("bad").with_header("k", "v"));

    eventually("poisoned", || async {
        broker.messages("orders-poison").len() == 1
    })
    .await;
    let poisoned = &broker.messages("orders-poison")[0];
    assert_eq!(&poisoned.payload[..], b"bad");
    assert_eq!(poisoned.header("k"), Some("v"));

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sequential_trigger_preserves_order() {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FUNCTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(10)))
        .mount(&router)
        .await;

    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    let mut trigger = mq_trigger("orders", "orders");
    trigger.spec.sequential = true;
    manager.add(trigger).await.unwrap();

    for i in 0..5 {
        broker.send("orders", InboundMessage::new(i.to_string()));
    }

    eventually("all acked", || async { broker.acked("orders") == 5 }).await;
    let bodies: Vec<_> = router
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect();
    assert_eq!(bodies, vec!["0", "1", "2", "3", "4"]);

    manager.shutdown().await.unwrap();
}
