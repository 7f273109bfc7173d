// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscription lifecycle: manager operations, reconciliation against the
//! resource store, and lost broker connections.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, mq_trigger, start_manager};
use fission_core::store::InMemoryResourceStore;
use fission_core::types::{MessageQueueType, MqtKind};
use fission_core::{ErrorKind, ObjectKey};
use fission_mqtrigger::broker::memory::MemoryBroker;
use fission_mqtrigger::runtime::MqTriggerRuntime;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn ok_router() -> MockServer {
    let router = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&router)
        .await;
    router
}

#[tokio::test]
async fn test_add_twice_is_already_exists() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    manager.add(mq_trigger("a", "orders")).await.unwrap();
    let err = manager.add(mq_trigger("a", "orders")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(broker.subscriber_count("orders"), 1);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_moves_consumer_to_new_topic() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker.clone()), &router);

    manager.add(mq_trigger("a", "orders")).await.unwrap();
    manager.update(mq_trigger("a", "invoices")).await.unwrap();

    let key = ObjectKey::new("default", "a");
    assert_eq!(manager.get(&key).await.unwrap().unwrap().spec.topic, "invoices");
    assert_eq!(broker.subscriber_count("invoices"), 1);
    eventually("old consumer gone", || async {
        broker.subscriber_count("orders") == 0
    })
    .await;

    broker.send("invoices", "x".into());
    eventually("new topic consumed", || async { broker.acked("invoices") == 1 }).await;

    assert!(manager.remove(&key).await.unwrap());
    assert!(!manager.remove(&key).await.unwrap());
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_topic_is_rejected() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let (manager, _failures) = start_manager(Arc::new(broker), &router);

    let err = manager.add(mq_trigger("a", "")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let mut other_broker = mq_trigger("b", "orders");
    other_broker.spec.message_queue_type = MessageQueueType::Kafka;
    let err = manager.add(other_broker).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lost_connection_is_reported_as_fatal() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let (manager, mut failures) = start_manager(Arc::new(broker.clone()), &router);
    manager.add(mq_trigger("a", "orders")).await.unwrap();

    broker.disconnect();

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
        .await
        .expect("failure reported")
        .expect("channel open");
    assert_eq!(failure.trigger, ObjectKey::new("default", "a"));
    assert_eq!(failure.error.kind(), ErrorKind::Fatal);
}

#[tokio::test]
async fn test_unsubscribe_is_not_a_failure() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let (manager, mut failures) = start_manager(Arc::new(broker), &router);
    manager.add(mq_trigger("a", "orders")).await.unwrap();

    manager.remove(&ObjectKey::new("default", "a")).await.unwrap();

    let reported = tokio::time::timeout(Duration::from_millis(200), failures.recv()).await;
    assert!(reported.is_err());
}

#[tokio::test]
async fn test_runtime_follows_store() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let store = Arc::new(InMemoryResourceStore::new());

    let mut keda = mq_trigger("scaled", "scaled");
    keda.spec.mqtkind = MqtKind::Keda;
    store.upsert_message_queue_trigger(keda).await;
    let mut kafka = mq_trigger("kafka", "kafka-topic");
    kafka.spec.message_queue_type = MessageQueueType::Kafka;
    store.upsert_message_queue_trigger(kafka).await;
    store
        .upsert_message_queue_trigger(mq_trigger("orders", "orders"))
        .await;

    let runtime = MqTriggerRuntime::builder()
        .resources(store.clone())
        .broker(Arc::new(broker.clone()))
        .router_url(router.uri())
        .resync_interval(Duration::from_millis(50))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    eventually("orders subscribed", || async {
        broker.subscriber_count("orders") == 1
    })
    .await;
    let keys: Vec<_> = runtime
        .manager()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![ObjectKey::new("default", "orders")]);

    broker.send("orders", "hello".into());
    eventually("delivered", || async { broker.acked("orders") == 1 }).await;

    store
        .delete_message_queue_trigger(&ObjectKey::new("default", "orders"))
        .await;
    eventually("orders unsubscribed", || async {
        broker.subscriber_count("orders") == 0
    })
    .await;

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_keeps_subscriptions_while_store_unreachable() {
    let router = ok_router().await;
    let broker = MemoryBroker::new();
    let store = Arc::new(InMemoryResourceStore::new());
    store
        .upsert_message_queue_trigger(mq_trigger("orders", "orders"))
        .await;

    let runtime = MqTriggerRuntime::builder()
        .resources(store.clone())
        .broker(Arc::new(broker.clone()))
        .router_url(router.uri())
        .resync_interval(Duration::from_millis(20))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    eventually("subscribed", || async { broker.subscriber_count("orders") == 1 }).await;
    store.set_failing(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.subscriber_count("orders"), 1);
    assert!(runtime.is_running());

    runtime.shutdown().await.unwrap();
    assert_eq!(broker.subscriber_count("orders"), 0);
}

#[test]
fn test_builder_requires_broker() {
    let store = Arc::new(InMemoryResourceStore::new());
    let err = MqTriggerRuntime::builder()
        .resources(store)
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("broker"));
}
