// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timer sync semantics and firing.

mod common;

use std::time::Duration;

use common::{ROUTER_URL, RecordingPublisher, eventually, time_trigger};
use fission_core::ObjectKey;
use fission_core::invoke::HEADER_TIMER_NAME;
use fission_core::types::{FunctionReference, FunctionReferenceType};
use fission_timer::Timer;

#[tokio::test]
async fn test_sync_adds_updates_and_removes() {
    let publisher = RecordingPublisher::new();
    let timer = Timer::start(publisher.clone(), ROUTER_URL);

    let report = timer
        .sync(vec![time_trigger("a", "@hourly"), time_trigger("b", "@daily")])
        .await
        .unwrap();
    assert_eq!((report.added, report.updated, report.removed, report.failed), (2, 0, 0, 0));

    // Same schedule, new labels: stored trigger changes, job does not.
    let mut relabeled = time_trigger("a", "@hourly");
    relabeled.metadata.labels.insert("team".into(), "x".into());
    let report = timer
        .sync(vec![relabeled, time_trigger("b", "@daily")])
        .await
        .unwrap();
    assert_eq!((report.added, report.updated, report.removed), (0, 0, 0));
    let listed = timer.list().await.unwrap();
    assert_eq!(listed[0].1.metadata.labels.get("team").map(String::as_str), Some("x"));

    let report = timer
        .sync(vec![time_trigger("a", "*/5 * * * *")])
        .await
        .unwrap();
    assert_eq!((report.added, report.updated, report.removed), (0, 1, 1));

    let listed = timer.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, ObjectKey::new("default", "a"));
    assert_eq!(listed[0].1.spec.cron, "*/5 * * * *");

    timer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_changed_function_replaces_job() {
    let timer = Timer::start(RecordingPublisher::new(), ROUTER_URL);
    timer.sync(vec![time_trigger("a", "@hourly")]).await.unwrap();

    let mut retargeted = time_trigger("a", "@hourly");
    retargeted.spec.functionref = FunctionReference::by_name("other");
    let report = timer.sync(vec![retargeted]).await.unwrap();
    assert_eq!(report.updated, 1);

    timer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unschedulable_triggers_fail() {
    let timer = Timer::start(RecordingPublisher::new(), ROUTER_URL);

    let mut weighted = time_trigger("weighted", "@hourly");
    weighted.spec.functionref.reference_type = FunctionReferenceType::FunctionWeights;

    let report = timer
        .sync(vec![
            time_trigger("bad", "not a cron"),
            time_trigger("forever", "@every 0s"),
            weighted,
            time_trigger("ok", "@hourly"),
        ])
        .await
        .unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 3);
    assert_eq!(timer.list().await.unwrap().len(), 1);

    timer.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_fires_with_name_header() {
    let publisher = RecordingPublisher::new();
    let timer = Timer::start(publisher.clone(), ROUTER_URL);
    timer
        .sync(vec![time_trigger("every-tick", "@every 50ms")])
        .await
        .unwrap();

    eventually("two firings", || async { publisher.count() >= 2 }).await;

    let request = &publisher.requests()[0];
    assert_eq!(request.url, "http://router.test/fission-function/tick");
    assert!(request.body.is_empty());
    assert_eq!(
        request.headers,
        vec![(HEADER_TIMER_NAME.to_string(), "every-tick".to_string())]
    );

    timer.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cron_with_seconds_fires() {
    let publisher = RecordingPublisher::new();
    let timer = Timer::start(publisher.clone(), ROUTER_URL);
    timer
        .sync(vec![time_trigger("each-second", "* * * * * *")])
        .await
        .unwrap();

    eventually("cron firing", || async { publisher.count() >= 1 }).await;
    timer.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_trigger_stops_firing() {
    let publisher = RecordingPublisher::new();
    let timer = Timer::start(publisher.clone(), ROUTER_URL);
    timer
        .sync(vec![time_trigger("every-tick", "@every 20ms")])
        .await
        .unwrap();
    eventually("first firing", || async { publisher.count() >= 1 }).await;

    let report = timer.sync(Vec::new()).await.unwrap();
    assert_eq!(report.removed, 1);
    let after_remove = publisher.count();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(publisher.count() <= after_remove + 1);

    timer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_calls_after_shutdown_fail() {
    let timer = Timer::start(RecordingPublisher::new(), ROUTER_URL);
    timer.shutdown().await.unwrap();

    let err = timer.list().await.unwrap_err();
    assert_eq!(err.kind(), fission_core::ErrorKind::Fatal);
}
