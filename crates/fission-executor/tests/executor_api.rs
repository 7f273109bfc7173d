// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API tests for the executor.

mod common;

use common::{FUNCTION_NAMESPACE, TestExecutor, pod_server};
use fission_core::ErrorKind;
use fission_executor::ExecutorClient;

#[tokio::test]
async fn test_healthz() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;

    let response = reqwest::get(format!("{}/healthz", executor.url())).await.unwrap();
    assert_eq!(response.status(), 200);

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_get_service_for_function_returns_pod_address() {
    let pod = pod_server().await;
    let port = pod.address().port();
    let executor = TestExecutor::start(port).await;
    executor.seed_function("hello").await;

    let client = ExecutorClient::new(executor.url());
    let address = client.get_service_for_function("hello", "default").await.unwrap();
    // Freshly specialized: the pod address, not the service.
    assert_eq!(address, format!("127.0.0.1:{}", port));

    // Second call is a cache hit; no second specialization.
    let again = client.get_service_for_function("hello", "default").await.unwrap();
    assert_eq!(again, address);
    let specializations = pod
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/v2/specialize")
        .count();
    assert_eq!(specializations, 1);

    let services = executor.orchestrator.services(FUNCTION_NAMESPACE);
    assert_eq!(services.len(), 1);
    assert!(services[0].starts_with("svc-hello"));

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_function_is_404() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v2/getServiceForFunction", executor.url()))
        .json(&serde_json::json!({"name": "nope", "namespace": "default"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let err = ExecutorClient::new(executor.url())
        .get_service_for_function("nope", "default")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_environment_is_404() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;
    executor.resources.upsert_package(common::package("orphan-pkg")).await;
    executor
        .resources
        .upsert_function(common::function("orphan", "gone-env", "orphan-pkg"))
        .await;

    let response = reqwest::Client::new()
        .post(format!("{}/v2/getServiceForFunction", executor.url()))
        .json(&serde_json::json!({"name": "orphan", "namespace": "default"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v2/getServiceForFunction", executor.url()))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_specialize_failure_is_500() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let pod = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fetch"))
        .respond_with(ResponseTemplate::new(500).set_body_string("archive checksum mismatch"))
        .mount(&pod)
        .await;
    let executor = TestExecutor::start(pod.address().port()).await;
    executor.seed_function("broken").await;

    let response = reqwest::Client::new()
        .post(format!("{}/v2/getServiceForFunction", executor.url()))
        .json(&serde_json::json!({"name": "broken"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().contains("checksum mismatch"));

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tap_service() {
    let pod = pod_server().await;
    let port = pod.address().port();
    let executor = TestExecutor::start(port).await;
    executor.seed_function("hello").await;

    let client = ExecutorClient::new(executor.url());
    let address = client.get_service_for_function("hello", "default").await.unwrap();

    client.tap_service(&format!("http://{}", address)).await.unwrap();
    client.tap_service(&address).await.unwrap();

    let err = client.tap_service("10.0.0.1:8888").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    executor.runtime.shutdown().await.unwrap();
}
