// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the archive HTTP API over a real server and a local store.

mod common;

use common::TestService;
use fission_core::ErrorKind;
use fission_storagesvc::client::ArchiveClient;
use fission_storagesvc::config::StorageType;
use reqwest::StatusCode;

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let svc = TestService::start().await;
    let client = ArchiveClient::new(svc.url());

    let data = b"PK\x03\x04 pretend this is a zip".to_vec();
    let id = client.upload("hello.zip", data.clone()).await.unwrap();
    assert!(uuid::Uuid::parse_str(&id).is_ok(), "id should be a uuid: {}", id);

    let downloaded = client.download(&id).await.unwrap();
    assert_eq!(downloaded.as_ref(), data.as_slice());

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_head_reports_local_storage() {
    let svc = TestService::start().await;
    let client = ArchiveClient::new(svc.url());

    let id = client.upload("a.zip", b"abc".to_vec()).await.unwrap();
    let info = client.info(&id).await.unwrap();
    assert_eq!(info.storage_type, StorageType::Local);
    assert_eq!(info.bucket, None);

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_list_and_delete() {
    let svc = TestService::start().await;
    let client = ArchiveClient::new(svc.url());

    let a = client.upload("a.zip", b"a".to_vec()).await.unwrap();
    let b = client.upload("b.zip", b"b".to_vec()).await.unwrap();

    let mut ids = client.list().await.unwrap();
    ids.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    client.delete(&a).await.unwrap();
    assert_eq!(client.list().await.unwrap(), vec![b]);

    let err = client.download(&a).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_id_is_404() {
    let svc = TestService::start().await;
    let http = reqwest::Client::new();
    let url = format!("{}/v1/archive?id={}", svc.url(), uuid::Uuid::new_v4());

    assert_eq!(http.get(&url).send().await.unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(http.head(&url).send().await.unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(http.delete(&url).send().await.unwrap().status(), StatusCode::NOT_FOUND);

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upload_without_file_size_is_400() {
    let svc = TestService::start().await;
    let http = reqwest::Client::new();
    let url = format!("{}/v1/archive", svc.url());

    let form = reqwest::multipart::Form::new()
        .part("uploadfile", reqwest::multipart::Part::bytes(b"abc".to_vec()).file_name("a.zip"));
    let response = http.post(&url).multipart(form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().contains("X-File-Size"));

    let form = reqwest::multipart::Form::new()
        .part("uploadfile", reqwest::multipart::Part::bytes(b"abc".to_vec()).file_name("a.zip"));
    let response = http
        .post(&url)
        .header("X-File-Size", "three")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upload_without_file_is_400() {
    let svc = TestService::start().await;
    let http = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().text("other", "value");
    let response = http
        .post(format!("{}/v1/archive", svc.url()))
        .header("X-File-Size", "3")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().contains("missing upload file"));

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delete_and_head_require_id() {
    let svc = TestService::start().await;
    let http = reqwest::Client::new();
    let url = format!("{}/v1/archive", svc.url());

    assert_eq!(http.delete(&url).send().await.unwrap().status(), StatusCode::BAD_REQUEST);
    assert_eq!(http.head(&url).send().await.unwrap().status(), StatusCode::BAD_REQUEST);

    svc.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_healthz() {
    let svc = TestService::start().await;
    let response = reqwest::get(format!("{}/healthz", svc.url())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    svc.runtime.shutdown().await.unwrap();
}
