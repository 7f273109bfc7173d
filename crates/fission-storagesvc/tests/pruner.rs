// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the archive pruner.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::package_with_url;
use fission_core::store::InMemoryResourceStore;
use fission_storagesvc::backend::ArchiveStore;
use fission_storagesvc::client::ArchiveClient;
use fission_storagesvc::pruner::{ArchivePruner, PrunerConfig};
use tempfile::TempDir;

fn setup(min_age: Duration) -> (ArchiveStore, Arc<InMemoryResourceStore>, ArchivePruner, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = ArchiveStore::local(dir.path().join("fission-functions"), "fission-functions").unwrap();
    let resources = Arc::new(InMemoryResourceStore::new());
    let pruner = ArchivePruner::new(
        store.clone(),
        resources.clone(),
        PrunerConfig {
            enabled: true,
            interval: Duration::from_secs(3600),
            min_age,
        },
    );
    (store, resources, pruner, dir)
}

#[tokio::test]
async fn test_prunes_orphans_and_keeps_referenced() {
    let (store, resources, pruner, _dir) = setup(Duration::ZERO);
    let client = ArchiveClient::new("http://storagesvc.fission");

    let kept = store.put(Bytes::from_static(b"kept")).await.unwrap();
    let orphan = store.put(Bytes::from_static(b"orphan")).await.unwrap();
    resources
        .upsert_package(package_with_url("pkg", &client.url_for(&kept)))
        .await;

    let report = pruner.prune_once().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.referenced, 1);
    assert_eq!(report.deleted, vec![orphan.clone()]);

    let remaining: Vec<String> = store.list().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(remaining, vec![kept]);
}

#[tokio::test]
async fn test_skips_recent_archives() {
    let (store, _resources, pruner, _dir) = setup(Duration::from_secs(60));

    store.put(Bytes::from_static(b"fresh")).await.unwrap();

    let report = pruner.prune_once().await.unwrap();
    assert_eq!(report.skipped_recent, 1);
    assert!(report.deleted.is_empty());
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_package_listing_failure_deletes_nothing() {
    let (store, resources, pruner, _dir) = setup(Duration::ZERO);

    store.put(Bytes::from_static(b"orphan")).await.unwrap();
    resources.set_failing(true);

    assert!(pruner.prune_once().await.is_err());
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unparseable_package_url_deletes_nothing() {
    let (store, resources, pruner, _dir) = setup(Duration::ZERO);

    store.put(Bytes::from_static(b"orphan")).await.unwrap();
    resources.upsert_package(package_with_url("broken", "::not a url::")).await;

    assert!(pruner.prune_once().await.is_err());
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_disabled_pruner_returns_immediately() {
    let dir = TempDir::new().unwrap();
    let store = ArchiveStore::local(dir.path(), "fission-functions").unwrap();
    let pruner = ArchivePruner::new(
        store,
        Arc::new(InMemoryResourceStore::new()),
        PrunerConfig {
            enabled: false,
            ..PrunerConfig::default()
        },
    );

    tokio::time::timeout(Duration::from_secs(1), pruner.run())
        .await
        .expect("disabled pruner should return immediately");
}
