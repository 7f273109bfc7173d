// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for storage service integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use fission_core::store::InMemoryResourceStore;
use fission_core::types::{Archive, Metadata, Package, PackageSpec};
use fission_storagesvc::config::StorageConfig;
use fission_storagesvc::pruner::PrunerConfig;
use fission_storagesvc::runtime::StorageRuntime;
use tempfile::TempDir;

/// A storage runtime on a random local port, backed by a temp directory.
pub struct TestService {
    pub runtime: StorageRuntime,
    pub resources: Arc<InMemoryResourceStore>,
    pub dir: TempDir,
}

impl TestService {
    pub async fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let resources = Arc::new(InMemoryResourceStore::new());

        let runtime = StorageRuntime::builder()
            .storage(StorageConfig::Local {
                root: dir.path().to_path_buf(),
                sub_dir: "fission-functions".to_string(),
            })
            .resources(resources.clone())
            .bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .pruner(PrunerConfig {
                enabled: false,
                ..PrunerConfig::default()
            })
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        Self {
            runtime,
            resources,
            dir,
        }
    }

    pub fn url(&self) -> String {
        self.runtime.base_url()
    }
}

/// A package whose deployment archive points at `url`.
pub fn package_with_url(name: &str, url: &str) -> Package {
    Package {
        metadata: Metadata::new("default", name),
        spec: PackageSpec {
            deployment: Archive::url(url, fission_core::types::Checksum::sha256(b"")),
            ..PackageSpec::default()
        },
        status: Default::default(),
    }
}
