// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for executor integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fission_core::clock::system_clock;
use fission_core::store::InMemoryResourceStore;
use fission_core::types::{
    Archive, Environment, EnvironmentSpec, Function, FunctionSpec, Metadata, Package,
    PackageSpec, Runtime,
};
use fission_core::{Backoff, ObjectKey, SharedClock};
use fission_executor::fscache::{FunctionService, FunctionServiceCache};
use fission_executor::orchestrator::MockOrchestrator;
use fission_executor::pool::{PoolDeps, PoolSettings};
use fission_executor::poolmgr::{EagerPoolCreatorConfig, PoolManager};
use fission_executor::runtime::ExecutorRuntime;
use fission_executor::specialize::{Specializer, SpecializerConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Namespace pools of `default` environments land in.
pub const FUNCTION_NAMESPACE: &str = "fission-function";

/// Specializer pointing both the fetcher and the runtime at `port` on the pod IP.
pub fn specializer_config(port: u16) -> SpecializerConfig {
    SpecializerConfig {
        fetcher_port: port,
        runtime_port: port,
        backoff: Backoff::new(5, Duration::from_millis(20), 2.0),
        ..SpecializerConfig::default()
    }
}

/// Pool settings with short polls so tests don't wait on defaults.
pub fn fast_pool_settings() -> PoolSettings {
    PoolSettings {
        instance_id: "testinst".to_string(),
        pod_ready_timeout: Duration::from_secs(5),
        ready_poll_interval: Duration::from_millis(10),
        choose_poll_interval: Duration::from_millis(10),
        destroy_timeout: Duration::from_secs(1),
        ..PoolSettings::default()
    }
}

/// A wiremock server answering the fetcher and runtime endpoints with 200.
pub async fn pod_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fetch"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/specialize"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

/// Pool manager over a mock orchestrator, without the HTTP server.
pub struct TestPools {
    pub orchestrator: Arc<MockOrchestrator>,
    pub cache: FunctionServiceCache,
    pub pools: PoolManager,
}

impl TestPools {
    pub fn start(port: u16, settings: PoolSettings, clock: SharedClock) -> Self {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let cache = FunctionServiceCache::start(clock.clone());
        let deps = PoolDeps {
            orchestrator: orchestrator.clone(),
            specializer: Specializer::new(reqwest::Client::new(), specializer_config(port)),
            cache: cache.clone(),
            clock,
        };
        let pools = PoolManager::start(deps, settings, FUNCTION_NAMESPACE.to_string());
        Self {
            orchestrator,
            cache,
            pools,
        }
    }
}

/// An executor runtime on a random local port.
pub struct TestExecutor {
    pub runtime: ExecutorRuntime,
    pub orchestrator: Arc<MockOrchestrator>,
    pub resources: Arc<InMemoryResourceStore>,
}

impl TestExecutor {
    pub async fn start(port: u16) -> Self {
        Self::start_with_clock(port, system_clock()).await
    }

    pub async fn start_with_clock(port: u16, clock: SharedClock) -> Self {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let resources = Arc::new(InMemoryResourceStore::new());

        let runtime = ExecutorRuntime::builder()
            .orchestrator(orchestrator.clone())
            .resources(resources.clone())
            .bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .function_namespace(FUNCTION_NAMESPACE)
            .pool(fast_pool_settings())
            .specializer(specializer_config(port))
            .eager_pools(EagerPoolCreatorConfig {
                interval: Duration::from_secs(3600),
                max_failures: 5,
            })
            .cleanup_grace(None)
            .watch_interval(Duration::from_millis(50))
            .clock(clock)
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        Self {
            runtime,
            orchestrator,
            resources,
        }
    }

    pub fn url(&self) -> String {
        self.runtime.base_url()
    }

    /// Store an environment, a package and a function using them.
    pub async fn seed_function(&self, name: &str) -> Function {
        self.resources.upsert_environment(environment("python")).await;
        self.resources.upsert_package(package(&format!("{}-pkg", name))).await;
        self.resources
            .upsert_function(function(name, "python", &format!("{}-pkg", name)))
            .await
    }
}

pub fn environment(name: &str) -> Environment {
    let mut metadata = Metadata::new("default", name);
    metadata.uid = format!("{}-uid", name);
    metadata.resource_version = "1".to_string();
    Environment {
        metadata,
        spec: EnvironmentSpec {
            version: 2,
            runtime: Runtime {
                image: format!("fission/{}-env", name),
            },
            builder: None,
            poolsize: 3,
            resources: Default::default(),
            keep_archive: false,
            termination_grace_period: 30,
        },
    }
}

pub fn package(name: &str) -> Package {
    let mut metadata = Metadata::new("default", name);
    metadata.resource_version = "1".to_string();
    Package {
        metadata,
        spec: PackageSpec {
            deployment: Archive::literal(b"def main(): return 'hello'".to_vec()),
            ..Default::default()
        },
        status: Default::default(),
    }
}

pub fn function(name: &str, env: &str, pkg: &str) -> Function {
    let mut metadata = Metadata::new("default", name);
    metadata.uid = format!("{}-0000-uid", name);
    let mut spec = FunctionSpec::default();
    spec.environment.name = env.to_string();
    spec.package.packageref.name = pkg.to_string();
    spec.package.function_name = "main".to_string();
    Function { metadata, spec }
}

/// Cached record of `default/<name>`, read without refreshing its access time.
pub async fn cached(cache: &FunctionServiceCache, name: &str) -> Option<FunctionService> {
    let key = ObjectKey::new("default", name);
    cache
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.function == key)
}

/// Async flavour of [`eventually`].
pub async fn eventually_async<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
