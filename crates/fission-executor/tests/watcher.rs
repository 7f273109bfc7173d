// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Eviction of function services whose pod, function or package changed.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    FUNCTION_NAMESPACE, TestExecutor, TestPools, cached, environment, eventually_async,
    fast_pool_settings, function, package, pod_server,
};
use fission_core::ObjectKey;
use fission_core::clock::system_clock;
use fission_core::store::InMemoryResourceStore;
use fission_executor::fscache::FunctionService;
use fission_executor::orchestrator::{ObjectKind, OrchestratorCall};
use fission_executor::watcher::{EvictReason, Eviction, FunctionServiceWatcher};

const WAIT: Duration = Duration::from_secs(5);

/// Pools plus a store holding `python` and one function per name, each
/// specialized and cached.
struct Fixture {
    t: TestPools,
    resources: Arc<InMemoryResourceStore>,
    watcher: FunctionServiceWatcher,
}

impl Fixture {
    async fn start(port: u16, names: &[&str]) -> (Self, Vec<FunctionService>) {
        let t = TestPools::start(port, fast_pool_settings(), system_clock());
        let resources = Arc::new(InMemoryResourceStore::new());
        let env = resources.upsert_environment(environment("python")).await;
        let pool = t.pools.get_pool(&env).await.unwrap();

        let mut records = Vec::new();
        for name in names {
            let pkg_name = format!("{}-pkg", name);
            let pkg = resources.upsert_package(package(&pkg_name)).await;
            let f = resources
                .upsert_function(function(name, "python", &pkg_name))
                .await;
            let fsvc = pool.get_func_svc(&f, &pkg).await.unwrap();
            records.push(t.cache.add(fsvc).await.unwrap());
        }

        let watcher =
            FunctionServiceWatcher::new(resources.clone(), t.orchestrator.clone(), t.cache.clone());
        (
            Self {
                t,
                resources,
                watcher,
            },
            records,
        )
    }
}

fn deletes(calls: &[OrchestratorCall]) -> Vec<(ObjectKind, String)> {
    calls
        .iter()
        .filter_map(|c| match c {
            OrchestratorCall::Delete(kind, name) => Some((*kind, name.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_sweep_keeps_current_services() {
    let pod = pod_server().await;
    let (fx, records) = Fixture::start(pod.address().port(), &["hello"]).await;

    assert!(fx.watcher.sweep().await.unwrap().is_empty());
    assert_eq!(fx.t.cache.list().await.unwrap(), records);
    assert!(deletes(&fx.t.orchestrator.calls()).is_empty());
}

#[tokio::test]
async fn test_sweep_evicts_dead_and_unready_pods() {
    let pod = pod_server().await;
    let (fx, records) = Fixture::start(pod.address().port(), &["gone", "sick"]).await;
    let (gone, sick) = (&records[0], &records[1]);

    fx.t.orchestrator.evict_pod(FUNCTION_NAMESPACE, &gone.pod_name);
    fx.t.orchestrator.mark_all_pods_ready(false);

    let mut evicted = fx.watcher.sweep().await.unwrap();
    evicted.sort_by(|a, b| a.function.name.cmp(&b.function.name));
    assert_eq!(
        evicted,
        vec![
            Eviction {
                function: ObjectKey::new("default", "gone"),
                pod_name: gone.pod_name.clone(),
                reason: EvictReason::PodGone,
            },
            Eviction {
                function: ObjectKey::new("default", "sick"),
                pod_name: sick.pod_name.clone(),
                reason: EvictReason::PodNotReady,
            },
        ]
    );
    assert!(fx.t.cache.list().await.unwrap().is_empty());

    let deleted = deletes(&fx.t.orchestrator.calls());
    assert!(deleted.contains(&(ObjectKind::Pod, sick.pod_name.clone())));
    assert!(deleted.contains(&(ObjectKind::Service, sick.service_name.clone())));
    assert!(deleted.contains(&(ObjectKind::Service, gone.service_name.clone())));
}

#[tokio::test]
async fn test_sweep_evicts_deleted_function() {
    let pod = pod_server().await;
    let (fx, records) = Fixture::start(pod.address().port(), &["hello", "other"]).await;
    let hello = &records[0];

    assert!(fx.resources.delete_function(&hello.function).await);

    let evicted = fx.watcher.sweep().await.unwrap();
    assert_eq!(
        evicted,
        vec![Eviction {
            function: hello.function.clone(),
            pod_name: hello.pod_name.clone(),
            reason: EvictReason::FunctionDeleted,
        }]
    );
    assert_eq!(
        deletes(&fx.t.orchestrator.calls()),
        vec![
            (ObjectKind::Pod, hello.pod_name.clone()),
            (ObjectKind::Service, hello.service_name.clone()),
        ]
    );

    let remaining = fx.t.cache.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].function, ObjectKey::new("default", "other"));
    assert!(
        fx.t.orchestrator
            .pods(FUNCTION_NAMESPACE)
            .iter()
            .all(|p| p.name != hello.pod_name)
    );
}

#[tokio::test]
async fn test_sweep_evicts_on_new_function_or_package_version() {
    let pod = pod_server().await;
    let (fx, records) =
        Fixture::start(pod.address().port(), &["edited", "repackaged", "steady"]).await;

    fx.resources
        .upsert_function(function("edited", "python", "edited-pkg"))
        .await;
    fx.resources.upsert_package(package("repackaged-pkg")).await;

    let mut evicted = fx.watcher.sweep().await.unwrap();
    evicted.sort_by(|a, b| a.function.name.cmp(&b.function.name));
    assert_eq!(
        evicted,
        vec![
            Eviction {
                function: ObjectKey::new("default", "edited"),
                pod_name: records[0].pod_name.clone(),
                reason: EvictReason::FunctionChanged,
            },
            Eviction {
                function: ObjectKey::new("default", "repackaged"),
                pod_name: records[1].pod_name.clone(),
                reason: EvictReason::PackageChanged,
            },
        ]
    );

    let remaining = fx.t.cache.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].pod_name, records[2].pod_name);
}

#[tokio::test]
async fn test_sweep_keeps_everything_when_store_unavailable() {
    let pod = pod_server().await;
    let (fx, records) = Fixture::start(pod.address().port(), &["hello"]).await;

    fx.t.orchestrator.evict_pod(FUNCTION_NAMESPACE, &records[0].pod_name);
    fx.resources.set_failing(true);

    assert!(fx.watcher.sweep().await.is_err());
    assert_eq!(fx.t.cache.list().await.unwrap().len(), 1);

    fx.resources.set_failing(false);
    assert_eq!(fx.watcher.sweep().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dead_pod_is_replaced_on_next_lookup() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;
    executor.seed_function("hello").await;
    let facade = executor.runtime.executor().clone();
    let key = ObjectKey::new("default", "hello");

    facade.get_service_for_function(&key).await.unwrap();
    let first = cached(facade.cache(), "hello").await.unwrap();

    // Crashed outside the executor.
    executor.orchestrator.evict_pod(FUNCTION_NAMESPACE, &first.pod_name);

    let cache = facade.cache().clone();
    assert!(
        eventually_async(WAIT, || {
            let cache = cache.clone();
            async move { cached(&cache, "hello").await.is_none() }
        })
        .await
    );
    assert!(
        !executor
            .orchestrator
            .services(FUNCTION_NAMESPACE)
            .contains(&first.service_name)
    );

    facade.get_service_for_function(&key).await.unwrap();
    let second = cached(facade.cache(), "hello").await.unwrap();
    assert_ne!(second.pod_name, first.pod_name);
    assert!(
        executor
            .orchestrator
            .pods(FUNCTION_NAMESPACE)
            .iter()
            .any(|p| p.name == second.pod_name)
    );

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_package_update_respecializes() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;
    executor.seed_function("hello").await;
    let facade = executor.runtime.executor().clone();
    let key = ObjectKey::new("default", "hello");

    facade.get_service_for_function(&key).await.unwrap();
    let first = cached(facade.cache(), "hello").await.unwrap();

    let updated = executor.resources.upsert_package(package("hello-pkg")).await;
    assert_ne!(updated.metadata.resource_version, first.package_rv);

    let cache = facade.cache().clone();
    assert!(
        eventually_async(WAIT, || {
            let cache = cache.clone();
            async move { cached(&cache, "hello").await.is_none() }
        })
        .await
    );

    facade.get_service_for_function(&key).await.unwrap();
    let second = cached(facade.cache(), "hello").await.unwrap();
    assert_ne!(second.pod_name, first.pod_name);
    assert_eq!(second.package_rv, updated.metadata.resource_version);

    let fetches = pod
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/fetch")
        .count();
    assert_eq!(fetches, 2);

    executor.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deleted_function_loses_pod_and_service() {
    let pod = pod_server().await;
    let executor = TestExecutor::start(pod.address().port()).await;
    executor.seed_function("hello").await;
    let facade = executor.runtime.executor().clone();
    let key = ObjectKey::new("default", "hello");

    facade.get_service_for_function(&key).await.unwrap();
    let fsvc = cached(facade.cache(), "hello").await.unwrap();

    assert!(executor.resources.delete_function(&key).await);

    let cache = facade.cache().clone();
    assert!(
        eventually_async(WAIT, || {
            let cache = cache.clone();
            async move { cached(&cache, "hello").await.is_none() }
        })
        .await
    );
    let calls = executor.orchestrator.calls();
    assert!(calls.contains(&OrchestratorCall::Delete(ObjectKind::Pod, fsvc.pod_name.clone())));
    assert!(calls.contains(&OrchestratorCall::Delete(
        ObjectKind::Service,
        fsvc.service_name.clone()
    )));

    let err = facade.get_service_for_function(&key).await.unwrap_err();
    assert!(matches!(err, fission_executor::ExecutorError::NotFound(_)));

    executor.runtime.shutdown().await.unwrap();
}
