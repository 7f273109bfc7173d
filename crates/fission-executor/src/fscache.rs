// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function service cache.
//!
//! Remembers which specialized pod serves which function. One record set is
//! indexed three ways (by function, by address, by pod name), and all three
//! indexes are owned by a single actor task so they never disagree.
//! [`FunctionServiceCache`] is the cloneable handle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use fission_core::{Clock, ObjectKey, SharedClock};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{ExecutorError, Result};

const COMMAND_QUEUE_CAPACITY: usize = 256;

/// How long after creation the pod address is handed out instead of the
/// service address. Service endpoints take a moment to include a freshly
/// relabelled pod.
pub const POD_ADDRESS_WINDOW: Duration = Duration::from_secs(5);

/// A specialized pod serving one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionService {
    /// Function served.
    pub function: ObjectKey,
    /// UID of the function.
    pub function_uid: String,
    /// Resource version of the function the pod was specialized with.
    pub function_rv: String,
    /// Resource version of the package the pod was loaded from.
    pub package_rv: String,
    /// Environment of the pool the pod came from.
    pub environment: ObjectKey,
    /// `podIP:port`.
    pub pod_address: String,
    /// `service.namespace:port`.
    pub svc_address: String,
    /// Pod name.
    pub pod_name: String,
    /// Namespace of the pod and its service.
    pub namespace: String,
    /// Service name.
    pub service_name: String,
    /// Creation time.
    pub ctime: Instant,
    /// Last access time.
    pub atime: Instant,
}

impl FunctionService {
    /// Address callers should use at `now`.
    pub fn address(&self, now: Instant) -> &str {
        if now.saturating_duration_since(self.ctime) < POD_ADDRESS_WINDOW {
            &self.pod_address
        } else {
            &self.svc_address
        }
    }
}

enum Command {
    GetByFunction {
        key: ObjectKey,
        reply: oneshot::Sender<Option<FunctionService>>,
    },
    Add {
        fsvc: FunctionService,
        reply: oneshot::Sender<FunctionService>,
    },
    TouchByAddress {
        address: String,
        reply: oneshot::Sender<bool>,
    },
    DeleteByPod {
        pod_name: String,
        min_age: Duration,
        reply: oneshot::Sender<Option<FunctionService>>,
    },
    DeleteByFunction {
        key: ObjectKey,
        reply: oneshot::Sender<Option<FunctionService>>,
    },
    ListOld {
        environment: ObjectKey,
        age: Duration,
        reply: oneshot::Sender<Vec<String>>,
    },
    List {
        reply: oneshot::Sender<Vec<FunctionService>>,
    },
    Log,
}

/// Handle to the function service cache actor.
#[derive(Clone)]
pub struct FunctionServiceCache {
    tx: mpsc::Sender<Command>,
    clock: SharedClock,
}

impl FunctionServiceCache {
    /// Spawn the cache actor. It stops when the last handle is dropped.
    pub fn start(clock: SharedClock) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        tokio::spawn(
            Cache {
                by_function: HashMap::new(),
                by_address: HashMap::new(),
                by_pod: HashMap::new(),
                clock: clock.clone(),
            }
            .run(rx),
        );
        Self { tx, clock }
    }

    /// The clock timestamps are read from.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    async fn call<R>(&self, cmd: Command, rx: oneshot::Receiver<R>) -> Result<R> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ExecutorError::Stopped("function service cache"))?;
        rx.await
            .map_err(|_| ExecutorError::Stopped("function service cache"))
    }

    /// Record for `function`, refreshing its access time.
    pub async fn get_by_function(&self, function: &ObjectKey) -> Result<Option<FunctionService>> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::GetByFunction {
                key: function.clone(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Insert a record. If the function already has one, that record wins:
    /// it is returned with a refreshed access time and `fsvc` is discarded.
    pub async fn add(&self, fsvc: FunctionService) -> Result<FunctionService> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Add { fsvc, reply }, rx).await
    }

    /// Refresh the access time of the record reachable at `address`.
    pub async fn touch_by_address(&self, address: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let found = self
            .call(
                Command::TouchByAddress {
                    address: address.to_string(),
                    reply,
                },
                rx,
            )
            .await?;
        if found {
            Ok(())
        } else {
            Err(ExecutorError::NotFound(format!("function service at {}", address)))
        }
    }

    /// Remove the record for `pod_name` if it has been idle for at least
    /// `min_age`. Returns the removed record.
    pub async fn delete_by_pod(
        &self,
        pod_name: &str,
        min_age: Duration,
    ) -> Result<Option<FunctionService>> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::DeleteByPod {
                pod_name: pod_name.to_string(),
                min_age,
                reply,
            },
            rx,
        )
        .await
    }

    /// Remove the record for `function` unconditionally.
    pub async fn delete_by_function(&self, function: &ObjectKey) -> Result<Option<FunctionService>> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::DeleteByFunction {
                key: function.clone(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Pods of `environment` idle for at least `age`.
    pub async fn list_old(&self, environment: &ObjectKey, age: Duration) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::ListOld {
                environment: environment.clone(),
                age,
                reply,
            },
            rx,
        )
        .await
    }

    /// Snapshot of every record.
    pub async fn list(&self) -> Result<Vec<FunctionService>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::List { reply }, rx).await
    }

    /// Dump the cache at debug level.
    pub async fn log(&self) -> Result<()> {
        self.tx
            .send(Command::Log)
            .await
            .map_err(|_| ExecutorError::Stopped("function service cache"))
    }
}

struct Cache {
    by_function: HashMap<ObjectKey, FunctionService>,
    by_address: HashMap<String, ObjectKey>,
    by_pod: HashMap<String, ObjectKey>,
    clock: SharedClock,
}

impl Cache {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::GetByFunction { key, reply } => {
                    let _ = reply.send(self.touch(&key));
                }
                Command::Add { fsvc, reply } => {
                    let _ = reply.send(self.add(fsvc));
                }
                Command::TouchByAddress { address, reply } => {
                    let found = match self.by_address.get(&address).cloned() {
                        Some(key) => self.touch(&key).is_some(),
                        None => false,
                    };
                    let _ = reply.send(found);
                }
                Command::DeleteByPod {
                    pod_name,
                    min_age,
                    reply,
                } => {
                    let now = self.now();
                    let idle = self
                        .by_pod
                        .get(&pod_name)
                        .and_then(|key| self.by_function.get(key))
                        .is_some_and(|f| now.saturating_duration_since(f.atime) >= min_age);
                    let removed = if idle {
                        self.by_pod.get(&pod_name).cloned().and_then(|key| self.remove(&key))
                    } else {
                        None
                    };
                    let _ = reply.send(removed);
                }
                Command::DeleteByFunction { key, reply } => {
                    let _ = reply.send(self.remove(&key));
                }
                Command::ListOld {
                    environment,
                    age,
                    reply,
                } => {
                    let now = self.now();
                    let pods = self
                        .by_function
                        .values()
                        .filter(|f| {
                            f.environment == environment
                                && now.saturating_duration_since(f.atime) >= age
                        })
                        .map(|f| f.pod_name.clone())
                        .collect();
                    let _ = reply.send(pods);
                }
                Command::List { reply } => {
                    let _ = reply.send(self.by_function.values().cloned().collect());
                }
                Command::Log => {
                    debug!(entries = self.by_function.len(), "Function service cache dump");
                    for fsvc in self.by_function.values() {
                        debug!(
                            function = %fsvc.function,
                            environment = %fsvc.environment,
                            pod = %fsvc.pod_name,
                            pod_address = %fsvc.pod_address,
                            svc_address = %fsvc.svc_address,
                            idle_secs = self.now().saturating_duration_since(fsvc.atime).as_secs(),
                            "Function service"
                        );
                    }
                }
            }
        }
    }

    fn touch(&mut self, key: &ObjectKey) -> Option<FunctionService> {
        let now = self.now();
        let fsvc = self.by_function.get_mut(key)?;
        fsvc.atime = now;
        Some(fsvc.clone())
    }

    fn add(&mut self, mut fsvc: FunctionService) -> FunctionService {
        let key = fsvc.function.clone();
        if let Some(existing) = self.touch(&key) {
            debug!(function = %key, pod = %existing.pod_name, "Function service already cached");
            return existing;
        }
        fsvc.atime = self.now();
        self.by_address.insert(fsvc.pod_address.clone(), key.clone());
        self.by_address.insert(fsvc.svc_address.clone(), key.clone());
        self.by_pod.insert(fsvc.pod_name.clone(), key.clone());
        self.by_function.insert(key, fsvc.clone());
        fsvc
    }

    fn remove(&mut self, key: &ObjectKey) -> Option<FunctionService> {
        let fsvc = self.by_function.remove(key)?;
        self.by_address.remove(&fsvc.pod_address);
        self.by_address.remove(&fsvc.svc_address);
        self.by_pod.remove(&fsvc.pod_name);
        Some(fsvc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_core::ManualClock;
    use std::sync::Arc;

    fn record(clock: &ManualClock, fn_name: &str, pod: &str) -> FunctionService {
        FunctionService {
            function: ObjectKey::new("default", fn_name),
            function_uid: format!("{}-uid", fn_name),
            function_rv: "1".to_string(),
            package_rv: "1".to_string(),
            environment: ObjectKey::new("default", "python"),
            pod_address: format!("10.0.0.{}:8888", pod.len()),
            svc_address: format!("svc-{}.fission-function:8888", fn_name),
            pod_name: pod.to_string(),
            namespace: "fission-function".to_string(),
            service_name: format!("svc-{}", fn_name),
            ctime: clock.now(),
            atime: clock.now(),
        }
    }

    #[tokio::test]
    async fn test_add_then_get_returns_record() {
        let clock = Arc::new(ManualClock::new());
        let cache = FunctionServiceCache::start(clock.clone());
        let fsvc = record(&clock, "hello", "pod-a");

        cache.add(fsvc.clone()).await.unwrap();
        clock.advance(Duration::from_secs(3));
        let got = cache
            .get_by_function(&ObjectKey::new("default", "hello"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(got.pod_name, fsvc.pod_name);
        assert_eq!(got.svc_address, fsvc.svc_address);
        assert_eq!(got.atime.duration_since(fsvc.atime), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_first_add_wins() {
        let clock = Arc::new(ManualClock::new());
        let cache = FunctionServiceCache::start(clock.clone());

        cache.add(record(&clock, "hello", "pod-a")).await.unwrap();
        let kept = cache.add(record(&clock, "hello", "pod-bb")).await.unwrap();

        assert_eq!(kept.pod_name, "pod-a");
        assert_eq!(cache.list().await.unwrap().len(), 1);
        // The loser's pod is not indexed.
        assert!(
            cache
                .delete_by_pod("pod-bb", Duration::ZERO)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_by_pod_respects_min_age() {
        let clock = Arc::new(ManualClock::new());
        let cache = FunctionServiceCache::start(clock.clone());
        cache.add(record(&clock, "hello", "pod-a")).await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(
            cache
                .delete_by_pod("pod-a", Duration::from_secs(120))
                .await
                .unwrap()
                .is_none()
        );

        clock.advance(Duration::from_secs(60));
        let removed = cache
            .delete_by_pod("pod-a", Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(removed.map(|f| f.pod_name), Some("pod-a".to_string()));
        assert!(cache.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_touch_by_address_keeps_record_young() {
        let clock = Arc::new(ManualClock::new());
        let cache = FunctionServiceCache::start(clock.clone());
        let fsvc = cache.add(record(&clock, "hello", "pod-a")).await.unwrap();
        let env = ObjectKey::new("default", "python");

        clock.advance(Duration::from_secs(100));
        cache.touch_by_address(&fsvc.svc_address).await.unwrap();
        clock.advance(Duration::from_secs(30));

        assert!(cache.list_old(&env, Duration::from_secs(120)).await.unwrap().is_empty());
        assert_eq!(
            cache.list_old(&env, Duration::from_secs(30)).await.unwrap(),
            vec!["pod-a".to_string()]
        );

        let err = cache.touch_by_address("10.9.9.9:8888").await.unwrap_err();
        assert!(matches!(err, ExecutorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_old_filters_by_environment() {
        let clock = Arc::new(ManualClock::new());
        let cache = FunctionServiceCache::start(clock.clone());
        let mut other = record(&clock, "other", "pod-x");
        other.environment = ObjectKey::new("default", "nodejs");
        cache.add(record(&clock, "hello", "pod-a")).await.unwrap();
        cache.add(other).await.unwrap();

        clock.advance(Duration::from_secs(300));
        let old = cache
            .list_old(&ObjectKey::new("default", "python"), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(old, vec!["pod-a".to_string()]);
    }

    #[tokio::test]
    async fn test_address_switches_from_pod_to_service() {
        let clock = ManualClock::new();
        let fsvc = record(&clock, "hello", "pod-a");
        let start = fsvc.ctime;

        assert_eq!(fsvc.address(start), fsvc.pod_address);
        assert_eq!(fsvc.address(start + Duration::from_secs(4)), fsvc.pod_address);
        assert_eq!(fsvc.address(start + Duration::from_secs(5)), fsvc.svc_address);
        assert_eq!(fsvc.address(start + Duration::from_secs(10)), fsvc.svc_address);
    }

    #[tokio::test]
    async fn test_delete_by_function_clears_indexes() {
        let clock = Arc::new(ManualClock::new());
        let cache = FunctionServiceCache::start(clock.clone());
        let fsvc = cache.add(record(&clock, "hello", "pod-a")).await.unwrap();

        let removed = cache.delete_by_function(&fsvc.function).await.unwrap();
        assert!(removed.is_some());
        assert!(cache.touch_by_address(&fsvc.pod_address).await.is_err());
        assert!(cache.get_by_function(&fsvc.function).await.unwrap().is_none());
    }
}
