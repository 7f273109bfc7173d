// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory orchestrator.
//!
//! Deployments behave like a replica set controller that settles instantly:
//! creating or scaling a deployment creates pods matching its labels, and a
//! pod relabelled out of the pool selector is replaced by a fresh generic one.
//! Every mutating call is recorded so tests can assert on ordering.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use fission_core::labels;

use super::{
    FunctionServiceSpec, ObjectKind, ObjectSummary, Orchestrator, OrchestratorError, PodInfo,
    PoolDeploymentSpec, Result,
};

/// A mutating call seen by [`MockOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCall {
    /// `create_deployment`
    CreateDeployment(String),
    /// `scale_deployment`
    Scale(String, i32),
    /// `relabel_pod`
    Relabel(String),
    /// `create_service`
    CreateService(String),
    /// `delete_object`
    Delete(ObjectKind, String),
}

#[derive(Debug, Default)]
struct State {
    deployments: HashMap<(String, String), (PoolDeploymentSpec, i32)>,
    pods: BTreeMap<(String, String), PodInfo>,
    services: BTreeMap<(String, String), FunctionServiceSpec>,
    others: Vec<ObjectSummary>,
    calls: Vec<OrchestratorCall>,
    next_pod: u64,
    next_version: u64,
    pod_ip: String,
    pods_ready: bool,
    relabel_conflicts: u32,
}

impl State {
    fn version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn spawn_pod(&mut self, spec: &PoolDeploymentSpec) {
        self.next_pod += 1;
        let name = format!("{}-{}", spec.name, self.next_pod);
        let pod = PodInfo {
            namespace: spec.namespace.clone(),
            name: name.clone(),
            ip: Some(self.pod_ip.clone()),
            ready: self.pods_ready,
            labels: spec.labels.clone(),
            resource_version: self.version(),
        };
        self.pods.insert((spec.namespace.clone(), name), pod);
    }

    fn owned_pods(&self, spec: &PoolDeploymentSpec) -> Vec<String> {
        self.pods
            .values()
            .filter(|p| p.namespace == spec.namespace && labels::matches(&spec.labels, &p.labels))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Bring the number of pods matching each deployment's labels to its replica count.
    fn settle(&mut self) {
        let deployments: Vec<(PoolDeploymentSpec, i32)> = self.deployments.values().cloned().collect();
        for (spec, replicas) in deployments {
            let owned = self.owned_pods(&spec);
            let want = usize::try_from(replicas).unwrap_or(0);
            if owned.len() < want {
                for _ in owned.len()..want {
                    self.spawn_pod(&spec);
                }
            } else {
                for name in owned.into_iter().skip(want) {
                    self.pods.remove(&(spec.namespace.clone(), name));
                }
            }
        }
    }
}

/// Orchestrator backed by in-memory maps.
#[derive(Debug)]
pub struct MockOrchestrator {
    state: Mutex<State>,
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrchestrator {
    /// Create an empty orchestrator whose pods come up ready at `127.0.0.1`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pod_ip: "127.0.0.1".to_string(),
                pods_ready: true,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// IP assigned to pods created from now on.
    pub fn set_pod_ip(&self, ip: impl Into<String>) {
        self.lock().pod_ip = ip.into();
    }

    /// Whether pods created from now on report ready.
    pub fn set_pods_ready(&self, ready: bool) {
        self.lock().pods_ready = ready;
    }

    /// Mark every existing pod ready or not.
    pub fn mark_all_pods_ready(&self, ready: bool) {
        let mut state = self.lock();
        for pod in state.pods.values_mut() {
            pod.ready = ready;
        }
    }

    /// Fail the next `n` relabels with a resource version conflict.
    pub fn conflict_next_relabels(&self, n: u32) {
        self.lock().relabel_conflicts = n;
    }

    /// Seed an object not created through this orchestrator.
    pub fn insert_object(&self, object: ObjectSummary) {
        let mut state = self.lock();
        match object.kind {
            ObjectKind::Pod => {
                let rv = state.version();
                let ip = state.pod_ip.clone();
                state.pods.insert(
                    (object.namespace.clone(), object.name.clone()),
                    PodInfo {
                        namespace: object.namespace,
                        name: object.name,
                        ip: Some(ip),
                        ready: true,
                        labels: object.labels,
                        resource_version: rv,
                    },
                );
            }
            ObjectKind::Service => {
                state.services.insert(
                    (object.namespace.clone(), object.name.clone()),
                    FunctionServiceSpec {
                        name: object.name,
                        namespace: object.namespace,
                        labels: object.labels,
                        selector: BTreeMap::new(),
                        port: 0,
                        target_port: 0,
                    },
                );
            }
            _ => state.others.push(object),
        }
    }

    /// Remove a pod without going through the API, as if it crashed.
    pub fn evict_pod(&self, namespace: &str, name: &str) {
        self.lock()
            .pods
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Pods in `namespace`.
    pub fn pods(&self, namespace: &str) -> Vec<PodInfo> {
        self.lock()
            .pods
            .values()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect()
    }

    /// Service names in `namespace`.
    pub fn services(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .services
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// A service spec.
    pub fn service(&self, namespace: &str, name: &str) -> Option<FunctionServiceSpec> {
        self.lock()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Deployments in `namespace` with their replica counts.
    pub fn deployments(&self, namespace: &str) -> Vec<(PoolDeploymentSpec, i32)> {
        self.lock()
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Mutating calls so far, oldest first.
    pub fn calls(&self) -> Vec<OrchestratorCall> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn create_deployment(&self, spec: &PoolDeploymentSpec) -> Result<()> {
        let mut state = self.lock();
        let key = (spec.namespace.clone(), spec.name.clone());
        if state.deployments.contains_key(&key) {
            return Err(OrchestratorError::AlreadyExists(format!("deployment {}", spec.name)));
        }
        state.calls.push(OrchestratorCall::CreateDeployment(spec.name.clone()));
        state.deployments.insert(key, (spec.clone(), spec.replicas));
        state.settle();
        Ok(())
    }

    async fn deployment_available_replicas(&self, namespace: &str, name: &str) -> Result<i32> {
        let state = self.lock();
        let (spec, _) = state
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {}", name)))?;
        let ready = state
            .pods
            .values()
            .filter(|p| p.namespace == namespace && p.ready && labels::matches(&spec.labels, &p.labels))
            .count();
        Ok(i32::try_from(ready).unwrap_or(i32::MAX))
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {}", name)))?;
        entry.1 = replicas;
        state.calls.push(OrchestratorCall::Scale(name.to_string(), replicas));
        state.settle();
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>> {
        Ok(self
            .lock()
            .pods
            .values()
            .filter(|p| p.namespace == namespace && labels::matches(selector, &p.labels))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo> {
        self.lock()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("pod {}", name)))
    }

    async fn relabel_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<PodInfo> {
        let mut state = self.lock();
        state.calls.push(OrchestratorCall::Relabel(name.to_string()));
        if state.relabel_conflicts > 0 {
            state.relabel_conflicts -= 1;
            // Someone else touched the pod in between.
            let rv = state.version();
            if let Some(pod) = state.pods.get_mut(&(namespace.to_string(), name.to_string())) {
                pod.resource_version = rv;
            }
            return Err(OrchestratorError::Conflict(format!("pod {}", name)));
        }

        let rv = state.version();
        let pod = state
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| OrchestratorError::NotFound(format!("pod {}", name)))?;
        if pod.resource_version != resource_version {
            return Err(OrchestratorError::Conflict(format!("pod {}", name)));
        }
        pod.labels = labels;
        pod.resource_version = rv;
        let updated = pod.clone();
        state.settle();
        Ok(updated)
    }

    async fn create_service(&self, spec: &FunctionServiceSpec) -> Result<()> {
        let mut state = self.lock();
        let key = (spec.namespace.clone(), spec.name.clone());
        if state.services.contains_key(&key) {
            return Err(OrchestratorError::AlreadyExists(format!("service {}", spec.name)));
        }
        state.calls.push(OrchestratorCall::CreateService(spec.name.clone()));
        state.services.insert(key, spec.clone());
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<ObjectSummary>> {
        let state = self.lock();
        let objects = match kind {
            ObjectKind::Deployment => state
                .deployments
                .values()
                .filter(|(spec, _)| spec.namespace == namespace)
                .map(|(spec, _)| ObjectSummary {
                    kind,
                    namespace: spec.namespace.clone(),
                    name: spec.name.clone(),
                    labels: spec.labels.clone(),
                })
                .chain(
                    state
                        .others
                        .iter()
                        .filter(|o| o.kind == kind && o.namespace == namespace)
                        .cloned(),
                )
                .collect(),
            ObjectKind::ReplicaSet => state
                .others
                .iter()
                .filter(|o| o.kind == kind && o.namespace == namespace)
                .cloned()
                .collect(),
            ObjectKind::Pod => state
                .pods
                .values()
                .filter(|p| p.namespace == namespace)
                .map(|p| ObjectSummary {
                    kind,
                    namespace: p.namespace.clone(),
                    name: p.name.clone(),
                    labels: p.labels.clone(),
                })
                .collect(),
            ObjectKind::Service => state
                .services
                .values()
                .filter(|s| s.namespace == namespace)
                .map(|s| ObjectSummary {
                    kind,
                    namespace: s.namespace.clone(),
                    name: s.name.clone(),
                    labels: s.labels.clone(),
                })
                .collect(),
        };
        Ok(objects)
    }

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        let existed = match kind {
            ObjectKind::Deployment => {
                let removed = match state.deployments.remove(&key) {
                    Some((spec, _)) => {
                        // Background propagation takes the pool's generic pods along.
                        for pod in state.owned_pods(&spec) {
                            state.pods.remove(&(spec.namespace.clone(), pod));
                        }
                        true
                    }
                    None => false,
                };
                let before = state.others.len();
                state
                    .others
                    .retain(|o| !(o.kind == kind && o.namespace == namespace && o.name == name));
                removed || state.others.len() != before
            }
            ObjectKind::ReplicaSet => {
                let before = state.others.len();
                state
                    .others
                    .retain(|o| !(o.kind == kind && o.namespace == namespace && o.name == name));
                state.others.len() != before
            }
            ObjectKind::Pod => state.pods.remove(&key).is_some(),
            ObjectKind::Service => state.services.remove(&key).is_some(),
        };
        if !existed {
            return Err(OrchestratorError::NotFound(format!("{} {}", kind, name)));
        }
        state.calls.push(OrchestratorCall::Delete(kind, name.to_string()));
        state.settle();
        Ok(())
    }
}
