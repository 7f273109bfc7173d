// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes orchestrator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{
    FunctionServiceSpec, ObjectKind, ObjectSummary, Orchestrator, OrchestratorError, PodInfo,
    PoolDeploymentSpec, Result,
};

const SHARED_VOLUME: &str = "userfunc";

/// Orchestrator talking to the Kubernetes API.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    /// Create an orchestrator using an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create an orchestrator from the ambient kubeconfig or in-cluster config.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(map_error)?;
        Ok(Self::new(client))
    }

    fn deployments(&self, namespace: &str) -> Api<appsv1::Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn replica_sets(&self, namespace: &str) -> Api<appsv1::ReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<corev1::Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<corev1::Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error(err: kube::Error) -> OrchestratorError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => OrchestratorError::NotFound(resp.message),
            409 if resp.reason == "AlreadyExists" => OrchestratorError::AlreadyExists(resp.message),
            409 => OrchestratorError::Conflict(resp.message),
            code => OrchestratorError::Api {
                code,
                message: resp.message,
            },
        },
        other => OrchestratorError::Api {
            code: 0,
            message: other.to_string(),
        },
    }
}

fn summary<K: ResourceExt>(kind: ObjectKind, namespace: &str, obj: &K) -> ObjectSummary {
    ObjectSummary {
        kind,
        namespace: obj.namespace().unwrap_or_else(|| namespace.to_string()),
        name: obj.name_any(),
        labels: obj.labels().clone(),
    }
}

fn pod_info(pod: &corev1::Pod) -> PodInfo {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false);
    PodInfo {
        namespace: pod.namespace().unwrap_or_default(),
        name: pod.name_any(),
        ip: status.and_then(|s| s.pod_ip.clone()).filter(|ip| !ip.is_empty()),
        ready,
        labels: pod.labels().clone(),
        resource_version: pod.resource_version().unwrap_or_default(),
    }
}

fn make_deployment(spec: &PoolDeploymentSpec) -> appsv1::Deployment {
    let shared_mount = corev1::VolumeMount {
        name: SHARED_VOLUME.to_string(),
        mount_path: spec.shared_mount_path.clone(),
        ..corev1::VolumeMount::default()
    };
    let budget = &spec.resources;

    let runtime = corev1::Container {
        name: spec.runtime_container.clone(),
        image: Some(spec.runtime_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![corev1::ContainerPort {
            container_port: i32::from(spec.runtime_port),
            name: Some("http-env".to_string()),
            ..corev1::ContainerPort::default()
        }]),
        resources: Some(corev1::ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(budget.cpu_request())),
                ("memory".to_string(), Quantity(budget.memory_request())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(budget.cpu_limit())),
                ("memory".to_string(), Quantity(budget.memory_limit())),
            ])),
            ..corev1::ResourceRequirements::default()
        }),
        // Let in-flight requests drain before the runtime gets SIGTERM.
        lifecycle: Some(corev1::Lifecycle {
            pre_stop: Some(corev1::LifecycleHandler {
                exec: Some(corev1::ExecAction {
                    command: Some(vec![
                        "/bin/sleep".to_string(),
                        spec.termination_grace_period_secs.to_string(),
                    ]),
                }),
                ..corev1::LifecycleHandler::default()
            }),
            ..corev1::Lifecycle::default()
        }),
        volume_mounts: Some(vec![shared_mount.clone()]),
        ..corev1::Container::default()
    };

    let fetcher = corev1::Container {
        name: "fetcher".to_string(),
        image: Some(spec.fetcher_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "/fetcher".to_string(),
            "-specialize-on-startup=false".to_string(),
            format!("-port={}", spec.fetcher_port),
            spec.shared_mount_path.clone(),
        ]),
        ports: Some(vec![corev1::ContainerPort {
            container_port: i32::from(spec.fetcher_port),
            name: Some("fetcher".to_string()),
            ..corev1::ContainerPort::default()
        }]),
        readiness_probe: Some(corev1::Probe {
            http_get: Some(corev1::HTTPGetAction {
                path: Some("/readiness-healthz".to_string()),
                port: IntOrString::Int(i32::from(spec.fetcher_port)),
                ..corev1::HTTPGetAction::default()
            }),
            initial_delay_seconds: Some(1),
            period_seconds: Some(1),
            failure_threshold: Some(30),
            ..corev1::Probe::default()
        }),
        volume_mounts: Some(vec![shared_mount]),
        ..corev1::Container::default()
    };

    appsv1::Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: metav1::LabelSelector {
                match_labels: Some(spec.labels.clone()),
                ..metav1::LabelSelector::default()
            },
            template: corev1::PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(corev1::PodSpec {
                    containers: vec![runtime, fetcher],
                    volumes: Some(vec![corev1::Volume {
                        name: SHARED_VOLUME.to_string(),
                        empty_dir: Some(corev1::EmptyDirVolumeSource::default()),
                        ..corev1::Volume::default()
                    }]),
                    termination_grace_period_seconds: Some(spec.termination_grace_period_secs),
                    ..corev1::PodSpec::default()
                }),
            },
            ..appsv1::DeploymentSpec::default()
        }),
        ..appsv1::Deployment::default()
    }
}

fn make_service(spec: &FunctionServiceSpec) -> corev1::Service {
    corev1::Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(corev1::ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(spec.selector.clone()),
            ports: Some(vec![corev1::ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: i32::from(spec.port),
                target_port: Some(IntOrString::Int(i32::from(spec.target_port))),
                ..corev1::ServicePort::default()
            }]),
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_deployment(&self, spec: &PoolDeploymentSpec) -> Result<()> {
        self.deployments(&spec.namespace)
            .create(&PostParams::default(), &make_deployment(spec))
            .await
            .map_err(map_error)?;
        debug!(deployment = %spec.name, namespace = %spec.namespace, "Created pool deployment");
        Ok(())
    }

    async fn deployment_available_replicas(&self, namespace: &str, name: &str) -> Result<i32> {
        let deployment = self.deployments(namespace).get(name).await.map_err(map_error)?;
        Ok(deployment
            .status
            .and_then(|s| s.available_replicas)
            .unwrap_or(0))
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>> {
        let params = ListParams::default().labels(&fission_core::labels::selector(selector));
        let pods = self.pods(namespace).list(&params).await.map_err(map_error)?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo> {
        let pod = self.pods(namespace).get(name).await.map_err(map_error)?;
        Ok(pod_info(&pod))
    }

    async fn relabel_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<PodInfo> {
        // A resourceVersion in the patch makes the API server reject it on mismatch.
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
                "labels": labels,
            }
        });
        let pod = self
            .pods(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_error)?;
        Ok(pod_info(&pod))
    }

    async fn create_service(&self, spec: &FunctionServiceSpec) -> Result<()> {
        self.services(&spec.namespace)
            .create(&PostParams::default(), &make_service(spec))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<ObjectSummary>> {
        let params = ListParams::default();
        let objects = match kind {
            ObjectKind::Deployment => self
                .deployments(namespace)
                .list(&params)
                .await
                .map_err(map_error)?
                .items
                .iter()
                .map(|o| summary(kind, namespace, o))
                .collect(),
            ObjectKind::ReplicaSet => self
                .replica_sets(namespace)
                .list(&params)
                .await
                .map_err(map_error)?
                .items
                .iter()
                .map(|o| summary(kind, namespace, o))
                .collect(),
            ObjectKind::Pod => self
                .pods(namespace)
                .list(&params)
                .await
                .map_err(map_error)?
                .items
                .iter()
                .map(|o| summary(kind, namespace, o))
                .collect(),
            ObjectKind::Service => self
                .services(namespace)
                .list(&params)
                .await
                .map_err(map_error)?
                .items
                .iter()
                .map(|o| summary(kind, namespace, o))
                .collect(),
        };
        Ok(objects)
    }

    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        match kind {
            ObjectKind::Deployment => {
                self.deployments(namespace)
                    .delete(name, &DeleteParams::background())
                    .await
                    .map_err(map_error)?;
            }
            ObjectKind::ReplicaSet => {
                self.replica_sets(namespace)
                    .delete(name, &DeleteParams::background())
                    .await
                    .map_err(map_error)?;
            }
            ObjectKind::Pod => {
                self.pods(namespace)
                    .delete(name, &DeleteParams::default())
                    .await
                    .map_err(map_error)?;
            }
            ObjectKind::Service => {
                self.services(namespace)
                    .delete(name, &DeleteParams::default())
                    .await
                    .map_err(map_error)?;
            }
        }
        Ok(())
    }
}
