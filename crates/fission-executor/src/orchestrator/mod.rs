// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container orchestrator seam.
//!
//! The executor only needs a handful of operations on deployments, pods and
//! services. [`Orchestrator`] names exactly those, in executor vocabulary, so
//! pools and cleanup can run against [`MockOrchestrator`] in tests and against
//! [`KubeOrchestrator`] in a cluster.

mod k8s;
mod mock;

pub use self::k8s::KubeOrchestrator;
pub use self::mock::{MockOrchestrator, OrchestratorCall};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use fission_core::ErrorKind;
use fission_core::resources::ResourceBudget;
use thiserror::Error;

/// Orchestrator errors.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// Object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Object already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Optimistic concurrency precondition failed (stale resource version).
    #[error("conflict updating {0}")]
    Conflict(String),

    /// Any other API failure.
    #[error("orchestrator API error ({code}): {message}")]
    Api {
        /// HTTP status code, 0 when the request never reached the server.
        code: u16,
        /// Error message.
        message: String,
    },
}

impl OrchestratorError {
    /// Coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            OrchestratorError::Conflict(_) => ErrorKind::Transient,
            OrchestratorError::Api { code, .. } => match code {
                400 | 422 => ErrorKind::InvalidArgument,
                401 | 403 => ErrorKind::Fatal,
                _ => ErrorKind::Transient,
            },
        }
    }

    /// Whether this error means the object is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Kinds of objects the executor owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Pool deployment.
    Deployment,
    /// Replica set created by a pool deployment.
    ReplicaSet,
    /// Pool or specialized pod.
    Pod,
    /// Function service.
    Service,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Deployment => "deployment",
            ObjectKind::ReplicaSet => "replicaset",
            ObjectKind::Pod => "pod",
            ObjectKind::Service => "service",
        })
    }
}

/// Name and labels of an owned object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object kind.
    pub kind: ObjectKind,
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

/// What the executor needs to know about a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Pod IP, once assigned.
    pub ip: Option<String>,
    /// All containers report ready.
    pub ready: bool,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Resource version used as the relabel precondition.
    pub resource_version: String,
}

/// A pool deployment: pre-warmed pods running the runtime plus the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDeploymentSpec {
    /// Deployment name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Replica count.
    pub replicas: i32,
    /// Labels on the deployment, its selector and its pod template.
    pub labels: BTreeMap<String, String>,
    /// Runtime container name (the environment name).
    pub runtime_container: String,
    /// Runtime image.
    pub runtime_image: String,
    /// Runtime container port.
    pub runtime_port: u16,
    /// Clamped runtime resources.
    pub resources: ResourceBudget,
    /// Fetcher sidecar image.
    pub fetcher_image: String,
    /// Fetcher port.
    pub fetcher_port: u16,
    /// Volume shared between fetcher and runtime.
    pub shared_mount_path: String,
    /// Termination grace period, also used as the pre-stop drain sleep.
    pub termination_grace_period_secs: i64,
}

/// A ClusterIP service in front of a specialized pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionServiceSpec {
    /// Service name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Labels on the service.
    pub labels: BTreeMap<String, String>,
    /// Pod selector.
    pub selector: BTreeMap<String, String>,
    /// Service port.
    pub port: u16,
    /// Target container port.
    pub target_port: u16,
}

/// Operations the executor performs against the container orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Create a pool deployment.
    async fn create_deployment(&self, spec: &PoolDeploymentSpec) -> Result<()>;

    /// Available replicas of a deployment.
    async fn deployment_available_replicas(&self, namespace: &str, name: &str) -> Result<i32>;

    /// Set the replica count of a deployment.
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Pods matching every label in `selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>>;

    /// Fetch one pod.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo>;

    /// Replace a pod's labels, failing with [`OrchestratorError::Conflict`]
    /// if its resource version is no longer `resource_version`.
    async fn relabel_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<PodInfo>;

    /// Create a function service.
    async fn create_service(&self, spec: &FunctionServiceSpec) -> Result<()>;

    /// Every object of `kind` in `namespace`.
    async fn list_objects(&self, kind: ObjectKind, namespace: &str) -> Result<Vec<ObjectSummary>>;

    /// Delete an object. Deployments are deleted with background propagation.
    async fn delete_object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()>;
}
