// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource types observed by the control plane.
//!
//! These mirror the `fission.io/v1` custom resources closely enough that the
//! JSON emitted by the Kubernetes API deserializes straight into them
//! (camelCase field names, base64 literals).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resources::ResourceRequirements;

/// Maximum size of a package archive stored inline in the resource.
pub const ARCHIVE_LITERAL_SIZE_LIMIT: usize = 256 * 1024;

/// Namespace used when a resource does not carry one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Object metadata (the subset of `ObjectMeta` the control plane reads).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Object name.
    pub name: String,
    /// Object namespace.
    #[serde(default)]
    pub namespace: String,
    /// Server-assigned unique id.
    #[serde(default)]
    pub uid: String,
    /// Opaque version used for optimistic concurrency and change detection.
    #[serde(default)]
    pub resource_version: String,
    /// Object labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Metadata {
    /// Create metadata with a name and namespace.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Namespace, falling back to [`DEFAULT_NAMESPACE`].
    pub fn namespace_or_default(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    /// The `(namespace, name)` key of this object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace_or_default(), &self.name)
    }
}

/// A `(namespace, name)` pair identifying an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
}

impl ObjectKey {
    /// Create a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Execution environment: runtime image, builder image and resource budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: EnvironmentSpec,
}

/// Environment spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Interface version of the environment image.
    #[serde(default = "default_env_version")]
    pub version: i32,
    /// Runtime container.
    pub runtime: Runtime,
    /// Builder container, if the environment supports builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<Builder>,
    /// Number of pre-warmed pods.
    #[serde(default)]
    pub poolsize: i32,
    /// Resource budget for the runtime container.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Keep the archive after loading it into the runtime.
    #[serde(default, rename = "keeparchive")]
    pub keep_archive: bool,
    /// Grace period (seconds) given to specialized pods on deletion.
    #[serde(default = "default_termination_grace_period")]
    pub termination_grace_period: i64,
}

fn default_env_version() -> i32 {
    1
}

fn default_termination_grace_period() -> i64 {
    360
}

/// Runtime container of an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    /// Container image reference.
    pub image: String,
}

/// Builder container of an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Builder {
    /// Container image reference.
    pub image: String,
    /// Build command.
    #[serde(default)]
    pub command: String,
}

impl Environment {
    /// Effective pool size.
    ///
    /// Environments older than interface version 3 had no pool size field; they
    /// get the historical default of 3. Otherwise the size is at least 1.
    pub fn pool_size(&self) -> i32 {
        if self.spec.version < 3 {
            3
        } else {
            self.spec.poolsize.max(1)
        }
    }
}

// ============================================================================
// Package
// ============================================================================

/// Versioned source/deployment archives for a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: PackageSpec,
    /// Build status.
    #[serde(default)]
    pub status: PackageStatus,
}

/// Package spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Environment used to build and run this package.
    pub environment: EnvironmentReference,
    /// Source archive.
    #[serde(default)]
    pub source: Archive,
    /// Deployment archive.
    #[serde(default)]
    pub deployment: Archive,
    /// Build command override.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_cmd: String,
}

/// Package build status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    /// Build state.
    #[serde(default)]
    pub build_status: BuildStatus,
    /// Build output.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_log: String,
}

/// Build state of a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// No build required.
    #[default]
    None,
    /// Build queued.
    Pending,
    /// Build in progress.
    Running,
    /// Build finished successfully.
    Succeeded,
    /// Build failed.
    Failed,
}

/// How archive contents are carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    /// Inline bytes in the resource.
    #[default]
    Literal,
    /// Downloadable from a URL.
    Url,
}

/// Checksum algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// SHA-256, hex encoded.
    #[default]
    Sha256,
}

/// Archive checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm.
    #[serde(rename = "type")]
    pub checksum_type: ChecksumType,
    /// Hex-encoded digest.
    pub sum: String,
}

impl Checksum {
    /// SHA-256 checksum of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        Self {
            checksum_type: ChecksumType::Sha256,
            sum: hex::encode(Sha256::digest(data)),
        }
    }
}

/// A package archive, either inline or by URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Carrier type.
    #[serde(rename = "type", default)]
    pub archive_type: ArchiveType,
    /// Inline contents.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub literal: Option<Vec<u8>>,
    /// Download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Checksum of the contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl Archive {
    /// Inline archive.
    pub fn literal(bytes: Vec<u8>) -> Self {
        Self {
            archive_type: ArchiveType::Literal,
            checksum: Some(Checksum::sha256(&bytes)),
            literal: Some(bytes),
            url: None,
        }
    }

    /// URL archive with a known checksum.
    pub fn url(url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            archive_type: ArchiveType::Url,
            literal: None,
            url: Some(url.into()),
            checksum: Some(checksum),
        }
    }

    /// Whether the archive carries no content at all.
    pub fn is_empty(&self) -> bool {
        self.literal.as_ref().is_none_or(|l| l.is_empty())
            && self.url.as_ref().is_none_or(|u| u.is_empty())
    }

    /// Check the archive against the size and checksum rules.
    ///
    /// Inline contents are limited to [`ARCHIVE_LITERAL_SIZE_LIMIT`]; larger
    /// artifacts must be URL archives with a SHA-256 checksum.
    pub fn validate(&self) -> Result<()> {
        match self.archive_type {
            ArchiveType::Literal => {
                let len = self.literal.as_ref().map_or(0, Vec::len);
                if len > ARCHIVE_LITERAL_SIZE_LIMIT {
                    return Err(Error::InvalidArgument(format!(
                        "literal archive is {} bytes, limit is {} bytes; upload it and use a URL archive",
                        len, ARCHIVE_LITERAL_SIZE_LIMIT
                    )));
                }
            }
            ArchiveType::Url => {
                if self.url.as_ref().is_none_or(|u| u.is_empty()) {
                    return Err(Error::InvalidArgument(
                        "url archive without a url".to_string(),
                    ));
                }
                match &self.checksum {
                    Some(c) if !c.sum.is_empty() => {}
                    _ => {
                        return Err(Error::InvalidArgument(
                            "url archive requires a sha256 checksum".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// `Option<Vec<u8>>` encoded as base64, the way Kubernetes encodes `[]byte`.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Function
// ============================================================================

/// A user function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: FunctionSpec,
}

/// Function spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Environment the function runs in.
    pub environment: EnvironmentReference,
    /// Package holding the function code.
    pub package: FunctionPackageRef,
    /// Secrets mounted into the function pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretReference>,
    /// Config maps mounted into the function pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configmaps: Vec<ConfigMapReference>,
    /// Scaling and executor selection.
    #[serde(default)]
    pub invoke_strategy: InvokeStrategy,
    /// Maximum time a single invocation may take, in seconds.
    #[serde(default = "default_function_timeout")]
    pub function_timeout: i32,
}

fn default_function_timeout() -> i32 {
    60
}

/// Reference to an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentReference {
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Name.
    pub name: String,
}

/// Package reference pinned to an exact resource version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRef {
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Resource version the function was built against.
    #[serde(default)]
    pub resourceversion: String,
}

/// Package reference plus the entrypoint inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionPackageRef {
    /// The package.
    pub packageref: PackageRef,
    /// Entrypoint; meaning is environment specific.
    #[serde(default)]
    pub function_name: String,
}

/// Reference to a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Name.
    pub name: String,
}

/// Reference to a config map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapReference {
    /// Namespace.
    #[serde(default)]
    pub namespace: String,
    /// Name.
    pub name: String,
}

/// Invoke strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeStrategy {
    /// Execution strategy.
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
}

/// Executor selection and scaling bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStrategy {
    /// Which executor serves the function.
    #[serde(default)]
    pub executor_type: ExecutorType,
    /// Minimum replicas.
    #[serde(default)]
    pub min_scale: i32,
    /// Maximum replicas.
    #[serde(default)]
    pub max_scale: i32,
    /// CPU utilisation target for autoscaling.
    #[serde(default, rename = "targetcpu")]
    pub target_cpu_percent: i32,
}

/// Executor type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorType {
    /// Specialize a pre-warmed pool pod.
    #[default]
    Poolmgr,
    /// Dedicated deployment per function.
    Newdeploy,
}

impl Function {
    /// Key of the function's environment, defaulting the namespace to the function's.
    pub fn environment_key(&self) -> ObjectKey {
        let ns = if self.spec.environment.namespace.is_empty() {
            self.metadata.namespace_or_default()
        } else {
            &self.spec.environment.namespace
        };
        ObjectKey::new(ns, &self.spec.environment.name)
    }

    /// Key of the function's package, defaulting the namespace to the function's.
    pub fn package_key(&self) -> ObjectKey {
        let pkg = &self.spec.package.packageref;
        let ns = if pkg.namespace.is_empty() {
            self.metadata.namespace_or_default()
        } else {
            &pkg.namespace
        };
        ObjectKey::new(ns, &pkg.name)
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// How a trigger names its function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionReferenceType {
    /// Reference by function name.
    #[default]
    #[serde(rename = "name")]
    FunctionName,
    /// Weighted references (canary); not dispatched by trigger runtimes.
    #[serde(rename = "function-weights")]
    FunctionWeights,
}

/// Reference from a trigger to a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReference {
    /// Reference type.
    #[serde(rename = "type", default)]
    pub reference_type: FunctionReferenceType,
    /// Function name.
    pub name: String,
}

impl FunctionReference {
    /// Reference a function by name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            reference_type: FunctionReferenceType::FunctionName,
            name: name.into(),
        }
    }
}

/// HTTP trigger (routed by the router; carried for completeness of the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpTrigger {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: HttpTriggerSpec,
}

/// HTTP trigger spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTriggerSpec {
    /// Host to match.
    #[serde(default)]
    pub host: String,
    /// URL path.
    #[serde(default)]
    pub relativeurl: String,
    /// HTTP method.
    #[serde(default)]
    pub method: String,
    /// Target function.
    pub functionref: FunctionReference,
}

/// Cron-driven trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeTrigger {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: TimeTriggerSpec,
}

/// Time trigger spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeTriggerSpec {
    /// Cron expression.
    pub cron: String,
    /// Target function.
    pub functionref: FunctionReference,
}

/// Trigger fired by Kubernetes watch events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesWatchTrigger {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: KubernetesWatchTriggerSpec,
}

/// Watch trigger spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesWatchTriggerSpec {
    /// Namespace to watch.
    #[serde(default)]
    pub namespace: String,
    /// Object kind to watch (Pod, Service, ReplicationController, Job).
    #[serde(rename = "type")]
    pub object_type: String,
    /// Label selector.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
    /// Field selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<String>,
    /// Target function.
    pub functionref: FunctionReference,
}

/// Broker family of a message queue trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageQueueType {
    /// Kafka.
    #[serde(rename = "kafka")]
    Kafka,
    /// NATS streaming (served through JetStream).
    #[serde(rename = "nats-streaming")]
    Nats,
    /// Azure storage queue.
    #[serde(rename = "azure-storage-queue")]
    AzureStorageQueue,
    /// In-process broker.
    #[serde(rename = "memory")]
    Memory,
}

impl MessageQueueType {
    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageQueueType::Kafka => "kafka",
            MessageQueueType::Nats => "nats-streaming",
            MessageQueueType::AzureStorageQueue => "azure-storage-queue",
            MessageQueueType::Memory => "memory",
        }
    }
}

impl fmt::Display for MessageQueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageQueueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kafka" => Ok(MessageQueueType::Kafka),
            "nats-streaming" | "nats" => Ok(MessageQueueType::Nats),
            "azure-storage-queue" => Ok(MessageQueueType::AzureStorageQueue),
            "memory" => Ok(MessageQueueType::Memory),
            other => Err(Error::InvalidArgument(format!(
                "unknown message queue type '{}'",
                other
            ))),
        }
    }
}

/// Which component consumes a message queue trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqtKind {
    /// Consumed by the in-cluster trigger runtime.
    #[default]
    Fission,
    /// Consumed by KEDA scaled jobs.
    Keda,
}

/// Message queue trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageQueueTrigger {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: MessageQueueTriggerSpec,
}

/// Message queue trigger spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQueueTriggerSpec {
    /// Target function.
    #[serde(rename = "functionref")]
    pub function_reference: FunctionReference,
    /// Broker family.
    pub message_queue_type: MessageQueueType,
    /// Source topic.
    pub topic: String,
    /// Topic receiving successful responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_topic: Option<String>,
    /// Topic receiving final failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_topic: Option<String>,
    /// Retries after the first attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Content type sent to the function.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// KEDA polling interval (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval: Option<i32>,
    /// KEDA cooldown period (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<i32>,
    /// KEDA minimum replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replica_count: Option<i32>,
    /// KEDA maximum replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replica_count: Option<i32>,
    /// Broker specific settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Secret holding broker credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Consumer of this trigger.
    #[serde(default)]
    pub mqtkind: MqtKind,
    /// Deliver messages one at a time, in order.
    #[serde(default)]
    pub sequential: bool,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

impl MessageQueueTriggerSpec {
    /// Response topic, treating an empty string as unset.
    pub fn response_topic(&self) -> Option<&str> {
        self.resp_topic.as_deref().filter(|t| !t.is_empty())
    }

    /// Error topic, treating an empty string as unset.
    pub fn error_topic(&self) -> Option<&str> {
        self.error_topic.as_deref().filter(|t| !t.is_empty())
    }
}

// ============================================================================
// Resource trait
// ============================================================================

/// Common accessors for every stored resource kind.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// CRD kind.
    const KIND: &'static str;
    /// CRD plural name.
    const PLURAL: &'static str;

    /// Object metadata.
    fn metadata(&self) -> &Metadata;

    /// Mutable object metadata.
    fn metadata_mut(&mut self) -> &mut Metadata;

    /// `(namespace, name)` key.
    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }

    /// Resource version.
    fn resource_version(&self) -> &str {
        &self.metadata().resource_version
    }
}

macro_rules! impl_resource {
    ($($ty:ty => ($kind:literal, $plural:literal)),* $(,)?) => {
        $(
            impl Resource for $ty {
                const KIND: &'static str = $kind;
                const PLURAL: &'static str = $plural;

                fn metadata(&self) -> &Metadata {
                    &self.metadata
                }

                fn metadata_mut(&mut self) -> &mut Metadata {
                    &mut self.metadata
                }
            }
        )*
    };
}

impl_resource! {
    Environment => ("Environment", "environments"),
    Package => ("Package", "packages"),
    Function => ("Function", "functions"),
    HttpTrigger => ("HTTPTrigger", "httptriggers"),
    TimeTrigger => ("TimeTrigger", "timetriggers"),
    KubernetesWatchTrigger => ("KubernetesWatchTrigger", "kuberneteswatchtriggers"),
    MessageQueueTrigger => ("MessageQueueTrigger", "messagequeuetriggers"),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(version: i32, poolsize: i32) -> Environment {
        Environment {
            metadata: Metadata::new("default", "python"),
            spec: EnvironmentSpec {
                version,
                runtime: Runtime {
                    image: "fission/python-env".into(),
                },
                builder: None,
                poolsize,
                resources: ResourceRequirements::default(),
                keep_archive: false,
                termination_grace_period: 360,
            },
        }
    }

    #[test]
    fn test_pool_size_defaults_for_old_versions() {
        assert_eq!(env(1, 10).pool_size(), 3);
        assert_eq!(env(2, 0).pool_size(), 3);
        assert_eq!(env(3, 10).pool_size(), 10);
        assert_eq!(env(3, 0).pool_size(), 1);
    }

    #[test]
    fn test_literal_limit_boundary() {
        let at_limit = Archive::literal(vec![0u8; ARCHIVE_LITERAL_SIZE_LIMIT]);
        assert!(at_limit.validate().is_ok());

        let over = Archive::literal(vec![0u8; ARCHIVE_LITERAL_SIZE_LIMIT + 1]);
        let err = over.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_url_archive_requires_checksum() {
        let mut archive = Archive::url("http://storagesvc/v1/archive?id=x", Checksum::sha256(b"x"));
        assert!(archive.validate().is_ok());
        archive.checksum = None;
        assert!(archive.validate().is_err());
    }

    #[test]
    fn test_archive_literal_is_base64_on_the_wire() {
        let archive = Archive::literal(b"hello".to_vec());
        let json = serde_json::to_value(&archive).unwrap();
        assert_eq!(json["type"], "literal");
        assert_eq!(json["literal"], "aGVsbG8=");
        let back: Archive = serde_json::from_value(json).unwrap();
        assert_eq!(back.literal.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_mqt_spec_deserializes_crd_json() {
        let json = serde_json::json!({
            "functionref": {"type": "name", "name": "hello"},
            "messageQueueType": "kafka",
            "topic": "input",
            "respTopic": "",
            "errorTopic": "errors",
            "maxRetries": 2,
            "contentType": "text/plain",
            "mqtkind": "fission"
        });
        let spec: MessageQueueTriggerSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.message_queue_type, MessageQueueType::Kafka);
        assert_eq!(spec.response_topic(), None);
        assert_eq!(spec.error_topic(), Some("errors"));
        assert_eq!(spec.max_retries, 2);
        assert!(!spec.sequential);
    }

    #[test]
    fn test_function_keys_default_namespace() {
        let f = Function {
            metadata: Metadata::new("team-a", "hello"),
            spec: FunctionSpec {
                environment: EnvironmentReference {
                    namespace: String::new(),
                    name: "python".into(),
                },
                ..Default::default()
            },
        };
        assert_eq!(f.environment_key(), ObjectKey::new("team-a", "python"));
        assert_eq!(f.metadata.key().to_string(), "team-a/hello");
    }

    #[test]
    fn test_message_queue_type_parse() {
        assert_eq!(
            "nats-streaming".parse::<MessageQueueType>().unwrap(),
            MessageQueueType::Nats
        );
        assert!("rabbit".parse::<MessageQueueType>().is_err());
    }
}
