// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watch stream seam.
//!
//! A subscription only needs "open a watch on this kind from this resource
//! version". [`WatchSource`] names that, so subscriptions run against
//! [`MockWatchSource`] in tests and [`KubeWatchSource`] in a cluster.

mod k8s;
mod mock;

pub use self::k8s::KubeWatchSource;
pub use self::mock::MockWatchSource;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use fission_core::ErrorKind;
use fission_core::types::KubernetesWatchTrigger;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// Server-side timeout of one watch request, in seconds.
pub const WATCH_TIMEOUT_SECS: u32 = 120;

/// Watch source errors.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// The object kind cannot be watched.
    #[error("unsupported object type '{0}'")]
    UnsupportedKind(String),

    /// The watch request failed.
    #[error("watch request failed: {0}")]
    Api(String),
}

impl WatchError {
    /// Coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatchError::UnsupportedKind(_) => ErrorKind::InvalidArgument,
            WatchError::Api(_) => ErrorKind::Transient,
        }
    }
}

impl From<WatchError> for fission_core::Error {
    fn from(err: WatchError) -> Self {
        match err.kind() {
            ErrorKind::InvalidArgument => fission_core::Error::InvalidArgument(err.to_string()),
            _ => fission_core::Error::Transient(err.to_string()),
        }
    }
}

/// Result type for watch sources.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Kind of change a watch event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Object created (or listed at the start of a fresh watch).
    Added,
    /// Object changed.
    Modified,
    /// Object removed.
    Deleted,
}

impl EventType {
    /// Wire name, as sent in `X-Kubernetes-Event-Type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// An object changed.
    Object {
        /// What happened.
        event_type: EventType,
        /// The object as JSON.
        object: Value,
    },
    /// The server reported an error (for example an expired resource version).
    Error(String),
}

impl WatchEvent {
    /// An `ADDED` event.
    pub fn added(object: Value) -> Self {
        WatchEvent::Object {
            event_type: EventType::Added,
            object,
        }
    }

    /// A `MODIFIED` event.
    pub fn modified(object: Value) -> Self {
        WatchEvent::Object {
            event_type: EventType::Modified,
            object,
        }
    }

    /// A `DELETED` event.
    pub fn deleted(object: Value) -> Self {
        WatchEvent::Object {
            event_type: EventType::Deleted,
            object,
        }
    }
}

/// Resource version of a JSON object, if it carries one.
pub fn resource_version(object: &Value) -> Option<&str> {
    object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

/// What to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    /// Namespace; empty watches every namespace.
    pub namespace: String,
    /// Canonical kind, e.g. `Pod`.
    pub kind: &'static str,
    /// Label selector in `k=v,k2=v2` form; empty selects everything.
    pub label_selector: String,
    /// Field selector.
    pub field_selector: Option<String>,
}

impl WatchTarget {
    /// The target described by a trigger.
    pub fn for_trigger(trigger: &KubernetesWatchTrigger) -> Result<Self> {
        let spec = &trigger.spec;
        let kind = canonical_kind(&spec.object_type)
            .ok_or_else(|| WatchError::UnsupportedKind(spec.object_type.clone()))?;
        Ok(Self {
            namespace: spec.namespace.clone(),
            kind,
            label_selector: label_selector(&spec.label_selector),
            field_selector: spec.field_selector.clone().filter(|f| !f.is_empty()),
        })
    }
}

/// Kinds that can be watched, matched case-insensitively.
pub fn canonical_kind(object_type: &str) -> Option<&'static str> {
    match object_type.to_ascii_lowercase().as_str() {
        "pod" | "pods" => Some("Pod"),
        "service" | "services" => Some("Service"),
        "replicationcontroller" | "replicationcontrollers" => Some("ReplicationController"),
        "job" | "jobs" => Some("Job"),
        _ => None,
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Opens watch streams.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Start a watch on `target` from `resource_version` (empty: from now,
    /// with the current objects replayed as `ADDED`).
    ///
    /// The stream ends when the server closes the watch.
    async fn watch(
        &self,
        target: &WatchTarget,
        resource_version: &str,
    ) -> Result<BoxStream<'static, WatchEvent>>;
}
