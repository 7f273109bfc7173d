// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Label keys stamped on orchestrator resources owned by the executor.

use std::collections::BTreeMap;

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Name of the environment a pool serves.
pub const ENVIRONMENT_NAME: &str = "environmentName";
/// Namespace of the environment a pool serves.
pub const ENVIRONMENT_NAMESPACE: &str = "environmentNamespace";
/// UID of the environment a pool serves.
pub const ENVIRONMENT_UID: &str = "environmentUid";
/// Name of the function a pod was specialized for.
pub const FUNCTION_NAME: &str = "functionName";
/// Namespace of the function a pod was specialized for.
pub const FUNCTION_NAMESPACE: &str = "functionNamespace";
/// UID of the function a pod was specialized for.
pub const FUNCTION_UID: &str = "functionUid";
/// Random id of the executor instance that owns the resource.
pub const EXECUTOR_INSTANCE_ID: &str = "executorInstanceId";
/// Executor flavour that created the resource.
pub const EXECUTOR_TYPE: &str = "executorType";
/// `"true"` while a pool pod is generic and available for specialization.
pub const MANAGED: &str = "managed";
/// Deployment a pool pod belongs to.
pub const POOL: &str = "pool";

/// Length of an executor instance id.
pub const INSTANCE_ID_LEN: usize = 8;

/// Fresh random alphanumeric instance id.
pub fn instance_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INSTANCE_ID_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Render a label map as a Kubernetes label selector (`k=v,k2=v2`).
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether every pair in `selector` is present in `labels`.
pub fn matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
