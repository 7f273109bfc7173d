// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function invocation conventions shared by all trigger runtimes.

use crate::types::DEFAULT_NAMESPACE;

/// Topic the message came from.
pub const HEADER_MQ_TOPIC: &str = "X-Fission-MQTrigger-Topic";
/// Topic the response is published to.
pub const HEADER_MQ_RESP_TOPIC: &str = "X-Fission-MQTrigger-RespTopic";
/// Topic failures are published to.
pub const HEADER_MQ_ERROR_TOPIC: &str = "X-Fission-MQTrigger-ErrorTopic";
/// Retry attempt number (set from the first retry on).
pub const HEADER_MQ_RETRY_COUNT: &str = "X-Fission-MQTrigger-RetryCount";
/// Watch event type (ADDED, MODIFIED, DELETED).
pub const HEADER_KUBE_EVENT_TYPE: &str = "X-Kubernetes-Event-Type";
/// Kind of the watched object.
pub const HEADER_KUBE_OBJECT_TYPE: &str = "X-Kubernetes-Object-Type";
/// Name of the time trigger that fired.
pub const HEADER_TIMER_NAME: &str = "X-Fission-Timer-Name";

/// Router-relative path of a function.
///
/// Functions in the default namespace are served at
/// `/fission-function/<name>`; others at `/fission-function/<ns>/<name>`.
pub fn url_for_function(name: &str, namespace: &str) -> String {
    if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
        format!("/fission-function/{}", name)
    } else {
        format!("/fission-function/{}/{}", namespace, name)
    }
}

/// Join a base URL and a path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Absolute URL of a function behind the router.
pub fn function_url(router_url: &str, name: &str, namespace: &str) -> String {
    join_url(router_url, &url_for_function(name, namespace))
}
