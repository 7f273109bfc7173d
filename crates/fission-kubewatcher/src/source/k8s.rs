// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watch source backed by the Kubernetes API.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use kube::Client;
use kube::api::{Api, WatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, WatchEvent as KubeEvent};
use tracing::debug;

use super::{Result, WATCH_TIMEOUT_SECS, WatchError, WatchEvent, WatchSource, WatchTarget};

/// Watches core and batch objects as [`DynamicObject`]s.
#[derive(Clone)]
pub struct KubeWatchSource {
    client: Client,
}

impl KubeWatchSource {
    /// Create a source from a client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a source from the ambient kubeconfig or in-cluster config.
    pub async fn try_default() -> std::result::Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, target: &WatchTarget) -> Api<DynamicObject> {
        let group = match target.kind {
            "Job" => "batch",
            _ => "",
        };
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, "v1", target.kind));
        if target.namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &target.namespace, &resource)
        }
    }
}

fn to_json(object: DynamicObject) -> serde_json::Value {
    serde_json::to_value(object).unwrap_or_default()
}

#[async_trait]
impl WatchSource for KubeWatchSource {
    async fn watch(
        &self,
        target: &WatchTarget,
        resource_version: &str,
    ) -> Result<BoxStream<'static, WatchEvent>> {
        let mut params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        if !target.label_selector.is_empty() {
            params = params.labels(&target.label_selector);
        }
        if let Some(fields) = &target.field_selector {
            params = params.fields(fields);
        }

        debug!(
            kind = target.kind,
            namespace = %target.namespace,
            resource_version,
            "Opening watch"
        );
        let stream = self
            .api(target)
            .watch(&params, resource_version)
            .await
            .map_err(|e| WatchError::Api(e.to_string()))?;

        Ok(stream
            .filter_map(|event| {
                futures::future::ready(match event {
                    Ok(KubeEvent::Added(o)) => Some(WatchEvent::added(to_json(o))),
                    Ok(KubeEvent::Modified(o)) => Some(WatchEvent::modified(to_json(o))),
                    Ok(KubeEvent::Deleted(o)) => Some(WatchEvent::deleted(to_json(o))),
                    Ok(KubeEvent::Bookmark(_)) => None,
                    Ok(KubeEvent::Error(e)) => Some(WatchEvent::Error(format!("{} ({})", e.message, e.code))),
                    Err(e) => Some(WatchEvent::Error(e.to_string())),
                })
            })
            .boxed())
    }
}
