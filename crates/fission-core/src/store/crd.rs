// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource store backed by `fission.io/v1` custom resources.
//!
//! Objects are read as [`DynamicObject`]s and converted through JSON into the
//! typed resources, so no generated CRD bindings are needed. Change signals
//! come from one `kube::runtime::watcher` stream per kind.

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::{WatchStreamExt, watcher};
use kube::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ResourceStore;
use crate::error::{Error, Result};
use crate::types::{
    Environment, Function, KubernetesWatchTrigger, MessageQueueTrigger, ObjectKey, Package,
    Resource, TimeTrigger,
};

/// CRD group.
pub const FISSION_GROUP: &str = "fission.io";
/// CRD version.
pub const FISSION_VERSION: &str = "v1";

/// Resource store reading Fission CRDs from the Kubernetes API.
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
    namespace: Option<String>,
    changes: watch::Sender<u64>,
}

impl KubeResourceStore {
    /// Create a store. `namespace = None` reads all namespaces.
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            client,
            namespace,
            changes,
        }
    }

    /// Create a store from the ambient kubeconfig or in-cluster config.
    pub async fn try_default(namespace: Option<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    /// Start watchers that bump the change signal for the given kinds.
    ///
    /// Drop or abort the returned handles to stop watching.
    pub fn spawn_change_watchers(&self, kinds: &[(&'static str, &'static str)]) -> Vec<JoinHandle<()>> {
        kinds
            .iter()
            .map(|(kind, plural)| {
                let api = self.list_api(&api_resource(kind, plural));
                let changes = self.changes.clone();
                let kind = *kind;
                tokio::spawn(async move {
                    info!(kind, "Watching for changes");
                    let mut stream = watcher(api, watcher::Config::default())
                        .default_backoff()
                        .boxed();
                    while let Some(event) = stream.next().await {
                        match event {
                            Ok(watcher::Event::Apply(_)) | Ok(watcher::Event::Delete(_)) => {
                                debug!(kind, "Change observed");
                                changes.send_modify(|v| *v += 1);
                            }
                            Ok(watcher::Event::InitDone) => {
                                changes.send_modify(|v| *v += 1);
                            }
                            Ok(_) => {}
                            Err(e) => warn!(kind, error = %e, "Watch error"),
                        }
                    }
                })
            })
            .collect()
    }

    fn list_api(&self, ar: &ApiResource) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn list<T: Resource>(&self) -> Result<Vec<T>> {
        let ar = api_resource(T::KIND, T::PLURAL);
        let objects = self.list_api(&ar).list(&ListParams::default()).await?;
        objects.items.into_iter().map(from_dynamic).collect()
    }

    async fn get<T: Resource>(&self, key: &ObjectKey) -> Result<T> {
        let ar = api_resource(T::KIND, T::PLURAL);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &key.namespace, &ar);
        match api.get_opt(&key.name).await? {
            Some(obj) => from_dynamic(obj),
            None => Err(Error::NotFound(format!("{} {}", T::KIND.to_lowercase(), key))),
        }
    }
}

fn api_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(FISSION_GROUP, FISSION_VERSION, kind),
        plural,
    )
}

fn from_dynamic<T: Resource>(obj: DynamicObject) -> Result<T> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_function(&self, key: &ObjectKey) -> Result<Function> {
        self.get(key).await
    }

    async fn get_environment(&self, key: &ObjectKey) -> Result<Environment> {
        self.get(key).await
    }

    async fn get_package(&self, key: &ObjectKey) -> Result<Package> {
        self.get(key).await
    }

    async fn list_environments(&self) -> Result<Vec<Environment>> {
        self.list().await
    }

    async fn list_functions(&self) -> Result<Vec<Function>> {
        self.list().await
    }

    async fn list_packages(&self) -> Result<Vec<Package>> {
        self.list().await
    }

    async fn list_message_queue_triggers(&self) -> Result<Vec<MessageQueueTrigger>> {
        self.list().await
    }

    async fn list_watch_triggers(&self) -> Result<Vec<KubernetesWatchTrigger>> {
        self.list().await
    }

    async fn list_time_triggers(&self) -> Result<Vec<TimeTrigger>> {
        self.list().await
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_object_converts() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "fission.io/v1",
            "kind": "TimeTrigger",
            "metadata": {
                "name": "nightly",
                "namespace": "default",
                "uid": "1234",
                "resourceVersion": "77"
            },
            "spec": {
                "cron": "0 0 * * *",
                "functionref": {"type": "name", "name": "report"}
            }
        }))
        .unwrap();

        let trigger: TimeTrigger = from_dynamic(obj).unwrap();
        assert_eq!(trigger.metadata.resource_version, "77");
        assert_eq!(trigger.spec.functionref.name, "report");
    }

    #[test]
    fn test_api_resource_path() {
        let ar = api_resource(MessageQueueTrigger::KIND, MessageQueueTrigger::PLURAL);
        assert_eq!(ar.api_version, "fission.io/v1");
        assert_eq!(ar.plural, "messagequeuetriggers");
    }
}
