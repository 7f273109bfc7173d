// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process resource store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use super::ResourceStore;
use crate::error::{Error, Result};
use crate::types::{
    Environment, Function, KubernetesWatchTrigger, MessageQueueTrigger, ObjectKey, Package,
    Resource, TimeTrigger,
};

#[derive(Default)]
struct Objects {
    environments: BTreeMap<ObjectKey, Environment>,
    functions: BTreeMap<ObjectKey, Function>,
    packages: BTreeMap<ObjectKey, Package>,
    mq_triggers: BTreeMap<ObjectKey, MessageQueueTrigger>,
    watch_triggers: BTreeMap<ObjectKey, KubernetesWatchTrigger>,
    time_triggers: BTreeMap<ObjectKey, TimeTrigger>,
}

/// Resource store held in memory.
///
/// Writes assign a fresh resource version (like the API server does) and bump
/// the change signal. [`Self::set_failing`] makes every read fail, which is
/// how tests simulate an unreachable API server.
pub struct InMemoryResourceStore {
    objects: RwLock<Objects>,
    next_version: AtomicU64,
    failing: AtomicBool,
    changes: watch::Sender<u64>,
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! upsert_delete {
    ($upsert:ident, $delete:ident, $field:ident, $ty:ty) => {
        #[doc = concat!("Create or replace a `", stringify!($ty), "`, returning the stored copy.")]
        pub async fn $upsert(&self, obj: $ty) -> $ty {
            let stored = self.stamp(obj);
            self.objects
                .write()
                .await
                .$field
                .insert(stored.key(), stored.clone());
            self.notify();
            stored
        }

        #[doc = concat!("Delete a `", stringify!($ty), "`; returns whether it existed.")]
        pub async fn $delete(&self, key: &ObjectKey) -> bool {
            let removed = self.objects.write().await.$field.remove(key).is_some();
            if removed {
                self.notify();
            }
            removed
        }
    };
}

impl InMemoryResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            objects: RwLock::new(Objects::default()),
            next_version: AtomicU64::new(1),
            failing: AtomicBool::new(false),
            changes,
        }
    }

    /// Make every read fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    upsert_delete!(upsert_environment, delete_environment, environments, Environment);
    upsert_delete!(upsert_function, delete_function, functions, Function);
    upsert_delete!(upsert_package, delete_package, packages, Package);
    upsert_delete!(
        upsert_message_queue_trigger,
        delete_message_queue_trigger,
        mq_triggers,
        MessageQueueTrigger
    );
    upsert_delete!(
        upsert_watch_trigger,
        delete_watch_trigger,
        watch_triggers,
        KubernetesWatchTrigger
    );
    upsert_delete!(upsert_time_trigger, delete_time_trigger, time_triggers, TimeTrigger);

    fn stamp<T: Resource>(&self, mut obj: T) -> T {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let meta = obj.metadata_mut();
        meta.resource_version = version.to_string();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        if meta.namespace.is_empty() {
            meta.namespace = crate::types::DEFAULT_NAMESPACE.to_string();
        }
        obj
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v += 1);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transient("resource store unavailable".to_string()));
        }
        Ok(())
    }

    fn lookup<T: Resource>(map: &BTreeMap<ObjectKey, T>, key: &ObjectKey) -> Result<T> {
        map.get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} {}", T::KIND.to_lowercase(), key)))
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_function(&self, key: &ObjectKey) -> Result<Function> {
        self.check()?;
        Self::lookup(&self.objects.read().await.functions, key)
    }

    async fn get_environment(&self, key: &ObjectKey) -> Result<Environment> {
        self.check()?;
        Self::lookup(&self.objects.read().await.environments, key)
    }

    async fn get_package(&self, key: &ObjectKey) -> Result<Package> {
        self.check()?;
        Self::lookup(&self.objects.read().await.packages, key)
    }

    async fn list_environments(&self) -> Result<Vec<Environment>> {
        self.check()?;
        Ok(self.objects.read().await.environments.values().cloned().collect())
    }

    async fn list_functions(&self) -> Result<Vec<Function>> {
        self.check()?;
        Ok(self.objects.read().await.functions.values().cloned().collect())
    }

    async fn list_packages(&self) -> Result<Vec<Package>> {
        self.check()?;
        Ok(self.objects.read().await.packages.values().cloned().collect())
    }

    async fn list_message_queue_triggers(&self) -> Result<Vec<MessageQueueTrigger>> {
        self.check()?;
        Ok(self.objects.read().await.mq_triggers.values().cloned().collect())
    }

    async fn list_watch_triggers(&self) -> Result<Vec<KubernetesWatchTrigger>> {
        self.check()?;
        Ok(self.objects.read().await.watch_triggers.values().cloned().collect())
    }

    async fn list_time_triggers(&self) -> Result<Vec<TimeTrigger>> {
        self.check()?;
        Ok(self.objects.read().await.time_triggers.values().cloned().collect())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Metadata, TimeTriggerSpec, FunctionReference};

    fn time_trigger(name: &str, cron: &str) -> TimeTrigger {
        TimeTrigger {
            metadata: Metadata::new("default", name),
            spec: TimeTriggerSpec {
                cron: cron.to_string(),
                functionref: FunctionReference::by_name("hello"),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_assigns_versions() {
        let store = InMemoryResourceStore::new();
        let first = store.upsert_time_trigger(time_trigger("t", "@every 1m")).await;
        let second = store.upsert_time_trigger(time_trigger("t", "@every 2m")).await;
        assert_ne!(first.metadata.resource_version, second.metadata.resource_version);
        assert!(!first.metadata.uid.is_empty());

        let listed = store.list_time_triggers().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].spec.cron, "@every 2m");
    }

    #[tokio::test]
    async fn test_change_signal_bumps() {
        let store = InMemoryResourceStore::new();
        let mut rx = store.changes();
        store.upsert_time_trigger(time_trigger("t", "@hourly")).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        assert!(store.delete_time_trigger(&ObjectKey::new("default", "t")).await);
        assert!(!store.delete_time_trigger(&ObjectKey::new("default", "t")).await);
        assert_eq!(*store.changes().borrow(), 2);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = InMemoryResourceStore::new();
        let err = store
            .get_function(&ObjectKey::new("default", "nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "function default/nope not found");
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = InMemoryResourceStore::new();
        store.set_failing(true);
        assert!(store.list_environments().await.is_err());
        store.set_failing(false);
        assert!(store.list_environments().await.unwrap().is_empty());
    }
}
