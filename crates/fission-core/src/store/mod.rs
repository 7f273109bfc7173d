// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired-state store.
//!
//! Every runtime reads environments, functions, packages and triggers through
//! [`ResourceStore`]. Informers are modelled as periodic resync plus a change
//! signal: [`ResourceStore::changes`] yields a receiver whose value bumps on
//! every observed change, and reconcilers re-list when it does.
//!
//! Two implementations:
//!
//! - [`InMemoryResourceStore`]: tests and standalone runs
//! - `KubeResourceStore` (feature `kube`): `fission.io/v1` custom resources

mod memory;

#[cfg(feature = "kube")]
mod crd;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::types::{
    Environment, Function, KubernetesWatchTrigger, MessageQueueTrigger, ObjectKey, Package,
    TimeTrigger,
};

pub use memory::InMemoryResourceStore;

#[cfg(feature = "kube")]
pub use crd::KubeResourceStore;

/// Read access to desired state.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a function.
    async fn get_function(&self, key: &ObjectKey) -> Result<Function>;

    /// Fetch an environment.
    async fn get_environment(&self, key: &ObjectKey) -> Result<Environment>;

    /// Fetch a package.
    async fn get_package(&self, key: &ObjectKey) -> Result<Package>;

    /// List all environments.
    async fn list_environments(&self) -> Result<Vec<Environment>>;

    /// List all functions.
    async fn list_functions(&self) -> Result<Vec<Function>>;

    /// List all packages.
    async fn list_packages(&self) -> Result<Vec<Package>>;

    /// List all message queue triggers.
    async fn list_message_queue_triggers(&self) -> Result<Vec<MessageQueueTrigger>>;

    /// List all Kubernetes watch triggers.
    async fn list_watch_triggers(&self) -> Result<Vec<KubernetesWatchTrigger>>;

    /// List all time triggers.
    async fn list_time_triggers(&self) -> Result<Vec<TimeTrigger>>;

    /// Change signal; the value increases whenever any object changes.
    fn changes(&self) -> watch::Receiver<u64>;
}
