// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger subscription map.
//!
//! Maps `(namespace, triggerName)` to the trigger plus a runtime handle (a
//! consumer task, a watch, a cron job). The map is owned by a single actor
//! task; [`SubscriptionMap`] is the cheap, cloneable handle that talks to it
//! over an `mpsc` channel with `oneshot` replies.
//!
//! Semantics:
//!
//! - `add` of an existing key fails with `already-exists` and leaves the
//!   map unchanged
//! - `delete` of a missing key is a no-op that logs a warning
//! - `update` replaces the entry and hands the previous one back so the
//!   caller can stop its handle

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::ObjectKey;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// A trigger together with the handle of its running subscription.
#[derive(Debug)]
pub struct Subscription<T, H> {
    /// The trigger as last applied.
    pub trigger: T,
    /// Runtime handle.
    pub handle: H,
}

enum Command<T, H> {
    Add {
        key: ObjectKey,
        entry: Subscription<T, H>,
        reply: oneshot::Sender<std::result::Result<(), Subscription<T, H>>>,
    },
    Update {
        key: ObjectKey,
        entry: Subscription<T, H>,
        reply: oneshot::Sender<Option<Subscription<T, H>>>,
    },
    Get {
        key: ObjectKey,
        reply: oneshot::Sender<Option<T>>,
    },
    Delete {
        key: ObjectKey,
        reply: oneshot::Sender<Option<Subscription<T, H>>>,
    },
    List {
        reply: oneshot::Sender<Vec<(ObjectKey, T)>>,
    },
    Drain {
        reply: oneshot::Sender<Vec<(ObjectKey, Subscription<T, H>)>>,
    },
}

/// Handle to a subscription map actor.
pub struct SubscriptionMap<T, H> {
    tx: mpsc::Sender<Command<T, H>>,
}

impl<T, H> Clone for SubscriptionMap<T, H> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T, H> SubscriptionMap<T, H>
where
    T: Clone + Send + 'static,
    H: Send + 'static,
{
    /// Spawn the actor and return a handle to it.
    ///
    /// The actor stops when the last handle is dropped.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        tokio::spawn(run(rx));
        Self { tx }
    }

    async fn call<R>(&self, cmd: Command<T, H>, rx: oneshot::Receiver<R>) -> Result<R> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| Error::Fatal("subscription map stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Fatal("subscription map dropped reply".to_string()))
    }

    /// Insert a new subscription.
    ///
    /// If the key is taken, the map is left unchanged and the rejected handle
    /// is returned inside the error so the caller can stop it.
    pub async fn add(
        &self,
        key: ObjectKey,
        trigger: T,
        handle: H,
    ) -> std::result::Result<(), AddError<T, H>> {
        let (reply, rx) = oneshot::channel();
        let entry = Subscription { trigger, handle };
        match self.call(Command::Add { key: key.clone(), entry, reply }, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(rejected)) => Err(AddError::AlreadyExists { key, rejected }),
            Err(e) => Err(AddError::Stopped(e)),
        }
    }

    /// Replace (or insert) a subscription, returning the previous entry.
    pub async fn update(&self, key: ObjectKey, trigger: T, handle: H) -> Result<Option<Subscription<T, H>>> {
        let (reply, rx) = oneshot::channel();
        let entry = Subscription { trigger, handle };
        self.call(Command::Update { key, entry, reply }, rx).await
    }

    /// The trigger stored under `key`.
    pub async fn get(&self, key: &ObjectKey) -> Result<Option<T>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Get { key: key.clone(), reply }, rx).await
    }

    /// Remove and return a subscription.
    pub async fn delete(&self, key: &ObjectKey) -> Result<Option<Subscription<T, H>>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Delete { key: key.clone(), reply }, rx).await
    }

    /// Snapshot of every `(key, trigger)` pair.
    pub async fn list(&self) -> Result<Vec<(ObjectKey, T)>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::List { reply }, rx).await
    }

    /// Remove and return every subscription (used on shutdown).
    pub async fn drain(&self) -> Result<Vec<(ObjectKey, Subscription<T, H>)>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Drain { reply }, rx).await
    }
}

/// Failure of [`SubscriptionMap::add`].
#[derive(Debug)]
pub enum AddError<T, H> {
    /// The key is already subscribed.
    AlreadyExists {
        /// The key.
        key: ObjectKey,
        /// The entry that was not inserted.
        rejected: Subscription<T, H>,
    },
    /// The actor is gone.
    Stopped(Error),
}

impl<T, H> From<AddError<T, H>> for Error {
    fn from(e: AddError<T, H>) -> Self {
        match e {
            AddError::AlreadyExists { key, .. } => {
                Error::AlreadyExists(format!("subscription {}", key))
            }
            AddError::Stopped(e) => e,
        }
    }
}

async fn run<T: Clone, H>(mut rx: mpsc::Receiver<Command<T, H>>) {
    let mut entries: std::collections::HashMap<ObjectKey, Subscription<T, H>> =
        std::collections::HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Add { key, entry, reply } => {
                if entries.contains_key(&key) {
                    debug!(key = %key, "Subscription already exists");
                    let _ = reply.send(Err(entry));
                } else {
                    entries.insert(key, entry);
                    let _ = reply.send(Ok(()));
                }
            }
            Command::Update { key, entry, reply } => {
                let _ = reply.send(entries.insert(key, entry));
            }
            Command::Get { key, reply } => {
                let _ = reply.send(entries.get(&key).map(|e| e.trigger.clone()));
            }
            Command::Delete { key, reply } => {
                let removed = entries.remove(&key);
                if removed.is_none() {
                    warn!(key = %key, "Subscription to delete does not exist");
                }
                let _ = reply.send(removed);
            }
            Command::List { reply } => {
                let mut all: Vec<_> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.trigger.clone()))
                    .collect();
                all.sort_by(|a, b| a.0.cmp(&b.0));
                let _ = reply.send(all);
            }
            Command::Drain { reply } => {
                let _ = reply.send(entries.drain().collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn test_duplicate_add_leaves_map_unchanged() {
        let map: SubscriptionMap<String, u32> = SubscriptionMap::start();
        map.add(key("a"), "v1".into(), 1).await.unwrap();

        let err = map.add(key("a"), "v2".into(), 2).await.unwrap_err();
        match err {
            AddError::AlreadyExists { rejected, .. } => assert_eq!(rejected.handle, 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(map.get(&key("a")).await.unwrap().as_deref(), Some("v1"));

        let err: Error = map.add(key("a"), "v3".into(), 3).await.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let map: SubscriptionMap<String, u32> = SubscriptionMap::start();
        assert!(map.delete(&key("missing")).await.unwrap().is_none());
        assert!(map.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_returns_previous() {
        let map: SubscriptionMap<String, u32> = SubscriptionMap::start();
        assert!(map.update(key("a"), "v1".into(), 1).await.unwrap().is_none());
        let prev = map.update(key("a"), "v2".into(), 2).await.unwrap().unwrap();
        assert_eq!(prev.trigger, "v1");
        assert_eq!(prev.handle, 1);
        assert_eq!(map.get(&key("a")).await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_list_and_drain() {
        let map: SubscriptionMap<String, u32> = SubscriptionMap::start();
        map.add(key("b"), "b".into(), 2).await.unwrap();
        map.add(key("a"), "a".into(), 1).await.unwrap();

        let listed = map.list().await.unwrap();
        assert_eq!(listed.iter().map(|(k, _)| k.name.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        let drained = map.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(map.list().await.unwrap().is_empty());
    }
}
