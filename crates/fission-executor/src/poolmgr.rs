// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool manager.
//!
//! Owns the `environment → pool` registry. Pools are keyed by environment
//! namespace, name and resource version, so editing an environment yields a
//! new pool while the old one is cleaned up on the next sweep.
//!
//! Pool creation can take minutes (image pulls), so it runs outside the actor.
//! Requests for a key whose pool is still being created queue up behind it and
//! all receive the same result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use fission_core::store::ResourceStore;
use fission_core::types::{DEFAULT_NAMESPACE, Environment};
use fission_core::ObjectKey;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, Result};
use crate::pool::{GenericPool, PoolDeps, PoolSettings};

const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Registry key of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Environment namespace.
    pub namespace: String,
    /// Environment name.
    pub name: String,
    /// Environment resource version.
    pub resource_version: String,
}

impl PoolKey {
    /// Key of an environment's pool.
    pub fn of(env: &Environment) -> Self {
        Self {
            namespace: env.metadata.namespace_or_default().to_string(),
            name: env.metadata.name.clone(),
            resource_version: env.metadata.resource_version.clone(),
        }
    }
}

type PoolReply = oneshot::Sender<Result<Arc<GenericPool>>>;

enum Entry {
    Ready(Arc<GenericPool>),
    Creating(Vec<PoolReply>),
}

enum Command {
    GetPool {
        env: Box<Environment>,
        reply: Option<PoolReply>,
    },
    Created {
        key: PoolKey,
        result: Result<Arc<GenericPool>>,
    },
    CleanupPools {
        live: HashSet<PoolKey>,
        reply: oneshot::Sender<usize>,
    },
    IsValidEnvironment {
        env: ObjectKey,
        reply: oneshot::Sender<bool>,
    },
}

/// Namespace a pool for `env` lives in.
///
/// Environments in the default namespace share the function namespace;
/// environments elsewhere keep their pools next to them.
pub fn pool_namespace(env: &Environment, function_namespace: &str) -> String {
    let ns = env.metadata.namespace_or_default();
    if ns == DEFAULT_NAMESPACE {
        function_namespace.to_string()
    } else {
        ns.to_string()
    }
}

/// Handle to the pool manager actor.
#[derive(Clone)]
pub struct PoolManager {
    tx: mpsc::Sender<Command>,
}

impl PoolManager {
    /// Spawn the pool manager.
    pub fn start(deps: PoolDeps, settings: PoolSettings, function_namespace: String) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let registry = Registry {
            pools: HashMap::new(),
            deps,
            settings,
            function_namespace,
            tx: tx.downgrade(),
        };
        tokio::spawn(registry.run(rx));
        Self { tx }
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ExecutorError::Stopped("pool manager"))
    }

    /// The pool for `env`, created on first use.
    pub async fn get_pool(&self, env: &Environment) -> Result<Arc<GenericPool>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetPool {
            env: Box::new(env.clone()),
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ExecutorError::Stopped("pool manager"))?
    }

    /// Start creating the pool for `env` if there is none, without waiting.
    pub async fn ensure_pool(&self, env: &Environment) -> Result<()> {
        self.send(Command::GetPool {
            env: Box::new(env.clone()),
            reply: None,
        })
        .await
    }

    /// Destroy, in the background, every pool whose environment is not in
    /// `live`. Returns how many pools are being destroyed.
    pub async fn cleanup_pools(&self, live: &[Environment]) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CleanupPools {
            live: live.iter().map(PoolKey::of).collect(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ExecutorError::Stopped("pool manager"))
    }

    /// Whether some pool serves the environment `env`.
    pub async fn is_valid_environment(&self, env: &ObjectKey) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IsValidEnvironment {
            env: env.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ExecutorError::Stopped("pool manager"))
    }
}

struct Registry {
    pools: HashMap<PoolKey, Entry>,
    deps: PoolDeps,
    settings: PoolSettings,
    function_namespace: String,
    tx: mpsc::WeakSender<Command>,
}

impl Registry {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::GetPool { env, reply } => self.get_pool(*env, reply),
                Command::Created { key, result } => self.created(key, result),
                Command::CleanupPools { live, reply } => {
                    let _ = reply.send(self.cleanup(&live));
                }
                Command::IsValidEnvironment { env, reply } => {
                    let valid = self.pools.iter().any(|(key, entry)| {
                        matches!(entry, Entry::Ready(_))
                            && key.namespace == env.namespace
                            && key.name == env.name
                    });
                    let _ = reply.send(valid);
                }
            }
        }
        debug!("Pool manager stopped");
    }

    fn get_pool(&mut self, env: Environment, reply: Option<PoolReply>) {
        let key = PoolKey::of(&env);
        match self.pools.get_mut(&key) {
            Some(Entry::Ready(pool)) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(pool.clone()));
                }
            }
            Some(Entry::Creating(waiters)) => {
                waiters.extend(reply);
            }
            None => {
                let Some(tx) = self.tx.upgrade() else {
                    return;
                };
                self.pools.insert(key.clone(), Entry::Creating(reply.into_iter().collect()));

                let namespace = pool_namespace(&env, &self.function_namespace);
                let deps = self.deps.clone();
                let settings = self.settings.clone();
                info!(environment = %env.metadata.key(), namespace = %namespace, "Creating pool");
                tokio::spawn(async move {
                    let result = GenericPool::create(env, namespace, deps, settings)
                        .await
                        .map(Arc::new);
                    let _ = tx.send(Command::Created { key, result }).await;
                });
            }
        }
    }

    fn created(&mut self, key: PoolKey, result: Result<Arc<GenericPool>>) {
        let waiters = match self.pools.remove(&key) {
            Some(Entry::Creating(waiters)) => waiters,
            _ => Vec::new(),
        };
        match &result {
            Ok(pool) => {
                info!(environment = %key.name, namespace = %key.namespace, deployment = %pool.deployment_name(), "Pool ready");
                self.pools.insert(key, Entry::Ready(pool.clone()));
            }
            Err(e) => {
                error!(environment = %key.name, namespace = %key.namespace, error = %e, "Error creating pool");
            }
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn cleanup(&mut self, live: &HashSet<PoolKey>) -> usize {
        let stale: Vec<PoolKey> = self
            .pools
            .iter()
            .filter(|(key, entry)| matches!(entry, Entry::Ready(_)) && !live.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            if let Some(Entry::Ready(pool)) = self.pools.remove(key) {
                info!(environment = %key.name, namespace = %key.namespace, "Environment gone, destroying pool");
                tokio::spawn(async move {
                    pool.destroy().await;
                });
            }
        }
        stale.len()
    }
}

/// Settings for [`EagerPoolCreator`].
#[derive(Debug, Clone)]
pub struct EagerPoolCreatorConfig {
    /// Sweep interval.
    pub interval: Duration,
    /// Consecutive listing failures after which the loop gives up.
    pub max_failures: u32,
}

impl Default for EagerPoolCreatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_failures: 5,
        }
    }
}

/// Keeps one pool per environment: creates missing pools and destroys pools
/// of deleted environments.
pub struct EagerPoolCreator {
    resources: Arc<dyn ResourceStore>,
    manager: PoolManager,
    config: EagerPoolCreatorConfig,
    shutdown: Arc<Notify>,
}

impl EagerPoolCreator {
    /// Create the loop.
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        manager: PoolManager,
        config: EagerPoolCreatorConfig,
    ) -> Self {
        Self {
            resources,
            manager,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to trigger shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown or until listing environments fails too often.
    pub async fn run(&self) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_failures = self.config.max_failures,
            "Eager pool creator started"
        );

        let mut failures = 0u32;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Eager pool creator received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    match self.sync_once().await {
                        Ok(()) => failures = 0,
                        Err(e) => {
                            failures += 1;
                            warn!(error = %e, failures, "Error syncing pools with environments");
                            if failures >= self.config.max_failures {
                                error!(failures, "Too many failures listing environments, giving up on eager pool creation");
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("Eager pool creator stopped");
    }

    /// One sweep: ensure a pool per environment, destroy the rest.
    pub async fn sync_once(&self) -> Result<()> {
        let envs = self.resources.list_environments().await?;
        for env in &envs {
            self.manager.ensure_pool(env).await?;
        }
        let destroyed = self.manager.cleanup_pools(&envs).await?;
        if destroyed > 0 {
            debug!(destroyed, "Cleaned up stale pools");
        }
        Ok(())
    }
}
