// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor facade: function → address.
//!
//! Cache hits are answered directly. Misses go through an actor that keeps
//! one in-flight specialization per function; callers arriving while it runs
//! are parked and all receive its result.

use std::collections::HashMap;
use std::sync::Arc;

use fission_core::{Clock, ObjectKey};
use fission_core::store::ResourceStore;
use fission_core::types::ExecutorType;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};
use crate::fscache::{FunctionService, FunctionServiceCache};
use crate::poolmgr::PoolManager;

const COMMAND_QUEUE_CAPACITY: usize = 1024;

type ServiceReply = oneshot::Sender<Result<FunctionService>>;

enum Command {
    Create {
        function: ObjectKey,
        reply: ServiceReply,
    },
    Created {
        function: ObjectKey,
        result: Result<FunctionService>,
    },
}

/// Handle to the executor.
#[derive(Clone)]
pub struct Executor {
    tx: mpsc::Sender<Command>,
    cache: FunctionServiceCache,
}

impl Executor {
    /// Spawn the executor actor.
    pub fn start(
        resources: Arc<dyn ResourceStore>,
        pools: PoolManager,
        cache: FunctionServiceCache,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let latches = Latches {
            in_flight: HashMap::new(),
            creator: Arc::new(ServiceCreator {
                resources,
                pools,
                cache: cache.clone(),
            }),
            tx: tx.downgrade(),
        };
        tokio::spawn(latches.run(rx));
        Self { tx, cache }
    }

    /// The function service cache behind this executor.
    pub fn cache(&self) -> &FunctionServiceCache {
        &self.cache
    }

    /// Address of a specialized instance of `function`, specializing one if
    /// none is cached.
    pub async fn get_service_for_function(&self, function: &ObjectKey) -> Result<String> {
        debug!(function = %function, "Checking for cached function service");
        if let Some(fsvc) = self.cache.get_by_function(function).await? {
            return Ok(fsvc.address(self.cache.clock().now()).to_string());
        }

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Create {
                function: function.clone(),
                reply,
            })
            .await
            .map_err(|_| ExecutorError::Stopped("executor"))?;
        let fsvc = rx.await.map_err(|_| ExecutorError::Stopped("executor"))??;
        Ok(fsvc.address(self.cache.clock().now()).to_string())
    }

    /// Mark the service at `address` as used. Accepts a bare `host:port` or
    /// an `http://` URL.
    pub async fn tap_service(&self, address: &str) -> Result<()> {
        let host = address.trim().trim_start_matches("http://");
        self.cache.touch_by_address(host).await
    }
}

struct Latches {
    in_flight: HashMap<ObjectKey, Vec<ServiceReply>>,
    creator: Arc<ServiceCreator>,
    tx: mpsc::WeakSender<Command>,
}

impl Latches {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Create { function, reply } => {
                    if let Some(waiters) = self.in_flight.get_mut(&function) {
                        waiters.push(reply);
                        continue;
                    }
                    let Some(tx) = self.tx.upgrade() else {
                        let _ = reply.send(Err(ExecutorError::Stopped("executor")));
                        continue;
                    };
                    self.in_flight.insert(function.clone(), vec![reply]);

                    let creator = self.creator.clone();
                    tokio::spawn(async move {
                        let result = creator.create(&function).await;
                        let _ = tx.send(Command::Created { function, result }).await;
                    });
                }
                Command::Created { function, result } => {
                    let waiters = self.in_flight.remove(&function).unwrap_or_default();
                    if let Err(e) = &result {
                        warn!(function = %function, error = %e, waiters = waiters.len(), "Error creating function service");
                    }
                    for waiter in waiters {
                        let _ = waiter.send(result.clone());
                    }
                }
            }
        }
        debug!("Executor stopped");
    }
}

struct ServiceCreator {
    resources: Arc<dyn ResourceStore>,
    pools: PoolManager,
    cache: FunctionServiceCache,
}

impl ServiceCreator {
    async fn create(&self, key: &ObjectKey) -> Result<FunctionService> {
        // A specialization that finished just before this latch was taken.
        if let Some(fsvc) = self.cache.get_by_function(key).await? {
            return Ok(fsvc);
        }

        let function = self.resources.get_function(key).await?;
        let executor_type = function.spec.invoke_strategy.execution_strategy.executor_type;
        if executor_type != ExecutorType::Poolmgr {
            return Err(ExecutorError::InvalidArgument(format!(
                "function {} uses unsupported executor type {:?}",
                key, executor_type
            )));
        }
        let env = self.resources.get_environment(&function.environment_key()).await?;
        let package = self.resources.get_package(&function.package_key()).await?;

        let pool = self.pools.get_pool(&env).await?;
        let fsvc = pool.get_func_svc(&function, &package).await?;
        info!(
            function = %key,
            pod = %fsvc.pod_name,
            address = %fsvc.pod_address,
            "Function service created"
        );
        self.cache.add(fsvc).await
    }
}
