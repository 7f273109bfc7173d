// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic pools of pre-warmed pods.
//!
//! A pool is one deployment per environment. Its pods run the environment's
//! runtime plus the fetcher sidecar and carry `managed=true` while generic.
//! Serving a function takes a ready pod out of the pool by relabelling it
//! (the deployment then replaces it), specializes it, and puts a service in
//! front of it.
//!
//! Pod choice is serialized through a per-pool chooser actor so concurrent
//! requests never race for the same pod. Each pool also runs an idle reaper
//! that deletes specialized pods nobody has used for a while.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fission_core::labels;
use fission_core::types::{Environment, Function, Package};
use fission_core::{Clock, ObjectKey, SharedClock};
use rand::seq::SliceRandom;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, Result};
use crate::fscache::{FunctionService, FunctionServiceCache};
use crate::orchestrator::{
    FunctionServiceSpec, ObjectKind, Orchestrator, OrchestratorError, PodInfo, PoolDeploymentSpec,
};
use crate::specialize::{Specializer, host_port};

/// Value of the `executorType` label on pool resources.
pub const EXECUTOR_TYPE_POOLMGR: &str = "poolmgr";

/// Longest allowed Kubernetes object name.
const MAX_NAME_LEN: usize = 63;

/// Settings shared by every pool of one executor.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Id stamped on everything this executor creates.
    pub instance_id: String,
    /// Fetcher sidecar image.
    pub fetcher_image: String,
    /// How long to wait for a ready pod, both at pool creation and when choosing.
    pub pod_ready_timeout: Duration,
    /// Poll interval while waiting for the deployment to become available.
    pub ready_poll_interval: Duration,
    /// Poll interval while waiting for a ready pod to choose.
    pub choose_poll_interval: Duration,
    /// Idle time after which a specialized pod is reaped.
    pub idle_timeout: Duration,
    /// Reaper tick.
    pub idle_reap_interval: Duration,
    /// How long destruction waits for the deployment to scale to zero.
    pub destroy_timeout: Duration,
    /// Delay before a pod that failed specialization is deleted, leaving
    /// time to collect its logs.
    pub failed_pod_cleanup_delay: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            instance_id: labels::instance_id(),
            fetcher_image: "fission/fetcher:latest".to_string(),
            pod_ready_timeout: Duration::from_secs(300), // 5 minutes
            ready_poll_interval: Duration::from_secs(1),
            choose_poll_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(120),
            idle_reap_interval: Duration::from_secs(120),
            destroy_timeout: Duration::from_secs(60),
            failed_pod_cleanup_delay: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Shared collaborators of every pool.
#[derive(Clone)]
pub struct PoolDeps {
    /// Container orchestrator.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Fetch/specialize client.
    pub specializer: Specializer,
    /// Function service cache.
    pub cache: FunctionServiceCache,
    /// Clock for record timestamps.
    pub clock: SharedClock,
}

/// Truncate a generated name to the Kubernetes limit.
fn truncate_name(name: String) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    name.chars()
        .take(MAX_NAME_LEN)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// Deployment name of an environment's pool: `<env>-<resourceVersion>-<instanceId>`.
pub fn pool_deployment_name(env: &Environment, instance_id: &str) -> String {
    truncate_name(
        format!(
            "{}-{}-{}",
            env.metadata.name, env.metadata.resource_version, instance_id
        )
        .to_lowercase(),
    )
}

/// Service name of a function: `svc-<name>` or `svc-<name>-<uid prefix>`.
pub fn function_service_name(function: &Function) -> String {
    let uid: String = function.metadata.uid.chars().take(8).collect();
    let name = if uid.is_empty() {
        format!("svc-{}", function.metadata.name)
    } else {
        format!("svc-{}-{}", function.metadata.name, uid)
    };
    truncate_name(name.to_lowercase())
}

/// Labels a specialized pod carries.
fn function_labels(pod: &PodInfo, function: &Function) -> BTreeMap<String, String> {
    let mut relabelled = pod.labels.clone();
    relabelled.insert(labels::FUNCTION_NAME.to_string(), function.metadata.name.clone());
    relabelled.insert(
        labels::FUNCTION_NAMESPACE.to_string(),
        function.metadata.namespace_or_default().to_string(),
    );
    relabelled.insert(labels::FUNCTION_UID.to_string(), function.metadata.uid.clone());
    relabelled.insert(labels::MANAGED.to_string(), "false".to_string());
    relabelled
}

struct ChooseRequest {
    function: Function,
    reply: oneshot::Sender<Result<PodInfo>>,
}

/// Serializes pod choice for one pool.
struct PodChooser {
    orchestrator: Arc<dyn Orchestrator>,
    namespace: String,
    selector: BTreeMap<String, String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl PodChooser {
    async fn run(self, mut rx: mpsc::Receiver<ChooseRequest>) {
        while let Some(req) = rx.recv().await {
            let result = self.choose(&req.function).await;
            let _ = req.reply.send(result);
        }
        debug!(namespace = %self.namespace, "Pod chooser stopped");
    }

    async fn choose(&self, function: &Function) -> Result<PodInfo> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            let pods = self
                .orchestrator
                .list_pods(&self.namespace, &self.selector)
                .await?;
            let total = pods.len();
            let ready: Vec<PodInfo> = pods
                .into_iter()
                .filter(|p| p.ready && p.ip.is_some())
                .collect();

            let chosen = ready.choose(&mut rand::thread_rng()).cloned();
            let Some(pod) = chosen else {
                if Instant::now() >= deadline {
                    return Err(ExecutorError::PodChooseTimeout(function.metadata.key().to_string()));
                }
                debug!(function = %function.metadata.name, total, "No ready pods, waiting");
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };

            let new_labels = function_labels(&pod, function);
            match self
                .orchestrator
                .relabel_pod(&pod.namespace, &pod.name, &pod.resource_version, new_labels)
                .await
            {
                Ok(relabelled) => {
                    info!(
                        function = %function.metadata.name,
                        pod = %relabelled.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Chose pod"
                    );
                    return Ok(relabelled);
                }
                // Picked by someone else or gone; choose again.
                Err(e @ (OrchestratorError::Conflict(_) | OrchestratorError::NotFound(_))) => {
                    debug!(pod = %pod.name, error = %e, "Relabel lost, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(ExecutorError::PodChooseTimeout(function.metadata.key().to_string()));
            }
        }
    }
}

/// Deletes specialized pods of one pool that have been idle too long.
pub struct IdleReaper {
    environment: ObjectKey,
    deps: PoolDeps,
    idle_timeout: Duration,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl IdleReaper {
    fn new(environment: ObjectKey, deps: PoolDeps, settings: &PoolSettings) -> Self {
        Self {
            environment,
            deps,
            idle_timeout: settings.idle_timeout,
            interval: settings.idle_reap_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to trigger shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reaper loop.
    pub async fn run(&self) {
        info!(
            environment = %self.environment,
            interval_secs = self.interval.as_secs(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "Idle pod reaper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!(environment = %self.environment, "Idle pod reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.reap_once().await {
                        error!(environment = %self.environment, error = %e, "Idle pod reaping failed");
                    }
                }
            }
        }

        info!(environment = %self.environment, "Idle pod reaper stopped");
    }

    /// Reap every pod idle for at least the idle timeout. Returns the pods deleted.
    pub async fn reap_once(&self) -> Result<Vec<String>> {
        let old = self
            .deps
            .cache
            .list_old(&self.environment, self.idle_timeout)
            .await?;
        let mut reaped = Vec::new();
        for pod in old {
            // Touched since the listing: keep it.
            let Some(fsvc) = self.deps.cache.delete_by_pod(&pod, self.idle_timeout).await? else {
                continue;
            };
            info!(function = %fsvc.function, pod = %fsvc.pod_name, "Reaping idle function pod");
            delete_function_objects(self.deps.orchestrator.as_ref(), &fsvc).await;
            reaped.push(pod);
        }
        Ok(reaped)
    }
}

/// Delete the pod and service of a function service, tolerating ones already gone.
pub(crate) async fn delete_function_objects(orchestrator: &dyn Orchestrator, fsvc: &FunctionService) {
    for (kind, name) in [
        (ObjectKind::Pod, &fsvc.pod_name),
        (ObjectKind::Service, &fsvc.service_name),
    ] {
        match orchestrator.delete_object(kind, &fsvc.namespace, name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(kind = %kind, name = %name, error = %e, "Error deleting function object"),
        }
    }
}

/// A pool of generic pods for one environment.
pub struct GenericPool {
    env: Environment,
    env_key: ObjectKey,
    namespace: String,
    deployment_name: String,
    deps: PoolDeps,
    settings: PoolSettings,
    chooser: mpsc::Sender<ChooseRequest>,
    reaper_shutdown: Arc<Notify>,
}

impl std::fmt::Debug for GenericPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericPool")
            .field("env", &self.env_key)
            .field("namespace", &self.namespace)
            .field("deployment", &self.deployment_name)
            .finish()
    }
}

impl GenericPool {
    /// Create the pool deployment in `namespace` and wait until it has an
    /// available pod.
    pub async fn create(
        env: Environment,
        namespace: String,
        deps: PoolDeps,
        settings: PoolSettings,
    ) -> Result<Self> {
        let env_key = env.metadata.key();
        let deployment_name = pool_deployment_name(&env, &settings.instance_id);
        let budget = env.spec.resources.clamped()?;

        let mut pool_labels = BTreeMap::new();
        pool_labels.insert(labels::ENVIRONMENT_NAME.to_string(), env.metadata.name.clone());
        pool_labels.insert(labels::ENVIRONMENT_NAMESPACE.to_string(), env_key.namespace.clone());
        pool_labels.insert(labels::ENVIRONMENT_UID.to_string(), env.metadata.uid.clone());
        pool_labels.insert(labels::EXECUTOR_INSTANCE_ID.to_string(), settings.instance_id.clone());
        pool_labels.insert(labels::EXECUTOR_TYPE.to_string(), EXECUTOR_TYPE_POOLMGR.to_string());
        pool_labels.insert(labels::MANAGED.to_string(), "true".to_string());
        pool_labels.insert(labels::POOL.to_string(), deployment_name.clone());

        let spec = PoolDeploymentSpec {
            name: deployment_name.clone(),
            namespace: namespace.clone(),
            replicas: env.pool_size(),
            labels: pool_labels.clone(),
            runtime_container: env.metadata.name.clone(),
            runtime_image: env.spec.runtime.image.clone(),
            runtime_port: deps.specializer.runtime_port(),
            resources: budget,
            fetcher_image: settings.fetcher_image.clone(),
            fetcher_port: deps.specializer.fetcher_port(),
            shared_mount_path: deps.specializer.shared_mount_path().to_string(),
            termination_grace_period_secs: env.spec.termination_grace_period,
        };

        match deps.orchestrator.create_deployment(&spec).await {
            Ok(()) => {
                info!(environment = %env_key, deployment = %deployment_name, replicas = spec.replicas, "Created pool deployment")
            }
            Err(OrchestratorError::AlreadyExists(_)) => {
                info!(environment = %env_key, deployment = %deployment_name, "Reusing existing pool deployment")
            }
            Err(e) => return Err(e.into()),
        }

        let (chooser, rx) = mpsc::channel(64);
        tokio::spawn(
            PodChooser {
                orchestrator: deps.orchestrator.clone(),
                namespace: namespace.clone(),
                selector: pool_labels,
                timeout: settings.pod_ready_timeout,
                poll_interval: settings.choose_poll_interval,
            }
            .run(rx),
        );

        let reaper = IdleReaper::new(env_key.clone(), deps.clone(), &settings);
        let reaper_shutdown = reaper.shutdown_handle();

        let pool = Self {
            env,
            env_key,
            namespace,
            deployment_name,
            deps,
            settings,
            chooser,
            reaper_shutdown,
        };

        if let Err(e) = pool.wait_ready().await {
            pool.destroy().await;
            return Err(e);
        }

        tokio::spawn(async move {
            reaper.run().await;
        });
        Ok(pool)
    }

    /// Environment served.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Namespace of the pool's pods and function services.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deployment name.
    pub fn deployment_name(&self) -> &str {
        &self.deployment_name
    }

    async fn wait_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.settings.pod_ready_timeout;
        loop {
            let available = self
                .deps
                .orchestrator
                .deployment_available_replicas(&self.namespace, &self.deployment_name)
                .await?;
            if available > 0 {
                debug!(deployment = %self.deployment_name, available, "Pool ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecutorError::PoolNotReady(self.deployment_name.clone()));
            }
            tokio::time::sleep(self.settings.ready_poll_interval).await;
        }
    }

    async fn choose_pod(&self, function: &Function) -> Result<PodInfo> {
        let (reply, rx) = oneshot::channel();
        self.chooser
            .send(ChooseRequest {
                function: function.clone(),
                reply,
            })
            .await
            .map_err(|_| ExecutorError::Stopped("pod chooser"))?;
        rx.await.map_err(|_| ExecutorError::Stopped("pod chooser"))?
    }

    /// Specialize a pod for `function` and return its function service.
    ///
    /// The record is not added to the cache; the caller does that.
    pub async fn get_func_svc(&self, function: &Function, package: &Package) -> Result<FunctionService> {
        let pod = self.choose_pod(function).await?;
        let ip = pod
            .ip
            .clone()
            .ok_or_else(|| ExecutorError::SpecializeFailed(format!("pod {} has no IP", pod.name)))?;

        if let Err(e) = self
            .deps
            .specializer
            .specialize_pod(&ip, function, package, &self.env)
            .await
        {
            self.schedule_delete_pod(pod.name.clone());
            return Err(e);
        }

        let service_name = function_service_name(function);
        let runtime_port = self.deps.specializer.runtime_port();
        let mut svc_labels = BTreeMap::new();
        svc_labels.insert(labels::FUNCTION_NAME.to_string(), function.metadata.name.clone());
        svc_labels.insert(
            labels::FUNCTION_NAMESPACE.to_string(),
            function.metadata.namespace_or_default().to_string(),
        );
        svc_labels.insert(labels::FUNCTION_UID.to_string(), function.metadata.uid.clone());
        svc_labels.insert(labels::ENVIRONMENT_NAME.to_string(), self.env.metadata.name.clone());
        svc_labels.insert(labels::ENVIRONMENT_NAMESPACE.to_string(), self.env_key.namespace.clone());
        svc_labels.insert(
            labels::EXECUTOR_INSTANCE_ID.to_string(),
            self.settings.instance_id.clone(),
        );
        svc_labels.insert(labels::EXECUTOR_TYPE.to_string(), EXECUTOR_TYPE_POOLMGR.to_string());

        let svc = FunctionServiceSpec {
            name: service_name.clone(),
            namespace: self.namespace.clone(),
            labels: svc_labels,
            selector: BTreeMap::from([(
                labels::FUNCTION_UID.to_string(),
                function.metadata.uid.clone(),
            )]),
            port: runtime_port,
            target_port: runtime_port,
        };
        match self.deps.orchestrator.create_service(&svc).await {
            Ok(()) => debug!(service = %service_name, "Created function service"),
            Err(OrchestratorError::AlreadyExists(_)) => {
                debug!(service = %service_name, "Reusing function service")
            }
            Err(e) => {
                self.schedule_delete_pod(pod.name.clone());
                return Err(e.into());
            }
        }

        // The pod may have been evicted while we were specializing it.
        match self.deps.orchestrator.get_pod(&self.namespace, &pod.name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(ExecutorError::SpecializeFailed(format!(
                    "pod {} disappeared during specialization",
                    pod.name
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let now = self.deps.clock.now();
        Ok(FunctionService {
            function: function.metadata.key(),
            function_uid: function.metadata.uid.clone(),
            function_rv: function.metadata.resource_version.clone(),
            package_rv: package.metadata.resource_version.clone(),
            environment: self.env_key.clone(),
            pod_address: host_port(&ip, runtime_port),
            svc_address: format!("{}.{}:{}", service_name, self.namespace, runtime_port),
            pod_name: pod.name,
            namespace: self.namespace.clone(),
            service_name,
            ctime: now,
            atime: now,
        })
    }

    fn schedule_delete_pod(&self, name: String) {
        warn!(pod = %name, delay_secs = self.settings.failed_pod_cleanup_delay.as_secs(), "Error in pod, scheduling cleanup");
        let orchestrator = self.deps.orchestrator.clone();
        let namespace = self.namespace.clone();
        let delay = self.settings.failed_pod_cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = orchestrator.delete_object(ObjectKind::Pod, &namespace, &name).await {
                if !e.is_not_found() {
                    warn!(pod = %name, error = %e, "Error deleting failed pod");
                }
            }
        });
    }

    /// Tear the pool down: stop reaping, scale to zero, delete the
    /// deployment, then the specialized pods and services it handed out.
    pub async fn destroy(&self) {
        info!(environment = %self.env_key, deployment = %self.deployment_name, "Destroying pool");
        self.reaper_shutdown.notify_one();

        let orchestrator = self.deps.orchestrator.as_ref();
        match orchestrator
            .scale_deployment(&self.namespace, &self.deployment_name, 0)
            .await
        {
            Ok(()) => {
                let deadline = Instant::now() + self.settings.destroy_timeout;
                loop {
                    match orchestrator
                        .deployment_available_replicas(&self.namespace, &self.deployment_name)
                        .await
                    {
                        Ok(0) => break,
                        Ok(_) if Instant::now() < deadline => {
                            tokio::time::sleep(self.settings.ready_poll_interval).await;
                        }
                        Ok(n) => {
                            warn!(deployment = %self.deployment_name, available = n, "Timed out waiting for pool to scale down");
                            break;
                        }
                        Err(e) => {
                            warn!(deployment = %self.deployment_name, error = %e, "Error reading pool status");
                            break;
                        }
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(deployment = %self.deployment_name, error = %e, "Error scaling pool down"),
        }

        match orchestrator
            .delete_object(ObjectKind::Deployment, &self.namespace, &self.deployment_name)
            .await
        {
            Ok(()) | Err(OrchestratorError::NotFound(_)) => {}
            Err(e) => error!(deployment = %self.deployment_name, error = %e, "Error deleting pool deployment"),
        }

        match self.deps.cache.list_old(&self.env_key, Duration::ZERO).await {
            Ok(pods) => {
                for pod in pods {
                    if let Ok(Some(fsvc)) = self.deps.cache.delete_by_pod(&pod, Duration::ZERO).await {
                        delete_function_objects(orchestrator, &fsvc).await;
                    }
                }
            }
            Err(e) => warn!(environment = %self.env_key, error = %e, "Error listing function services of pool"),
        }
    }
}
