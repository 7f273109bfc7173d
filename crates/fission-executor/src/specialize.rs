// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Turning a generic pool pod into a function pod.
//!
//! Two calls against the pod itself: the fetcher sidecar downloads the
//! package's deployment archive into the shared volume, then the runtime
//! container is told to load it. Environments with interface version 1 load
//! a fixed file name through the legacy `/specialize` endpoint.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fission_core::Backoff;
use fission_core::types::{
    Checksum, ConfigMapReference, Environment, Function, Metadata, Package, SecretReference,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};

/// Default fetcher sidecar port.
pub const DEFAULT_FETCHER_PORT: u16 = 8000;
/// Default runtime container port.
pub const DEFAULT_RUNTIME_PORT: u16 = 8888;
/// Default mount path of the volume shared by fetcher and runtime.
pub const DEFAULT_SHARED_MOUNT_PATH: &str = "/userfunc";

/// File name version 1 runtimes load from the shared volume.
const LEGACY_FILENAME: &str = "user";

/// Package reference in a fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPackage {
    /// Package name.
    pub name: String,
    /// Package namespace.
    pub namespace: String,
    /// Package resource version.
    pub resource_version: String,
}

/// Body of `POST /fetch` on the fetcher sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    /// Always `"deployment"` for specialization.
    pub fetch_type: String,
    /// Package the archive belongs to.
    pub package: FetchPackage,
    /// Archive URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline archive, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    /// Archive checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Target file name inside the shared volume.
    pub filename: String,
    /// Secrets to materialize next to the function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretReference>,
    /// Config maps to materialize next to the function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configmaps: Vec<ConfigMapReference>,
    /// Keep the archive after extraction.
    #[serde(default)]
    pub keep_archive: bool,
}

impl FetchRequest {
    /// Fetch request for a function's deployment archive.
    pub fn for_function(function: &Function, package: &Package, env: &Environment) -> Self {
        let archive = &package.spec.deployment;
        Self {
            fetch_type: "deployment".to_string(),
            package: FetchPackage {
                name: package.metadata.name.clone(),
                namespace: package.metadata.namespace_or_default().to_string(),
                resource_version: package.metadata.resource_version.clone(),
            },
            url: archive.url.clone().filter(|u| !u.is_empty()),
            literal: archive.literal.as_ref().map(|bytes| STANDARD.encode(bytes)),
            checksum: archive.checksum.clone(),
            filename: target_filename(function, env),
            secrets: function.spec.secrets.clone(),
            configmaps: function.spec.configmaps.clone(),
            keep_archive: env.spec.keep_archive,
        }
    }
}

/// Body of `POST /v2/specialize` on the runtime container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionLoadRequest {
    /// Path of the fetched code inside the runtime container.
    pub filepath: String,
    /// Entry point.
    pub function_name: String,
    /// Route prefix the runtime serves the function on.
    pub url: String,
    /// Function metadata.
    pub function_metadata: Metadata,
}

/// File name the archive is fetched to.
pub fn target_filename(function: &Function, env: &Environment) -> String {
    if env.spec.version < 2 {
        LEGACY_FILENAME.to_string()
    } else {
        format!("{}-{}", function.metadata.name, function.metadata.uid)
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn host_port(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

/// Specialization settings.
#[derive(Debug, Clone)]
pub struct SpecializerConfig {
    /// Fetcher sidecar port.
    pub fetcher_port: u16,
    /// Runtime container port.
    pub runtime_port: u16,
    /// Mount path of the shared volume in the runtime container.
    pub shared_mount_path: String,
    /// Retry policy for the specialize call.
    pub backoff: Backoff,
    /// Timeout of one fetch call (archives can be large).
    pub fetch_timeout: Duration,
}

impl Default for SpecializerConfig {
    fn default() -> Self {
        Self {
            fetcher_port: DEFAULT_FETCHER_PORT,
            runtime_port: DEFAULT_RUNTIME_PORT,
            shared_mount_path: DEFAULT_SHARED_MOUNT_PATH.to_string(),
            // 20 attempts: 50ms, 100ms, 200ms, ...
            backoff: Backoff::new(19, Duration::from_millis(50), 2.0),
            fetch_timeout: Duration::from_secs(300),
        }
    }
}

/// Talks to the fetcher and runtime of a pool pod.
#[derive(Debug, Clone)]
pub struct Specializer {
    http: reqwest::Client,
    config: SpecializerConfig,
}

impl Specializer {
    /// Create a specializer.
    pub fn new(http: reqwest::Client, config: SpecializerConfig) -> Self {
        Self { http, config }
    }

    /// Runtime port functions are served on.
    pub fn runtime_port(&self) -> u16 {
        self.config.runtime_port
    }

    /// Fetcher sidecar port.
    pub fn fetcher_port(&self) -> u16 {
        self.config.fetcher_port
    }

    /// Mount path of the shared volume.
    pub fn shared_mount_path(&self) -> &str {
        &self.config.shared_mount_path
    }

    /// Fetch the function's archive into the pod and load it into the runtime.
    pub async fn specialize_pod(
        &self,
        pod_ip: &str,
        function: &Function,
        package: &Package,
        env: &Environment,
    ) -> Result<()> {
        let fetch = FetchRequest::for_function(function, package, env);
        self.fetch(pod_ip, &fetch).await?;

        if env.spec.version < 2 {
            return self.specialize_v1(pod_ip).await;
        }

        let load = FunctionLoadRequest {
            filepath: format!(
                "{}/{}",
                self.config.shared_mount_path.trim_end_matches('/'),
                fetch.filename
            ),
            function_name: function.spec.package.function_name.clone(),
            url: "/".to_string(),
            function_metadata: function.metadata.clone(),
        };
        self.specialize(pod_ip, &load).await
    }

    /// Ask the fetcher sidecar to download an archive.
    pub async fn fetch(&self, pod_ip: &str, request: &FetchRequest) -> Result<()> {
        let url = format!("http://{}/fetch", host_port(pod_ip, self.config.fetcher_port));
        debug!(url = %url, package = %request.package.name, "Calling fetcher");

        let response = self
            .http
            .post(&url)
            .timeout(self.config.fetch_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ExecutorError::FetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::FetchFailed(format!("{}: {}", status, body)));
        }
        Ok(())
    }

    /// Load fetched code into the runtime, retrying while the runtime is
    /// not yet accepting connections.
    pub async fn specialize(&self, pod_ip: &str, request: &FunctionLoadRequest) -> Result<()> {
        let url = format!(
            "http://{}/v2/specialize",
            host_port(pod_ip, self.config.runtime_port)
        );
        self.post_with_retry(&url, Some(request)).await?;
        info!(pod_ip = %pod_ip, function = %request.function_metadata.name, "Specialized pod");
        Ok(())
    }

    async fn specialize_v1(&self, pod_ip: &str) -> Result<()> {
        let url = format!(
            "http://{}/specialize",
            host_port(pod_ip, self.config.runtime_port)
        );
        self.post_with_retry::<FunctionLoadRequest>(&url, None).await?;
        info!(pod_ip = %pod_ip, "Specialized pod (v1)");
        Ok(())
    }

    async fn post_with_retry<T: Serialize>(&self, url: &str, body: Option<&T>) -> Result<()> {
        let outcome = self
            .config
            .backoff
            .retry(
                |attempt| async move {
                    let request = self.http.post(url);
                    let request = match body {
                        Some(body) => request.json(body),
                        None => request.header(reqwest::header::CONTENT_TYPE, "text/plain"),
                    };
                    let result = request.send().await;
                    if let Err(e) = &result {
                        if e.is_connect() {
                            warn!(url = %url, attempt, error = %e, "Runtime not reachable yet, retrying");
                        }
                    }
                    result
                },
                |e: &reqwest::Error| e.is_connect(),
            )
            .await;

        let response = outcome.map_err(|e| ExecutorError::SpecializeFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::SpecializeFailed(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_core::types::{Archive, EnvironmentSpec, FunctionSpec, PackageSpec, Runtime};

    fn env(version: i32) -> Environment {
        Environment {
            metadata: Metadata::new("default", "python"),
            spec: EnvironmentSpec {
                version,
                runtime: Runtime {
                    image: "fission/python-env".to_string(),
                },
                builder: None,
                poolsize: 3,
                resources: Default::default(),
                keep_archive: true,
                termination_grace_period: 30,
            },
        }
    }

    fn function() -> Function {
        let mut metadata = Metadata::new("default", "hello");
        metadata.uid = "1234".to_string();
        let mut spec = FunctionSpec::default();
        spec.package.packageref.name = "hello-pkg".to_string();
        spec.package.function_name = "main".to_string();
        Function { metadata, spec }
    }

    fn package(archive: Archive) -> Package {
        let mut metadata = Metadata::new("default", "hello-pkg");
        metadata.resource_version = "42".to_string();
        Package {
            metadata,
            spec: PackageSpec {
                deployment: archive,
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    #[test]
    fn test_fetch_request_wire_shape() {
        let req = FetchRequest::for_function(
            &function(),
            &package(Archive::literal(b"code".to_vec())),
            &env(2),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["fetchType"], "deployment");
        assert_eq!(json["package"]["resourceVersion"], "42");
        assert_eq!(json["filename"], "hello-1234");
        assert_eq!(json["literal"], STANDARD.encode(b"code"));
        assert_eq!(json["keepArchive"], true);
        assert!(json.get("url").is_none());
    }

    #[test]
    fn test_legacy_environment_uses_fixed_filename() {
        assert_eq!(target_filename(&function(), &env(1)), "user");
        assert_eq!(target_filename(&function(), &env(3)), "hello-1234");
    }

    #[test]
    fn test_host_port_brackets_ipv6() {
        assert_eq!(host_port("10.0.0.1", 8000), "10.0.0.1:8000");
        assert_eq!(host_port("fd00::1", 8888), "[fd00::1]:8888");
    }

    #[test]
    fn test_load_request_wire_shape() {
        let load = FunctionLoadRequest {
            filepath: "/userfunc/hello-1234".to_string(),
            function_name: "main".to_string(),
            url: "/".to_string(),
            function_metadata: function().metadata,
        };
        let json = serde_json::to_value(&load).unwrap();
        assert_eq!(json["filepath"], "/userfunc/hello-1234");
        assert_eq!(json["functionName"], "main");
        assert_eq!(json["functionMetadata"]["uid"], "1234");
    }
}
