// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fission-executor.

use std::net::SocketAddr;
use std::time::Duration;

use crate::pool::PoolSettings;

/// Default namespace for pools of environments in the `default` namespace.
pub const DEFAULT_FUNCTION_NAMESPACE: &str = "fission-function";

/// Executor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// Namespace of pools for environments in the `default` namespace.
    pub function_namespace: String,
    /// Pool settings, including this instance's id.
    pub pool: PoolSettings,
    /// Wait before pods of previous instances are deleted.
    pub cleanup_grace: Duration,
    /// How often cached function services are checked against their pods.
    pub watch_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `EXECUTOR_PORT` | `8888` |
    /// | `EXECUTOR_IDLE_TIMEOUT_SECS` | `120` |
    /// | `EXECUTOR_IDLE_REAP_INTERVAL_SECS` | `120` |
    /// | `EXECUTOR_POD_READY_TIMEOUT_SECS` | `300` |
    /// | `EXECUTOR_CLEANUP_GRACE_SECS` | `360` |
    /// | `EXECUTOR_WATCH_INTERVAL_SECS` | `5` |
    /// | `FISSION_NAMESPACE` | `fission-function` |
    /// | `FETCHER_IMAGE` | `fission/fetcher:latest` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("EXECUTOR_PORT")
            .unwrap_or_else(|_| "8888".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid("EXECUTOR_PORT", e.to_string()))?;

        let watch_interval = secs("EXECUTOR_WATCH_INTERVAL_SECS", Duration::from_secs(5))?;
        if watch_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "EXECUTOR_WATCH_INTERVAL_SECS",
                "must be at least 1".to_string(),
            ));
        }

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            fetcher_image: std::env::var("FETCHER_IMAGE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.fetcher_image.clone()),
            idle_timeout: secs("EXECUTOR_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            idle_reap_interval: secs("EXECUTOR_IDLE_REAP_INTERVAL_SECS", defaults.idle_reap_interval)?,
            pod_ready_timeout: secs("EXECUTOR_POD_READY_TIMEOUT_SECS", defaults.pod_ready_timeout)?,
            ..defaults
        };

        Ok(Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            function_namespace: std::env::var("FISSION_NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_FUNCTION_NAMESPACE.to_string()),
            pool,
            cleanup_grace: secs("EXECUTOR_CLEANUP_GRACE_SECS", Duration::from_secs(360))?,
            watch_interval,
        })
    }
}

fn secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::Invalid(name, e.to_string())),
        _ => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an unusable value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
