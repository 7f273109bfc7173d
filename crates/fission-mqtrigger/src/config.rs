// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fission-mqtrigger.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use fission_core::types::MessageQueueType;

use crate::broker::BrokerSettings;

/// Default router base URL.
pub const DEFAULT_ROUTER_URL: &str = "http://router.fission";

/// Trigger runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker this instance consumes from.
    pub broker: BrokerSettings,
    /// Router base URL functions are invoked through.
    pub router_url: String,
    /// Time between full trigger resyncs.
    pub resync_interval: Duration,
    /// Delay before the first invocation retry; doubles afterwards.
    pub retry_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MESSAGE_QUEUE_TYPE` | required |
    /// | `MESSAGE_QUEUE_URL` | required except for `memory` |
    /// | `MESSAGE_QUEUE_SECRETS` | unset (no secrets) |
    /// | `ROUTER_URL` | `http://router.fission` |
    /// | `MQ_RESYNC_INTERVAL_SECS` | `30` |
    /// | `MQ_RETRY_DELAY_MS` | `0` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let queue_type: MessageQueueType = required("MESSAGE_QUEUE_TYPE")?
            .parse()
            .map_err(|e: fission_core::Error| ConfigError::Invalid("MESSAGE_QUEUE_TYPE", e.to_string()))?;

        let url = match queue_type {
            MessageQueueType::Memory => optional("MESSAGE_QUEUE_URL").unwrap_or_default(),
            _ => required("MESSAGE_QUEUE_URL")?,
        };

        let secrets = match optional("MESSAGE_QUEUE_SECRETS") {
            Some(dir) => read_secrets_dir(Path::new(&dir))
                .map_err(|e| ConfigError::Invalid("MESSAGE_QUEUE_SECRETS", e.to_string()))?,
            None => BTreeMap::new(),
        };

        let resync_secs: u64 = optional("MQ_RESYNC_INTERVAL_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid("MQ_RESYNC_INTERVAL_SECS", e.to_string())
            })?;

        let retry_delay_ms: u64 = optional("MQ_RETRY_DELAY_MS")
            .unwrap_or_else(|| "0".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid("MQ_RETRY_DELAY_MS", e.to_string()))?;

        Ok(Self {
            broker: BrokerSettings {
                queue_type,
                url,
                secrets,
            },
            router_url: optional("ROUTER_URL").unwrap_or_else(|| DEFAULT_ROUTER_URL.to_string()),
            resync_interval: Duration::from_secs(resync_secs),
            retry_delay: Duration::from_millis(retry_delay_ms),
        })
    }
}

/// Read a mounted secret directory into key/value pairs.
///
/// Every regular file whose name does not start with `.` becomes one entry,
/// keyed by file name. Symlinks are followed, so projected secret volumes
/// (`key -> ..data/key`) read as their targets while `..data` itself is
/// skipped.
pub fn read_secrets_dir(dir: &Path) -> std::io::Result<BTreeMap<String, String>> {
    let mut secrets = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if !std::fs::metadata(&path)?.is_file() {
            continue;
        }
        let value = std::fs::read_to_string(&path)?;
        secrets.insert(name, value);
    }
    Ok(secrets)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::MissingEnvVar(name))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has an unusable value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
