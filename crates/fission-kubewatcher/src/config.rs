// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fission-kubewatcher.

use std::time::Duration;

/// Default router base URL.
pub const DEFAULT_ROUTER_URL: &str = "http://router.fission";

/// Watcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Router base URL events are posted through.
    pub router_url: String,
    /// Time between full trigger resyncs.
    pub resync_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ROUTER_URL` | `http://router.fission` |
    /// | `KUBEWATCHER_RESYNC_INTERVAL_SECS` | `30` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let router_url = std::env::var("ROUTER_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ROUTER_URL.to_string());

        let resync_secs: u64 = std::env::var("KUBEWATCHER_RESYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid("KUBEWATCHER_RESYNC_INTERVAL_SECS", e.to_string())
            })?;

        Ok(Self {
            router_url,
            resync_interval: Duration::from_secs(resync_secs),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an unusable value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
