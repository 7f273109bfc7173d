// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fission-storagesvc.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::pruner::PrunerConfig;

/// Default container (sub-directory) name for archives.
pub const DEFAULT_SUB_DIR: &str = "fission-functions";

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Local filesystem.
    Local,
    /// S3-compatible object store.
    S3,
}

impl StorageType {
    /// Wire name, as reported in `X-FISSION-STORAGETYPE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "local",
            StorageType::S3 => "s3",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// S3 connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,
    /// Key prefix for uploaded archives.
    pub sub_dir: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Region.
    pub region: String,
    /// Custom endpoint (MinIO and friends).
    pub endpoint: Option<String>,
}

/// Where archives live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Local directory `<root>/<sub_dir>`.
    Local {
        /// Root directory.
        root: PathBuf,
        /// Container directory under the root.
        sub_dir: String,
    },
    /// S3 bucket.
    S3(S3Config),
}

impl StorageConfig {
    /// Backend kind.
    pub fn storage_type(&self) -> StorageType {
        match self {
            StorageConfig::Local { .. } => StorageType::Local,
            StorageConfig::S3(_) => StorageType::S3,
        }
    }
}

/// Storage service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Archive pruner settings.
    pub pruner: PrunerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("STORAGE_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid("STORAGE_PORT", e.to_string()))?;
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let storage_type = std::env::var("STORAGE_TYPE").unwrap_or_else(|_| "local".to_string());
        let storage = match storage_type.to_ascii_lowercase().as_str() {
            "local" => StorageConfig::Local {
                root: PathBuf::from(
                    std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "/fission".to_string()),
                ),
                sub_dir: std::env::var("SUBDIR").unwrap_or_else(|_| DEFAULT_SUB_DIR.to_string()),
            },
            "s3" => StorageConfig::S3(S3Config {
                bucket: required("STORAGE_S3_BUCKET_NAME")?,
                sub_dir: std::env::var("STORAGE_S3_SUB_DIR")
                    .unwrap_or_else(|_| DEFAULT_SUB_DIR.to_string()),
                access_key_id: required("STORAGE_S3_ACCESS_KEY_ID")?,
                secret_access_key: required("STORAGE_S3_SECRET_ACCESS_KEY")?,
                region: required("STORAGE_S3_REGION")?,
                endpoint: std::env::var("STORAGE_S3_ENDPOINT")
                    .ok()
                    .filter(|e| !e.is_empty()),
            }),
            other => {
                return Err(ConfigError::Invalid(
                    "STORAGE_TYPE",
                    format!("'{}' is not one of local, s3", other),
                ));
            }
        };

        Ok(Self {
            bind_addr,
            storage,
            pruner: PrunerConfig::from_env(),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingEnvVar(name))
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
