// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker error types.
//!
//! Backends report failures as [`BrokerError`]; at the reconciler boundary
//! they are flattened into [`fission_core::Error`] by kind. A lost connection
//! is the only fatal kind: the subscription loop exits and the process is
//! restarted by its supervisor.

use fission_core::ErrorKind;
use thiserror::Error;

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// Could not connect or subscribe.
    #[error("broker connect failed: {0}")]
    Connect(String),

    /// An established connection or consumer stream went away.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    /// Publishing to a topic failed.
    #[error("publish to {topic} failed: {message}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Failure description.
        message: String,
    },

    /// Broker settings or trigger fields are unusable.
    #[error("invalid broker configuration: {0}")]
    Config(String),

    /// The broker answered with something we could not parse.
    #[error("malformed broker response: {0}")]
    Protocol(String),

    /// HTTP transport failure (REST brokers).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BrokerError {
    /// Coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::ConnectionLost(_) => ErrorKind::Fatal,
            BrokerError::Config(_) => ErrorKind::InvalidArgument,
            BrokerError::Connect(_)
            | BrokerError::Publish { .. }
            | BrokerError::Protocol(_)
            | BrokerError::Http(_) => ErrorKind::Transient,
        }
    }
}

impl From<BrokerError> for fission_core::Error {
    fn from(err: BrokerError) -> Self {
        match err.kind() {
            ErrorKind::Fatal => fission_core::Error::Fatal(err.to_string()),
            ErrorKind::InvalidArgument => fission_core::Error::InvalidArgument(err.to_string()),
            _ => fission_core::Error::Transient(err.to_string()),
        }
    }
}
