// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types shared across the control plane.
//!
//! Every error carries an [`ErrorKind`] so callers can decide what to do with
//! it without matching on crate-specific variants: reconcilers retry on the
//! next tick, subscription supervisors tear down on [`ErrorKind::Fatal`], and
//! the executor API maps [`ErrorKind::NotFound`] to HTTP 404.

use thiserror::Error;

/// Coarse classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced object does not exist.
    NotFound,
    /// The object being created already exists.
    AlreadyExists,
    /// The request was malformed or violates a constraint.
    InvalidArgument,
    /// Network failure, timeout, or an expected restart; retrying may help.
    Transient,
    /// Unrecoverable failure (e.g. lost broker connection); tear down and restart.
    Fatal,
    /// The invoked function answered with an error status.
    Upstream,
}

impl ErrorKind {
    /// Short lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Upstream => "upstream",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control plane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Object was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Object already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Request validation failed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Temporary failure; the caller may retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Unrecoverable failure.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// A downstream HTTP service returned a non-success status.
    #[error("Upstream returned status {status}: {message}")]
    Upstream {
        /// HTTP status returned.
        status: u16,
        /// Response body or description.
        message: String,
    },

    /// HTTP client failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes API call failed.
    #[cfg(feature = "kube")]
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::InvalidArgument(_) | Error::Json(_) => ErrorKind::InvalidArgument,
            Error::Transient(_) | Error::Http(_) | Error::Io(_) => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::Upstream { .. } => ErrorKind::Upstream,
            #[cfg(feature = "kube")]
            Error::Kube(e) => kube_error_kind(e),
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Map a Kubernetes API error onto an [`ErrorKind`] using its HTTP status.
#[cfg(feature = "kube")]
pub fn kube_error_kind(err: &kube::Error) -> ErrorKind {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => ErrorKind::NotFound,
            409 if resp.reason == "AlreadyExists" => ErrorKind::AlreadyExists,
            400 | 422 => ErrorKind::InvalidArgument,
            401 | 403 => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        },
        _ => ErrorKind::Transient,
    }
}

/// Result type using the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
