// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor error types.
//!
//! Specialization results fan out to every caller waiting on the same
//! function, so [`ExecutorError`] is `Clone`. Errors from the shared crate are
//! flattened to their kind and message on the way in.

use fission_core::ErrorKind;
use thiserror::Error;

use crate::orchestrator::OrchestratorError;

/// Executor errors.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// Function, environment or package does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// No generic pod became ready in time.
    #[error("timed out choosing a pod for {0}")]
    PodChooseTimeout(String),

    /// The fetcher sidecar rejected or failed the fetch request.
    #[error("error fetching deployment package: {0}")]
    FetchFailed(String),

    /// The runtime container failed to specialize.
    #[error("error specializing function pod: {0}")]
    SpecializeFailed(String),

    /// The pool deployment never reported an available replica.
    #[error("pool {0} did not become ready")]
    PoolNotReady(String),

    /// The request was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Orchestrator call failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Error from the resource store or another shared component.
    #[error("{message}")]
    Upstream {
        /// Kind of the underlying error.
        kind: ErrorKind,
        /// Rendered underlying error.
        message: String,
    },

    /// An actor has shut down.
    #[error("{0} has stopped")]
    Stopped(&'static str),
}

impl ExecutorError {
    /// Coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::NotFound(_) => ErrorKind::NotFound,
            ExecutorError::PodChooseTimeout(_)
            | ExecutorError::FetchFailed(_)
            | ExecutorError::SpecializeFailed(_)
            | ExecutorError::PoolNotReady(_)
            | ExecutorError::Stopped(_) => ErrorKind::Transient,
            ExecutorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ExecutorError::Orchestrator(e) => e.kind(),
            ExecutorError::Upstream { kind, .. } => *kind,
        }
    }
}

impl From<fission_core::Error> for ExecutorError {
    fn from(err: fission_core::Error) -> Self {
        match err {
            fission_core::Error::NotFound(what) => ExecutorError::NotFound(what),
            fission_core::Error::InvalidArgument(msg) => ExecutorError::InvalidArgument(msg),
            other => ExecutorError::Upstream {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

impl From<ExecutorError> for fission_core::Error {
    fn from(err: ExecutorError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => fission_core::Error::NotFound(err.to_string()),
            ErrorKind::AlreadyExists => fission_core::Error::AlreadyExists(err.to_string()),
            ErrorKind::InvalidArgument => fission_core::Error::InvalidArgument(err.to_string()),
            ErrorKind::Fatal => fission_core::Error::Fatal(err.to_string()),
            _ => fission_core::Error::Transient(err.to_string()),
        }
    }
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specialization_failures_are_transient() {
        assert_eq!(
            ExecutorError::PodChooseTimeout("pool".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ExecutorError::FetchFailed("500".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ExecutorError::SpecializeFailed("boom".into()).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err: ExecutorError = fission_core::Error::NotFound("function default/hello".into()).into();
        assert!(matches!(err, ExecutorError::NotFound(_)));
        assert_eq!(err.to_string(), "function default/hello not found");

        let err: ExecutorError = fission_core::Error::Fatal("lost".into()).into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_orchestrator_kinds() {
        let err: ExecutorError = OrchestratorError::NotFound("pod p".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: ExecutorError = OrchestratorError::Conflict("pod p".into()).into();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
