// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the archive store.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fission_core::ErrorKind;
use thiserror::Error;

/// Archive store errors.
///
/// The retrieval failures are kept distinct because they map to different
/// HTTP statuses: `NotFound` is 404, `RetrieveFailed` and `OpenFailed` are 400,
/// write failures are 500.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// No archive with this id.
    #[error("Error retrieving item: not found: {0}")]
    NotFound(String),

    /// Archive metadata could not be read.
    #[error("Error retrieving item: {0}")]
    RetrieveFailed(String),

    /// Archive contents could not be opened.
    #[error("Error opening item: {0}")]
    OpenFailed(String),

    /// Archive could not be written to the backend.
    #[error("Error saving uploaded file: {0}")]
    WriteFailed(String),

    /// Archive contents could not be streamed back to the caller.
    #[error("Error writing response: {0}")]
    WriteResponseFailed(String),

    /// Archive could not be deleted.
    #[error("Error deleting item: {0}")]
    DeleteFailed(String),

    /// Archive listing failed.
    #[error("Error listing items: {0}")]
    ListFailed(String),

    /// Malformed request (missing id, missing upload, bad `X-File-Size`).
    #[error("{0}")]
    BadRequest(String),

    /// Backend could not be initialised.
    #[error("Storage backend error: {0}")]
    Backend(#[from] object_store::Error),

    /// Local storage directory could not be prepared.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource store failure (package listing).
    #[error("Resource store error: {0}")]
    ResourceStore(#[from] fission_core::Error),
}

impl StorageError {
    /// Coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::BadRequest(_) => ErrorKind::InvalidArgument,
            StorageError::ResourceStore(e) => e.kind(),
            StorageError::Backend(_) => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::RetrieveFailed(_)
            | StorageError::OpenFailed(_)
            | StorageError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<StorageError> for fission_core::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => fission_core::Error::NotFound(format!("archive {}", id)),
            StorageError::BadRequest(msg) => fission_core::Error::InvalidArgument(msg),
            StorageError::ResourceStore(inner) => inner,
            other => fission_core::Error::Transient(other.to_string()),
        }
    }
}

/// Result type for archive store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
