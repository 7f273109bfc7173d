// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API for the executor.
//!
//! ## Endpoints
//!
//! - `POST /v2/getServiceForFunction` - JSON function metadata in, `host:port` out
//! - `POST /v2/tapService` - Plain-text address whose access time to refresh
//! - `GET /healthz` - Liveness

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fission_core::{ErrorKind, ObjectKey};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::ExecutorError;
use crate::executor::Executor;

/// Service lookup route.
pub const GET_SERVICE_PATH: &str = "/v2/getServiceForFunction";
/// Access-time refresh route.
pub const TAP_SERVICE_PATH: &str = "/v2/tapService";

/// Function reference accepted by [`GET_SERVICE_PATH`].
///
/// Callers send the function's object metadata; only name and namespace are
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    /// Function name.
    pub name: String,
    /// Function namespace; empty means `default`.
    #[serde(default)]
    pub namespace: String,
}

impl FunctionRef {
    /// Cache and store key of the function.
    pub fn key(&self) -> ObjectKey {
        let ns = if self.namespace.is_empty() {
            fission_core::types::DEFAULT_NAMESPACE
        } else {
            &self.namespace
        };
        ObjectKey::new(ns, &self.name)
    }
}

impl ExecutorError {
    /// HTTP status for this error. Only a missing object is the caller's
    /// problem; everything else is a 500.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ExecutorError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Build the executor router.
pub fn router(executor: Executor) -> Router {
    Router::new()
        .route(GET_SERVICE_PATH, post(get_service_for_function))
        .route(TAP_SERVICE_PATH, post(tap_service))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(executor)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn get_service_for_function(
    State(executor): State<Executor>,
    body: Bytes,
) -> Result<String, Response> {
    let function: FunctionRef = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Failed to parse function reference");
        (StatusCode::BAD_REQUEST, "Failed to parse request").into_response()
    })?;

    executor
        .get_service_for_function(&function.key())
        .await
        .map_err(|e| {
            error!(function = %function.key(), status = e.status_code().as_u16(), error = %e, "Error getting service for function");
            e.into_response()
        })
}

async fn tap_service(State(executor): State<Executor>, body: String) -> StatusCode {
    match executor.tap_service(&body).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(address = %body.trim(), error = %e, "Function service tap error");
            StatusCode::NOT_FOUND
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_ref_defaults_namespace() {
        let f: FunctionRef = serde_json::from_str(r#"{"name":"hello"}"#).unwrap();
        assert_eq!(f.key(), ObjectKey::new("default", "hello"));
    }

    #[test]
    fn test_function_ref_ignores_other_metadata() {
        let f: FunctionRef = serde_json::from_str(
            r#"{"name":"hello","namespace":"apps","uid":"u-1","resourceVersion":"7"}"#,
        )
        .unwrap();
        assert_eq!(f.key(), ObjectKey::new("apps", "hello"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ExecutorError::NotFound("fn".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ExecutorError::SpecializeFailed("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
