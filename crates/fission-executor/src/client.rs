// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the executor, as used by the router.

use reqwest::StatusCode;
use tracing::debug;

use fission_core::{Error, Result};

use crate::api::{FunctionRef, GET_SERVICE_PATH, TAP_SERVICE_PATH};

/// Client for a running executor.
#[derive(Debug, Clone)]
pub struct ExecutorClient {
    base_url: String,
    http: reqwest::Client,
}

impl ExecutorClient {
    /// Create a client for the executor at `base_url` (e.g. `http://executor.fission`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a client sharing an existing HTTP client.
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Address (`host:port`) of a specialized instance of the function.
    pub async fn get_service_for_function(&self, name: &str, namespace: &str) -> Result<String> {
        let body = FunctionRef {
            name: name.to_string(),
            namespace: namespace.to_string(),
        };
        let response = self
            .http
            .post(format!("{}{}", self.base_url, GET_SERVICE_PATH))
            .json(&body)
            .send()
            .await?;
        let response = check(response).await?;
        let address = response.text().await?;
        debug!(function = %name, namespace = %namespace, address = %address, "Got function service");
        Ok(address)
    }

    /// Refresh the access time of the function service at `address`.
    pub async fn tap_service(&self, address: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, TAP_SERVICE_PATH))
            .body(address.to_string())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::BAD_REQUEST => Error::InvalidArgument(message),
        _ => Error::Upstream {
            status: status.as_u16(),
            message,
        },
    })
}
