// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the archive store.

use bytes::Bytes;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::debug;

use fission_core::types::Checksum;
use fission_core::{Error, Result};

use crate::config::StorageType;
use crate::server::{
    ARCHIVE_PATH, HEADER_BUCKET, HEADER_FILE_SIZE, HEADER_STORAGE_TYPE, UPLOAD_FIELD, UploadResponse,
};

/// What `HEAD` reports about an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Backend kind.
    pub storage_type: StorageType,
    /// Bucket, for S3 storage.
    pub bucket: Option<String>,
}

/// Client for a running archive store.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    base_url: String,
    http: reqwest::Client,
}

impl ArchiveClient {
    /// Create a client for the service at `base_url` (e.g. `http://storagesvc.fission`).
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

    /// Download URL of an archive. This is the URL packages carry.
    pub fn url_for(&self, id: &str) -> String {
        format!("{}{}?id={}", self.base_url, ARCHIVE_PATH, urlencoding::encode(id))
    }

    fn archive_url(&self) -> String {
        format!("{}{}", self.base_url, ARCHIVE_PATH)
    }

    /// SHA-256 checksum of archive contents.
    pub fn checksum(data: &[u8]) -> Checksum {
        Checksum::sha256(data)
    }

    /// Hex SHA-256 of archive contents.
    pub fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Upload an archive and return its id.
    pub async fn upload(&self, file_name: &str, data: impl Into<Bytes>) -> Result<String> {
        let data: Bytes = data.into();
        let size = data.len();
        let part = reqwest::multipart::Part::stream_with_length(data, size as u64)
            .file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .http
            .post(self.archive_url())
            .header(HEADER_FILE_SIZE, size.to_string())
            .multipart(form)
            .send()
            .await?;

        let response = check(response).await?;
        let body: UploadResponse = response.json().await?;
        debug!(id = %body.id, size, "Uploaded archive");
        Ok(body.id)
    }

    /// Download an archive.
    pub async fn download(&self, id: &str) -> Result<Bytes> {
        let response = self.http.get(self.url_for(id)).send().await?;
        let response = check(response).await?;
        Ok(response.bytes().await?)
    }

    /// Delete an archive.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let response = self.http.delete(self.url_for(id)).send().await?;
        check(response).await?;
        Ok(())
    }

    /// List archive ids.
    pub async fn list(&self) -> Result<Vec<String>> {
        let response = self.http.get(self.archive_url()).send().await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    /// Storage type and bucket of an archive.
    pub async fn info(&self, id: &str) -> Result<ArchiveInfo> {
        let response = self.http.head(self.url_for(id)).send().await?;
        let response = check(response).await?;
        let headers = response.headers();

        let storage_type = match headers.get(HEADER_STORAGE_TYPE).and_then(|v| v.to_str().ok()) {
            Some("s3") => StorageType::S3,
            Some("local") => StorageType::Local,
            other => {
                return Err(Error::Upstream {
                    status: response.status().as_u16(),
                    message: format!("unexpected storage type {:?}", other),
                });
            }
        };
        let bucket = headers
            .get(HEADER_BUCKET)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ArchiveInfo { storage_type, bucket })
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
