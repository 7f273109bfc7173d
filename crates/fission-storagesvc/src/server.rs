// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API for the archive store.
//!
//! ## Endpoints
//!
//! - `POST /v1/archive` - Upload (multipart field `uploadfile`, header `X-File-Size`)
//! - `GET /v1/archive?id=<id>` - Download an archive
//! - `GET /v1/archive` - List archive ids
//! - `HEAD /v1/archive?id=<id>` - Storage type and bucket of an archive
//! - `DELETE /v1/archive?id=<id>` - Delete an archive
//! - `GET /healthz` - Liveness

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::backend::ArchiveStore;
use crate::config::StorageType;
use crate::error::{Result, StorageError};

/// Archive route.
pub const ARCHIVE_PATH: &str = "/v1/archive";
/// Multipart field carrying the upload.
pub const UPLOAD_FIELD: &str = "uploadfile";
/// Announced upload size (`X-File-Size`).
pub const HEADER_FILE_SIZE: &str = "x-file-size";
/// Storage type reported by `HEAD` (`X-FISSION-STORAGETYPE`).
pub const HEADER_STORAGE_TYPE: &str = "x-fission-storagetype";
/// Bucket reported by `HEAD` for S3 storage (`X-FISSION-BUCKET`).
pub const HEADER_BUCKET: &str = "x-fission-bucket";

/// Upload response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Id of the stored archive.
    pub id: String,
}

/// `id` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct ArchiveQuery {
    /// Archive id.
    pub id: Option<String>,
}

impl ArchiveQuery {
    fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    fn required_id(&self) -> Result<&str> {
        self.id()
            .ok_or_else(|| StorageError::BadRequest("missing `id' query param".to_string()))
    }
}

/// Build the archive router.
pub fn router(store: ArchiveStore) -> Router {
    Router::new()
        .route(
            ARCHIVE_PATH,
            get(download_or_list)
                .post(upload)
                .delete(delete_archive)
                .head(archive_info),
        )
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn upload(
    State(store): State<ArchiveStore>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let size = headers
        .get(HEADER_FILE_SIZE)
        .ok_or_else(|| StorageError::BadRequest("missing X-File-Size header".to_string()))?
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| StorageError::BadRequest("missing or bad X-File-Size header".to_string()))?;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| StorageError::BadRequest(format!("error reading multipart body: {}", e)))?;
        let Some(field) = field else {
            return Err(StorageError::BadRequest("missing upload file".to_string()));
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let id = store.put_stream(field, size).await.inspect_err(|e| {
            error!(error = %e, "Error saving uploaded file");
        })?;
        info!(id = %id, size, "Archive uploaded");
        return Ok(Json(UploadResponse { id }));
    }
}

async fn download_or_list(
    State(store): State<ArchiveStore>,
    Query(query): Query<ArchiveQuery>,
) -> Result<Response> {
    let Some(id) = query.id() else {
        let ids: Vec<String> = store.list().await?.into_iter().map(|item| item.id).collect();
        return Ok(Json(ids).into_response());
    };

    let stream = store.get(id).await.inspect_err(|e| {
        error!(id = %id, error = %e, "Error retrieving item");
    })?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn delete_archive(
    State(store): State<ArchiveStore>,
    Query(query): Query<ArchiveQuery>,
) -> Result<StatusCode> {
    let id = query.required_id()?;
    store.delete(id).await.inspect_err(|e| {
        error!(id = %id, error = %e, "Error deleting item");
    })?;
    info!(id = %id, "Archive deleted");
    Ok(StatusCode::OK)
}

async fn archive_info(
    State(store): State<ArchiveStore>,
    Query(query): Query<ArchiveQuery>,
) -> Result<Response> {
    let id = query.required_id()?;
    let item = store.head(id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        HEADER_STORAGE_TYPE,
        HeaderValue::from_static(store.storage_type().as_str()),
    );
    if store.storage_type() == StorageType::S3 {
        let bucket = HeaderValue::from_str(store.container())
            .map_err(|e| StorageError::RetrieveFailed(e.to_string()))?;
        headers.insert(HEADER_BUCKET, bucket);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(item.size));
    Ok((StatusCode::OK, headers).into_response())
}
