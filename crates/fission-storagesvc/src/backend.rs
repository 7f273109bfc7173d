// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Archive storage on top of `object_store`.
//!
//! Archive ids are object keys. Local stores are rooted at
//! `<root>/<sub_dir>` so ids are bare UUIDs; S3 stores share the bucket with
//! other data so ids carry the `<sub_dir>/` prefix.

use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::config::{S3Config, StorageConfig, StorageType};
use crate::error::{Result, StorageError};

/// One stored archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveItem {
    /// Archive id.
    pub id: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Size in bytes.
    pub size: u64,
}

impl From<ObjectMeta> for ArchiveItem {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            id: meta.location.to_string(),
            last_modified: meta.last_modified,
            size: meta.size as u64,
        }
    }
}

/// Archive store over a local directory or an S3 bucket.
#[derive(Clone)]
pub struct ArchiveStore {
    store: Arc<dyn ObjectStore>,
    storage_type: StorageType,
    container: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("storage_type", &self.storage_type)
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ArchiveStore {
    /// Build a store from configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config {
            StorageConfig::Local { root, sub_dir } => Self::local(root.join(sub_dir), sub_dir),
            StorageConfig::S3(s3) => Self::s3(s3),
        }
    }

    /// Local store rooted at `dir` (created if missing).
    pub fn local(dir: impl AsRef<std::path::Path>, container: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(dir)?;
        Ok(Self {
            store: Arc::new(store),
            storage_type: StorageType::Local,
            container: container.into(),
            prefix: None,
        })
    }

    /// S3 store.
    pub fn s3(config: &S3Config) -> Result<Self> {
        let mut builder = object_store::aws::AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder.build()?;
        Ok(Self {
            store: Arc::new(store),
            storage_type: StorageType::S3,
            container: config.bucket.clone(),
            prefix: Some(config.sub_dir.trim_matches('/').to_string()),
        })
    }

    /// Backend kind.
    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    /// Container name: the bucket for S3, the sub-directory for local.
    pub fn container(&self) -> &str {
        &self.container
    }

    fn new_id(&self) -> String {
        let name = uuid::Uuid::new_v4().to_string();
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, name),
            _ => name,
        }
    }

    fn path(id: &str) -> Result<ObjectPath> {
        if id.is_empty() {
            return Err(StorageError::BadRequest("missing `id' query param".to_string()));
        }
        ObjectPath::parse(id).map_err(|e| StorageError::BadRequest(format!("invalid archive id '{}': {}", id, e)))
    }

    /// Store a stream of bytes under a fresh id.
    ///
    /// `size` is the size announced by the uploader; a mismatch is logged but
    /// not rejected.
    pub async fn put_stream<S, E>(&self, stream: S, size: u64) -> Result<String>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let id = self.new_id();
        let path = Self::path(&id)?;
        let mut writer = BufWriter::new(self.store.clone(), path);
        let mut stream = pin!(stream);
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StorageError::WriteFailed(format!("upload interrupted: {}", e)));
                }
            };
            if let Err(e) = writer.write_all(&chunk).await {
                let _ = writer.abort().await;
                error!(id = %id, error = %e, "Error writing file on storage");
                return Err(StorageError::WriteFailed(e.to_string()));
            }
            written += chunk.len() as u64;
        }

        if let Err(e) = writer.shutdown().await {
            error!(id = %id, error = %e, "Error writing file on storage");
            return Err(StorageError::WriteFailed(e.to_string()));
        }

        if written != size {
            warn!(id = %id, announced = size, written, "Upload size differs from X-File-Size");
        }
        debug!(id = %id, size = written, "Successfully wrote file on storage");
        Ok(id)
    }

    /// Store a buffer under a fresh id.
    pub async fn put(&self, data: Bytes) -> Result<String> {
        let size = data.len() as u64;
        self.put_stream(futures::stream::once(async move { Ok::<_, std::convert::Infallible>(data) }), size)
            .await
    }

    /// Metadata of an archive.
    pub async fn head(&self, id: &str) -> Result<ArchiveItem> {
        let path = Self::path(id)?;
        match self.store.head(&path).await {
            Ok(meta) => Ok(meta.into()),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound(id.to_string())),
            Err(e) => Err(StorageError::RetrieveFailed(e.to_string())),
        }
    }

    /// Stream an archive's contents.
    pub async fn get(&self, id: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        self.head(id).await?;
        let path = Self::path(id)?;
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StorageError::OpenFailed(e.to_string())),
        };
        let id = id.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| {
                error!(id = %id, error = %e, "Error copying item into response");
                StorageError::WriteResponseFailed(e.to_string())
            })
            .boxed())
    }

    /// Read an archive fully into memory.
    pub async fn get_bytes(&self, id: &str) -> Result<Bytes> {
        let chunks: Vec<Bytes> = self.get(id).await?.try_collect().await?;
        Ok(chunks.concat().into())
    }

    /// Delete an archive.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = Self::path(id)?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound(id.to_string())),
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }

    /// Every archive in the container.
    pub async fn list(&self) -> Result<Vec<ArchiveItem>> {
        let prefix = self.prefix.as_deref().filter(|p| !p.is_empty()).map(ObjectPath::from);
        let metas: Vec<ObjectMeta> = self
            .store
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| StorageError::ListFailed(e.to_string()))?;
        let mut items: Vec<ArchiveItem> = metas.into_iter().map(ArchiveItem::from).collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (ArchiveStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::local(dir.path().join("fission-functions"), "fission-functions").unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_bytes() {
        let (store, _dir) = store();
        let id = store.put(Bytes::from_static(b"zip bytes")).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let data = store.get_bytes(&id).await.unwrap();
        assert_eq!(&data[..], b"zip bytes");

        let item = store.head(&id).await.unwrap();
        assert_eq!(item.size, 9);
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let (store, _dir) = store();
        let id = uuid::Uuid::new_v4().to_string();
        assert!(matches!(store.head(&id).await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.get(&id).await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete(&id).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let (store, _dir) = store();
        assert!(matches!(store.head("").await, Err(StorageError::BadRequest(_))));
        assert!(matches!(store.head("../etc/passwd").await, Err(StorageError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (store, _dir) = store();
        let a = store.put(Bytes::from_static(b"a")).await.unwrap();
        let b = store.put(Bytes::from_static(b"bb")).await.unwrap();

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));

        store.delete(&a).await.unwrap();
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn test_s3_ids_carry_prefix() {
        let store = ArchiveStore::s3(&S3Config {
            bucket: "archives".into(),
            sub_dir: "fission-functions".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://127.0.0.1:9000".into()),
        })
        .unwrap();
        assert_eq!(store.storage_type(), StorageType::S3);
        assert_eq!(store.container(), "archives");
        assert!(store.new_id().starts_with("fission-functions/"));
    }
}
