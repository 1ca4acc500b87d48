//! Object-store access for the enqueuer: list, download, upload, relocate
//! and delete blobs by key.

pub mod backend;
pub mod error;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, info};

use enqueuer_core::CandidateFile;

pub use backend::{LocalBackend, S3Backend, StorageBackend};
pub use error::StorageError;

/// Key-addressed blob store, backed by S3, a local directory or memory.
pub struct ObjectStorage {
    backend: StorageBackend,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStorage {
    pub fn new(backend: StorageBackend) -> Self {
        let store = backend.store_arc();
        Self { backend, store }
    }

    /// Select S3 when a bucket is configured, the local directory otherwise.
    pub fn from_config(config: &enqueuer_core::Config) -> Result<Self, StorageError> {
        let backend = if config.aws.is_configured() {
            StorageBackend::S3(S3Backend::new(&config.aws)?)
        } else {
            StorageBackend::Local(LocalBackend::new(&config.storage.local_dir)?)
        };
        Ok(Self::new(backend))
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// List every object under `prefix`, sorted by key.
    ///
    /// Prefix matching is per path segment. A zero-byte directory marker for
    /// the prefix itself may appear in the result; callers filter it.
    pub async fn list(&self, prefix: &str) -> Result<Vec<CandidateFile>, StorageError> {
        let path = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&path));
        let mut entries = Vec::new();

        while let Some(meta) = stream.try_next().await? {
            entries.push(CandidateFile {
                key: meta.location.to_string(),
                last_modified: meta.last_modified,
                size: meta.size,
                e_tag: meta.e_tag,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(prefix, count = entries.len(), "listed objects");
        Ok(entries)
    }

    /// Download `key` into `local_path`, creating parent directories.
    pub async fn get(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let data = self.store.get(&ObjectPath::from(key)).await?.bytes().await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &data).await?;
        debug!(key, path = %local_path.display(), bytes = data.len(), "downloaded object");
        Ok(())
    }

    pub async fn put(&self, key: &str, data: impl Into<Bytes>) -> Result<(), StorageError> {
        let payload = PutPayload::from(data.into());
        self.store.put(&ObjectPath::from(key), payload).await?;
        debug!(key, "uploaded object");
        Ok(())
    }

    /// Relocate `src` to `dst`.
    ///
    /// On S3 this is copy-then-delete: a crash in between leaves the object
    /// under both keys, never under neither.
    pub async fn move_object(&self, src: &str, dst: &str) -> Result<(), StorageError> {
        self.store
            .rename(&ObjectPath::from(src), &ObjectPath::from(dst))
            .await?;
        info!(from = src, to = dst, "moved object");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&ObjectPath::from(key)).await?;
        debug!(key, "deleted object");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.store.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
