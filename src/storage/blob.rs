//! Object Store for original uploads.
//!
//! Blobs are addressed by relative paths (`documents/<id>/<file name>`). The filesystem store
//! writes through a temporary file and renames it into place, so a partially written upload is
//! never visible under its final path. Reads are streamed in fixed-size chunks.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Errors surfaced by Object Store implementations.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// No blob exists at the requested path.
    #[error("Blob not found: {0}")]
    NotFound(String),
    /// The path escapes the store root or is otherwise malformed.
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
    /// The store could not be reached.
    #[error("Object store unavailable: {0}")]
    Unavailable(String),
    /// Filesystem operation failed.
    #[error("Object store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunked byte stream returned by [`BlobStore::open`].
pub type BlobStream = Pin<Box<dyn Stream<Item = Result<Bytes, BlobStoreError>> + Send>>;

/// Durable storage for uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path`, replacing any previous blob.
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobStoreError>;

    /// Read the full blob into memory.
    async fn get(&self, path: &str) -> Result<Bytes, BlobStoreError>;

    /// Open the blob as a chunked stream for downloads.
    async fn open(&self, path: &str) -> Result<BlobStream, BlobStoreError>;

    /// Remove a blob. Missing blobs are not an error.
    async fn delete(&self, path: &str) -> Result<(), BlobStoreError>;

    /// Confirm the store is reachable and writable.
    async fn health_check(&self) -> Result<(), BlobStoreError>;
}

/// Build the storage path for a document's original upload.
pub fn document_blob_path(document_id: &str, file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('.');
    let name = if sanitized.is_empty() {
        "upload.bin"
    } else {
        sanitized
    };
    format!("documents/{document_id}/{name}")
}

/// Object Store rooted in a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobStoreError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(BlobStoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobStoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = target.with_extension(format!("partial-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, &data).await?;
        if let Err(error) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }
        tracing::debug!(path, bytes = data.len(), "Blob stored");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobStoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn open(&self, path: &str) -> Result<BlobStream, BlobStoreError> {
        let target = self.resolve(path)?;
        let file = match tokio::fs::File::open(&target).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobStoreError::NotFound(path.to_string()));
            }
            Err(error) => return Err(error.into()),
        };

        Ok(Box::pin(read_chunks(file)))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobStoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn health_check(&self) -> Result<(), BlobStoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let metadata = tokio::fs::metadata(&self.root).await?;
        if metadata.permissions().readonly() {
            return Err(BlobStoreError::Unavailable(format!(
                "{} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Stream a file in `READ_CHUNK_BYTES` pieces.
fn read_chunks(
    mut file: tokio::fs::File,
) -> impl Stream<Item = Result<Bytes, BlobStoreError>> + Send {
    try_stream! {
        let mut buffer = vec![0_u8; READ_CHUNK_BYTES];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buffer[..read]);
        }
    }
}

/// In-memory Object Store used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Whether the store holds no blobs.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobStoreError> {
        self.blobs.write().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobStoreError> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(path.to_string()))
    }

    async fn open(&self, path: &str) -> Result<BlobStream, BlobStoreError> {
        let data = self.get(path).await?;
        let chunks: Vec<Result<Bytes, BlobStoreError>> = (0..data.len())
            .step_by(READ_CHUNK_BYTES)
            .map(|start| {
                let end = (start + READ_CHUNK_BYTES).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobStoreError> {
        self.blobs.write().await.remove(path);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BlobStoreError> {
        Ok(())
    }
}
