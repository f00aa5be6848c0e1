//! Object store abstraction shared by every pipeline stage.

pub mod local;
pub mod memory;
pub mod s3;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::settings::S3Settings;
use crate::utils::keys::normalize_prefix;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage location: {0}")]
    InvalidLocation(String),
}

impl StorageError {
    /// Whether retrying the call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Transient(_) => true,
            StorageError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Continuation token for the next page, `None` when the listing is exhausted
    pub next: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human readable location, used in logs and output references
    fn describe(&self, key: &str) -> String;

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError>;

    /// List every key under `prefix`, following continuation tokens until exhaustion.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self.list_page(prefix, continuation.clone()).await?;
            keys.extend(page.keys);

            match page.next {
                Some(next) if continuation.as_deref() == Some(next.as_str()) => {
                    return Err(StorageError::Backend(format!(
                        "listing of '{}' did not advance past token '{}'",
                        prefix, next
                    )));
                }
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError>;

    /// Delete a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// A parsed `source`/`target` setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local { root: PathBuf },
    S3 { bucket: String, prefix: String },
}

impl StorageLocation {
    /// Parse `s3://bucket/prefix`, `file:///path` or a bare filesystem path
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(StorageError::InvalidLocation("empty location".to_string()));
        }

        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Ok(StorageLocation::Local {
                    root: PathBuf::from(trimmed),
                })
            }
            Err(e) => return Err(StorageError::InvalidLocation(format!("{}: {}", trimmed, e))),
        };

        match url.scheme() {
            "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| {
                        StorageError::InvalidLocation(format!("{}: missing bucket", trimmed))
                    })?
                    .to_string();
                Ok(StorageLocation::S3 {
                    bucket,
                    prefix: normalize_prefix(url.path()),
                })
            }
            "file" => {
                let root = url.to_file_path().map_err(|_| {
                    StorageError::InvalidLocation(format!("{}: not a local path", trimmed))
                })?;
                Ok(StorageLocation::Local { root })
            }
            // Windows drive letters parse as a one-letter scheme
            scheme if scheme.len() == 1 => Ok(StorageLocation::Local {
                root: PathBuf::from(trimmed),
            }),
            other => Err(StorageError::InvalidLocation(format!(
                "{}: unsupported scheme '{}'",
                trimmed, other
            ))),
        }
    }

    /// Key prefix inside the store that the location points at
    pub fn key_prefix(&self) -> &str {
        match self {
            StorageLocation::Local { .. } => "",
            StorageLocation::S3 { prefix, .. } => prefix,
        }
    }
}

/// Open the store behind a location
pub async fn open(
    location: &StorageLocation,
    s3: &S3Settings,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match location {
        StorageLocation::Local { root } => Ok(Arc::new(LocalObjectStore::new(root.clone()))),
        StorageLocation::S3 { bucket, .. } => {
            Ok(Arc::new(S3ObjectStore::new(bucket.clone(), s3).await?))
        }
    }
}
