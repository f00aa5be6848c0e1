use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::storage::{ListPage, ObjectStore, StorageError};
use crate::utils::constants::DEFAULT_LIST_PAGE_SIZE;

const TEMP_MARKER: &str = ".tmp-";

/// Object store over a local directory tree; keys are `/`-separated paths below `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidLocation(format!("invalid key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }
}

/// Collect every file below `dir` as a root-relative key
fn walk(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(root, &path, keys)?;
            continue;
        }
        if entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn describe(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let page_size = self.page_size;

        tokio::task::spawn_blocking(move || {
            // Only walk the directory part of the prefix
            let dir = match prefix.rfind('/') {
                Some(pos) => root.join(&prefix[..pos]),
                None => root.clone(),
            };

            let mut keys = Vec::new();
            walk(&root, &dir, &mut keys)?;
            keys.retain(|k| k.starts_with(&prefix));
            if let Some(after) = continuation.as_deref() {
                keys.retain(|k| k.as_str() > after);
            }
            keys.sort();

            let more = keys.len() > page_size;
            keys.truncate(page_size);
            let next = if more { keys.last().cloned() } else { None };
            Ok(ListPage { keys, next })
        })
        .await
        .map_err(|e| StorageError::Backend(format!("listing task failed: {}", e)))?
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{}{}{}", file_name, TEMP_MARKER, Uuid::new_v4()));

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&body)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)?;
            debug!("Wrote {} bytes to {}", body.len(), path.display());
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Backend(format!("write task failed: {}", e)))?
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
