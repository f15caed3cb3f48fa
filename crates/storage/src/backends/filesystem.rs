//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem object store.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path under the root.
    ///
    /// Canonicalization and symlink checks touch the filesystem synchronously,
    /// so they run on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Map an I/O error to `NotFound` when the object is missing.
fn not_found_or_io(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// Validate `key` and join it onto `root`.
///
/// Rejects absolute keys, `..` components, and any key whose nearest existing
/// ancestor (or the path itself) resolves outside the root through a symlink.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    // Walk from the full path upwards; the first entry that exists (file,
    // directory, or dangling symlink) decides whether the key stays inside root.
    let mut candidate = Some(path.as_path());
    while let Some(current) = candidate {
        match std::fs::symlink_metadata(current) {
            Ok(meta) => {
                let resolved = current.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !resolved.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                candidate = current.parent();
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
    }

    Ok(path)
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        // Unique temp name per writer, fsync, then rename into place.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        // Read-then-put so the destination appears atomically.
        let data = self.get(from).await?;
        self.put(to, data).await
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
