//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracoor_storage::{FilesystemBackend, ObjectStore, StorageError, StorageResult};

/// A test storage wrapper that cleans up on drop.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    /// Create a new test storage with a temporary directory.
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path()).await?;

        Ok(Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the object store.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }
}

/// Object store wrapper that fails deletes of one key a fixed number of
/// times and counts copies.
#[allow(dead_code)]
pub struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    failing_key: Option<String>,
    remaining_failures: AtomicUsize,
    pub copies: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            failing_key: None,
            remaining_failures: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` deletes of `key` with an I/O error.
    pub fn fail_deletes(mut self, key: &str, times: usize) -> Self {
        self.failing_key = Some(key.to_string());
        self.remaining_failures = AtomicUsize::new(times);
        self
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.failing_key.as_deref() == Some(key)
            && self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StorageError::Io(std::io::Error::other("injected delete failure")));
        }
        self.inner.delete(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(from, to).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
