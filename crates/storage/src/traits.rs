//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;

/// Object store interface.
///
/// Keys are artifact locations such as `mainnet/beacon_block/node-1/100/0xabc.ssz`.
/// Every operation is atomic per key.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's full contents.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object, replacing any existing content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    ///
    /// Returns [`StorageError::NotFound`] when the key is absent so callers can
    /// tell "already gone" apart from a successful delete. Use
    /// [`delete_idempotent`] when the distinction does not matter.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Copy an object to a new key within the same store.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Get the backend name (for logging/metrics).
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Delete an object, treating an absent key as success.
///
/// Returns `true` if an object was removed, `false` if it was already gone.
pub async fn delete_idempotent(store: &dyn ObjectStore, key: &str) -> StorageResult<bool> {
    match store.delete(key).await {
        Ok(()) => Ok(true),
        Err(StorageError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
