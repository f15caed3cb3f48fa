//! Distributed lease lock repository.

use crate::error::MetadataResult;
use crate::models::{LockLease, LockRow};
use async_trait::async_trait;
use time::Duration;

/// Time-bounded mutual exclusion shared by every server using the same index.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Acquire or renew the lease on `key` for `ttl`.
    ///
    /// Succeeds when the key is free, tombstoned, expired, or already held by
    /// `owner`. Otherwise fails with `LockHeld`. Expired rows for every key
    /// are purged as part of the attempt.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration)
    -> MetadataResult<LockLease>;

    /// Release a lease held by `owner`. Releasing a lease that is not held,
    /// or is held by someone else, is a no-op.
    async fn release_lock(&self, key: &str, owner: &str) -> MetadataResult<()>;

    /// Current live lease on `key`, if any.
    async fn get_lock(&self, key: &str) -> MetadataResult<Option<LockRow>>;
}
