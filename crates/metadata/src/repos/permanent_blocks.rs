//! Permanent block record repository.

use crate::error::MetadataResult;
use crate::models::PermanentBlockRow;
use async_trait::async_trait;

#[async_trait]
pub trait PermanentBlockRepo: Send + Sync {
    /// Record a permanent copy of `(network, block_root)`.
    ///
    /// Returns `false` if a live record already exists.
    async fn insert_permanent_block(
        &self,
        slot: u64,
        block_root: &str,
        network: &str,
    ) -> MetadataResult<bool>;

    async fn get_permanent_block(
        &self,
        network: &str,
        block_root: &str,
    ) -> MetadataResult<Option<PermanentBlockRow>>;

    /// Live records for `network`, ordered by slot.
    async fn list_permanent_blocks(&self, network: &str) -> MetadataResult<Vec<PermanentBlockRow>>;
}
