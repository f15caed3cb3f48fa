//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use tracoor_core::{Artifact, ArtifactRecord};

// =============================================================================
// Artifacts
// =============================================================================

/// One row from any artifact table.
///
/// Columns a kind does not have are projected as typed NULLs, so every table
/// decodes into this shape.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub id: String,
    pub node: String,
    pub fetched_at: OffsetDateTime,
    pub location: String,
    pub network: String,
    pub slot: Option<i64>,
    pub epoch: Option<i64>,
    pub state_root: Option<String>,
    pub block_root: Option<String>,
    pub blob_index: Option<i64>,
    pub block_hash: Option<String>,
    pub block_number: Option<i64>,
    pub block_extra_data: Option<String>,
    pub beacon_implementation: Option<String>,
    pub beacon_version: Option<String>,
    pub execution_implementation: Option<String>,
    pub execution_version: Option<String>,
}

fn unsigned(column: &str, value: Option<i64>) -> MetadataResult<Option<u64>> {
    value
        .map(|v| {
            u64::try_from(v)
                .map_err(|_| MetadataError::Internal(format!("negative {column} in index: {v}")))
        })
        .transpose()
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = MetadataError;

    fn try_from(row: ArtifactRow) -> MetadataResult<Self> {
        Ok(Artifact {
            id: row.id,
            record: ArtifactRecord {
                node: row.node,
                fetched_at: row.fetched_at,
                location: row.location,
                network: row.network,
                slot: unsigned("slot", row.slot)?,
                epoch: unsigned("epoch", row.epoch)?,
                state_root: row.state_root,
                block_root: row.block_root,
                blob_index: unsigned("blob_index", row.blob_index)?,
                block_hash: row.block_hash,
                block_number: unsigned("block_number", row.block_number)?,
                block_extra_data: row.block_extra_data,
                beacon_implementation: row.beacon_implementation,
                beacon_version: row.beacon_version,
                execution_implementation: row.execution_implementation,
                execution_version: row.execution_version,
            },
        })
    }
}

// =============================================================================
// Distributed locks
// =============================================================================

/// Lease row in `distributed_locks`.
#[derive(Debug, Clone, FromRow)]
pub struct LockRow {
    pub key: String,
    pub owner: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Rows released by tools that soft-delete carry a tombstone.
    pub deleted_at: Option<OffsetDateTime>,
}

/// How a lease was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    /// No row existed for the key.
    Created,
    /// A tombstoned row was purged and replaced.
    Recreated,
    /// The previous holder's lease had expired.
    TakenOver,
    /// The caller already held the lease and extended it.
    Renewed,
}

/// A granted lease.
#[derive(Debug, Clone)]
pub struct LockLease {
    pub key: String,
    pub owner: String,
    pub expires_at: OffsetDateTime,
    pub acquisition: LockAcquisition,
}

// =============================================================================
// Permanent blocks
// =============================================================================

/// Record that a durable copy of a block exists at its permanent location.
#[derive(Debug, Clone, FromRow)]
pub struct PermanentBlockRow {
    pub id: String,
    pub slot: i64,
    pub block_root: String,
    pub network: String,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ArtifactRow {
        ArtifactRow {
            id: "a".to_string(),
            node: "n".to_string(),
            fetched_at: OffsetDateTime::UNIX_EPOCH,
            location: "l".to_string(),
            network: "mainnet".to_string(),
            slot: Some(10),
            epoch: Some(0),
            state_root: Some("0x1".to_string()),
            block_root: None,
            blob_index: None,
            block_hash: None,
            block_number: None,
            block_extra_data: None,
            beacon_implementation: None,
            beacon_version: None,
            execution_implementation: None,
            execution_version: None,
        }
    }

    #[test]
    fn test_row_converts_to_artifact() {
        let artifact = Artifact::try_from(row()).unwrap();
        assert_eq!(artifact.record.slot, Some(10));
        assert_eq!(artifact.record.state_root.as_deref(), Some("0x1"));
    }

    #[test]
    fn test_negative_coordinates_are_rejected() {
        let mut bad = row();
        bad.slot = Some(-1);
        assert!(matches!(
            Artifact::try_from(bad),
            Err(MetadataError::Internal(_))
        ));
    }
}
