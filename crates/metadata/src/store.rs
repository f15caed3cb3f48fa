//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::metrics::QueryMetrics;
use crate::repos::{ArtifactRepo, LockRepo, PermanentBlockRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracoor_core::ArtifactKind;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ArtifactRepo + LockRepo + PermanentBlockRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Metric label for an artifact operation, e.g. `beacon_state.list`.
pub(crate) fn artifact_op(kind: ArtifactKind, op: &str) -> String {
    format!("{}.{op}", kind.as_str())
}

pub(crate) fn lock_held(row: crate::models::LockRow) -> MetadataError {
    MetadataError::LockHeld {
        key: row.key,
        owner: row.owner,
        expires_at: row.expires_at,
    }
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    metrics: QueryMetrics,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>, metrics: QueryMetrics) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single writer connection serializes lock transactions.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool, metrics };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::query::{self, sqlite_timestamp};
    use sqlx::Row;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;
    use tracoor_core::{Artifact, ArtifactField, ArtifactFilter, DISTINCT_VALUES_SCAN_LIMIT, Pagination};
    use uuid::Uuid;

    const LOCK_COLUMNS: &str = "key, owner, expires_at, created_at, updated_at, deleted_at";
    const PERMANENT_COLUMNS: &str = "id, slot, block_root, network, created_at, deleted_at";

    impl SqliteStore {
        async fn insert_artifact_row(
            &self,
            kind: ArtifactKind,
            artifact: &Artifact,
        ) -> MetadataResult<()> {
            let mut qb = query::build_insert::<Sqlite>(kind, artifact)?;
            qb.build().execute(&self.pool).await.map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    MetadataError::AlreadyExists(format!("{kind} {}", artifact.id))
                }
                _ => e.into(),
            })?;
            Ok(())
        }

        async fn soft_delete_artifact(&self, kind: ArtifactKind, id: &str) -> MetadataResult<()> {
            let mut qb =
                query::build_soft_delete::<Sqlite>(kind, id, OffsetDateTime::now_utc())?;
            let result = qb.build().execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("{kind} {id}")));
            }
            Ok(())
        }

        async fn count_rows(
            &self,
            kind: ArtifactKind,
            filter: &ArtifactFilter,
        ) -> MetadataResult<u64> {
            let mut qb = query::build_count::<Sqlite>(kind, filter)?;
            let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
            Ok(count.max(0) as u64)
        }

        async fn list_rows(
            &self,
            kind: ArtifactKind,
            filter: &ArtifactFilter,
            pagination: &Pagination,
        ) -> MetadataResult<Vec<Artifact>> {
            let mut qb = query::build_list::<Sqlite>(kind, filter, pagination)?;
            let rows: Vec<ArtifactRow> = qb.build_query_as().fetch_all(&self.pool).await?;
            rows.into_iter().map(Artifact::try_from).collect()
        }

        async fn update_row(&self, kind: ArtifactKind, artifact: &Artifact) -> MetadataResult<()> {
            let mut qb = query::build_update::<Sqlite>(kind, artifact)?;
            let result = qb.build().execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("{kind} {}", artifact.id)));
            }
            Ok(())
        }

        async fn distinct_rows(
            &self,
            kind: ArtifactKind,
            fields: &[ArtifactField],
        ) -> MetadataResult<BTreeMap<ArtifactField, Vec<String>>> {
            let mut qb =
                query::build_distinct::<Sqlite>(kind, fields, DISTINCT_VALUES_SCAN_LIMIT)?;
            let rows = qb.build().fetch_all(&self.pool).await?;
            let values = rows
                .iter()
                .map(|row| {
                    (0..fields.len())
                        .map(|i| row.try_get::<Option<String>, _>(i))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(query::collect_distinct(fields, values))
        }

        async fn try_acquire_lock(
            &self,
            key: &str,
            owner: &str,
            ttl: time::Duration,
        ) -> MetadataResult<LockLease> {
            let now = OffsetDateTime::now_utc();
            let expires_at = now + ttl;
            let now_text = sqlite_timestamp(now)?;
            let expires_text = sqlite_timestamp(expires_at)?;

            // Starting with a write takes SQLite's write lock for the whole
            // transaction, so the read below cannot go stale.
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM distributed_locks WHERE expires_at < ?")
                .bind(&now_text)
                .execute(&mut *tx)
                .await?;

            let existing: Option<LockRow> = sqlx::query_as(&format!(
                "SELECT {LOCK_COLUMNS} FROM distributed_locks WHERE key = ?"
            ))
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            let insert = "INSERT INTO distributed_locks (key, owner, expires_at, created_at, updated_at) \
                          VALUES (?, ?, ?, ?, ?) ON CONFLICT (key) DO NOTHING";

            let acquisition = match existing {
                None => {
                    let inserted = sqlx::query(insert)
                        .bind(key)
                        .bind(owner)
                        .bind(&expires_text)
                        .bind(&now_text)
                        .bind(&now_text)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    if inserted == 0 {
                        let holder: LockRow = sqlx::query_as(&format!(
                            "SELECT {LOCK_COLUMNS} FROM distributed_locks WHERE key = ?"
                        ))
                        .bind(key)
                        .fetch_one(&mut *tx)
                        .await?;
                        return Err(lock_held(holder));
                    }
                    LockAcquisition::Created
                }
                Some(row) if row.deleted_at.is_some() => {
                    sqlx::query("DELETE FROM distributed_locks WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(insert)
                        .bind(key)
                        .bind(owner)
                        .bind(&expires_text)
                        .bind(&now_text)
                        .bind(&now_text)
                        .execute(&mut *tx)
                        .await?;
                    LockAcquisition::Recreated
                }
                Some(row) if row.expires_at <= now || row.owner == owner => {
                    sqlx::query(
                        "UPDATE distributed_locks SET owner = ?, expires_at = ?, updated_at = ? \
                         WHERE key = ?",
                    )
                    .bind(owner)
                    .bind(&expires_text)
                    .bind(&now_text)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                    if row.owner == owner && row.expires_at > now {
                        LockAcquisition::Renewed
                    } else {
                        LockAcquisition::TakenOver
                    }
                }
                Some(row) => return Err(lock_held(row)),
            };

            tx.commit().await?;

            Ok(LockLease {
                key: key.to_string(),
                owner: owner.to_string(),
                expires_at,
                acquisition,
            })
        }

        async fn delete_lock(&self, key: &str, owner: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM distributed_locks WHERE key = ? AND owner = ?")
                .bind(key)
                .bind(owner)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn live_lock(&self, key: &str) -> MetadataResult<Option<LockRow>> {
            let row = sqlx::query_as(&format!(
                "SELECT {LOCK_COLUMNS} FROM distributed_locks \
                 WHERE key = ? AND deleted_at IS NULL AND expires_at > ?"
            ))
            .bind(key)
            .bind(sqlite_timestamp(OffsetDateTime::now_utc())?)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn record_permanent_block(
            &self,
            slot: u64,
            block_root: &str,
            network: &str,
        ) -> MetadataResult<bool> {
            let slot = tracoor_core::artifact::to_i64(ArtifactField::Slot, slot)?;
            let result = sqlx::query(
                "INSERT INTO permanent_blocks (id, slot, block_root, network, created_at) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(slot)
            .bind(block_root)
            .bind(network)
            .bind(sqlite_timestamp(OffsetDateTime::now_utc())?)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn find_permanent_block(
            &self,
            network: &str,
            block_root: &str,
        ) -> MetadataResult<Option<PermanentBlockRow>> {
            let row = sqlx::query_as(&format!(
                "SELECT {PERMANENT_COLUMNS} FROM permanent_blocks \
                 WHERE network = ? AND block_root = ? AND deleted_at IS NULL"
            ))
            .bind(network)
            .bind(block_root)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn permanent_blocks_for(
            &self,
            network: &str,
        ) -> MetadataResult<Vec<PermanentBlockRow>> {
            let rows = sqlx::query_as(&format!(
                "SELECT {PERMANENT_COLUMNS} FROM permanent_blocks \
                 WHERE network = ? AND deleted_at IS NULL ORDER BY slot ASC, block_root ASC"
            ))
            .bind(network)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ArtifactRepo for SqliteStore {
        async fn insert_artifact(
            &self,
            kind: ArtifactKind,
            artifact: &Artifact,
        ) -> MetadataResult<()> {
            self.metrics
                .track(
                    &artifact_op(kind, "insert"),
                    self.insert_artifact_row(kind, artifact),
                )
                .await
        }

        async fn delete_artifact(&self, kind: ArtifactKind, id: &str) -> MetadataResult<()> {
            self.metrics
                .track(
                    &artifact_op(kind, "delete"),
                    self.soft_delete_artifact(kind, id),
                )
                .await
        }

        async fn count_artifacts(
            &self,
            kind: ArtifactKind,
            filter: &ArtifactFilter,
        ) -> MetadataResult<u64> {
            self.metrics
                .track(&artifact_op(kind, "count"), self.count_rows(kind, filter))
                .await
        }

        async fn list_artifacts(
            &self,
            kind: ArtifactKind,
            filter: &ArtifactFilter,
            pagination: &Pagination,
        ) -> MetadataResult<Vec<Artifact>> {
            self.metrics
                .track(
                    &artifact_op(kind, "list"),
                    self.list_rows(kind, filter, pagination),
                )
                .await
        }

        async fn update_artifact(
            &self,
            kind: ArtifactKind,
            artifact: &Artifact,
        ) -> MetadataResult<()> {
            self.metrics
                .track(&artifact_op(kind, "update"), self.update_row(kind, artifact))
                .await
        }

        async fn distinct_values(
            &self,
            kind: ArtifactKind,
            fields: &[ArtifactField],
        ) -> MetadataResult<BTreeMap<ArtifactField, Vec<String>>> {
            self.metrics
                .track(&artifact_op(kind, "distinct"), self.distinct_rows(kind, fields))
                .await
        }
    }

    #[async_trait]
    impl LockRepo for SqliteStore {
        async fn acquire_lock(
            &self,
            key: &str,
            owner: &str,
            ttl: time::Duration,
        ) -> MetadataResult<LockLease> {
            self.metrics
                .track("lock.acquire", self.try_acquire_lock(key, owner, ttl))
                .await
        }

        async fn release_lock(&self, key: &str, owner: &str) -> MetadataResult<()> {
            self.metrics
                .track("lock.release", self.delete_lock(key, owner))
                .await
        }

        async fn get_lock(&self, key: &str) -> MetadataResult<Option<LockRow>> {
            self.metrics.track("lock.get", self.live_lock(key)).await
        }
    }

    #[async_trait]
    impl PermanentBlockRepo for SqliteStore {
        async fn insert_permanent_block(
            &self,
            slot: u64,
            block_root: &str,
            network: &str,
        ) -> MetadataResult<bool> {
            self.metrics
                .track(
                    "permanent_block.insert",
                    self.record_permanent_block(slot, block_root, network),
                )
                .await
        }

        async fn get_permanent_block(
            &self,
            network: &str,
            block_root: &str,
        ) -> MetadataResult<Option<PermanentBlockRow>> {
            self.metrics
                .track(
                    "permanent_block.get",
                    self.find_permanent_block(network, block_root),
                )
                .await
        }

        async fn list_permanent_blocks(
            &self,
            network: &str,
        ) -> MetadataResult<Vec<PermanentBlockRow>> {
            self.metrics
                .track("permanent_block.list", self.permanent_blocks_for(network))
                .await
        }
    }
}

/// SQLite schema. Timestamps are fixed-width UTC text so string comparison
/// matches chronological order.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS beacon_state (
    id TEXT PRIMARY KEY,
    node TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    slot INTEGER NOT NULL,
    epoch INTEGER NOT NULL,
    state_root TEXT NOT NULL,
    location TEXT NOT NULL,
    network TEXT NOT NULL,
    beacon_implementation TEXT,
    beacon_version TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_beacon_state_fetched_at ON beacon_state (fetched_at);
CREATE INDEX IF NOT EXISTS idx_beacon_state_network_slot ON beacon_state (network, slot);

CREATE TABLE IF NOT EXISTS beacon_block (
    id TEXT PRIMARY KEY,
    node TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    slot INTEGER NOT NULL,
    epoch INTEGER NOT NULL,
    block_root TEXT NOT NULL,
    location TEXT NOT NULL,
    network TEXT NOT NULL,
    beacon_implementation TEXT,
    beacon_version TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_beacon_block_fetched_at ON beacon_block (fetched_at);
CREATE INDEX IF NOT EXISTS idx_beacon_block_network_slot ON beacon_block (network, slot);

CREATE TABLE IF NOT EXISTS beacon_bad_block (
    id TEXT PRIMARY KEY,
    node TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    slot INTEGER NOT NULL,
    epoch INTEGER NOT NULL,
    block_root TEXT NOT NULL,
    location TEXT NOT NULL,
    network TEXT NOT NULL,
    beacon_implementation TEXT,
    beacon_version TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_beacon_bad_block_fetched_at ON beacon_bad_block (fetched_at);

CREATE TABLE IF NOT EXISTS beacon_bad_blob (
    id TEXT PRIMARY KEY,
    node TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    slot INTEGER NOT NULL,
    epoch INTEGER NOT NULL,
    block_root TEXT NOT NULL,
    blob_index INTEGER NOT NULL,
    location TEXT NOT NULL,
    network TEXT NOT NULL,
    beacon_implementation TEXT,
    beacon_version TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_beacon_bad_blob_fetched_at ON beacon_bad_blob (fetched_at);

CREATE TABLE IF NOT EXISTS execution_block_trace (
    id TEXT PRIMARY KEY,
    node TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    block_hash TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    location TEXT NOT NULL,
    network TEXT NOT NULL,
    execution_implementation TEXT,
    execution_version TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_execution_block_trace_fetched_at ON execution_block_trace (fetched_at);
CREATE INDEX IF NOT EXISTS idx_execution_block_trace_network_number ON execution_block_trace (network, block_number);

CREATE TABLE IF NOT EXISTS execution_bad_block (
    id TEXT PRIMARY KEY,
    node TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    block_hash TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    block_extra_data TEXT,
    location TEXT NOT NULL,
    network TEXT NOT NULL,
    execution_implementation TEXT,
    execution_version TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_execution_bad_block_fetched_at ON execution_bad_block (fetched_at);

CREATE TABLE IF NOT EXISTS distributed_locks (
    key TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_distributed_locks_expires_at ON distributed_locks (expires_at);

CREATE TABLE IF NOT EXISTS permanent_blocks (
    id TEXT PRIMARY KEY,
    slot INTEGER NOT NULL,
    block_root TEXT NOT NULL,
    network TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_permanent_blocks_root_network
    ON permanent_blocks (block_root, network) WHERE deleted_at IS NULL;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tracoor_core::{Artifact, ArtifactFilter, ArtifactRecord, Pagination};

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("index.db"), QueryMetrics::unregistered())
            .await
            .unwrap();
        (dir, store)
    }

    fn block(id: &str, slot: u64) -> Artifact {
        Artifact {
            id: id.to_string(),
            record: ArtifactRecord {
                node: "lighthouse-1".to_string(),
                slot: Some(slot),
                epoch: Some(slot / 32),
                block_root: Some(format!("0x{slot:04x}")),
                location: format!("mainnet/beacon_block/lighthouse-1/{slot}/{id}.ssz"),
                network: "mainnet".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (_dir, store) = store().await;
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_soft_deleted_rows_are_invisible() {
        let (_dir, store) = store().await;
        store
            .insert_artifact(ArtifactKind::BeaconBlock, &block("a", 1))
            .await
            .unwrap();
        store
            .delete_artifact(ArtifactKind::BeaconBlock, "a")
            .await
            .unwrap();

        let rows = store
            .list_artifacts(
                ArtifactKind::BeaconBlock,
                &ArtifactFilter::default(),
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert!(rows.is_empty());

        let err = store
            .delete_artifact(ArtifactKind::BeaconBlock, "a")
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_operations_are_counted_per_kind() {
        let (_dir, store) = store().await;
        store
            .insert_artifact(ArtifactKind::BeaconBlock, &block("a", 1))
            .await
            .unwrap();
        let _ = store
            .count_artifacts(ArtifactKind::BeaconBlock, &ArtifactFilter::default())
            .await;

        assert_eq!(store.metrics().operations("beacon_block.insert"), 1);
        assert_eq!(store.metrics().operations("beacon_block.count"), 1);
        assert_eq!(store.metrics().failures("beacon_block.count"), 1);
    }
}
