//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::metrics::QueryMetrics;
use crate::models::*;
use crate::query;
use crate::repos::{ArtifactRepo, LockRepo, PermanentBlockRepo};
use crate::store::{MetadataStore, artifact_op, lock_held};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Row};
use std::collections::BTreeMap;
use std::str::FromStr;
use time::OffsetDateTime;
use tracoor_core::config::PgSslMode;
use tracoor_core::{
    Artifact, ArtifactField, ArtifactFilter, ArtifactKind, DISTINCT_VALUES_SCAN_LIMIT, Pagination,
};
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

const LOCK_COLUMNS: &str = "key, owner, expires_at, created_at, updated_at, deleted_at";
const PERMANENT_COLUMNS: &str = "id, slot, block_root, network, created_at, deleted_at";

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
    metrics: QueryMetrics,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        metrics: QueryMetrics,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms, metrics).await
    }

    /// Connect using individual parameters, so the password can come from
    /// its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        metrics: QueryMetrics,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms, metrics).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        metrics: QueryMetrics,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool, metrics };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    async fn insert_artifact_row(
        &self,
        kind: ArtifactKind,
        artifact: &Artifact,
    ) -> MetadataResult<()> {
        let mut qb = query::build_insert::<Postgres>(kind, artifact)?;
        qb.build().execute(&self.pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                MetadataError::AlreadyExists(format!("{kind} {}", artifact.id))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn soft_delete_artifact(&self, kind: ArtifactKind, id: &str) -> MetadataResult<()> {
        let mut qb = query::build_soft_delete::<Postgres>(kind, id, OffsetDateTime::now_utc())?;
        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("{kind} {id}")));
        }
        Ok(())
    }

    async fn count_rows(&self, kind: ArtifactKind, filter: &ArtifactFilter) -> MetadataResult<u64> {
        let mut qb = query::build_count::<Postgres>(kind, filter)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn list_rows(
        &self,
        kind: ArtifactKind,
        filter: &ArtifactFilter,
        pagination: &Pagination,
    ) -> MetadataResult<Vec<Artifact>> {
        let mut qb = query::build_list::<Postgres>(kind, filter, pagination)?;
        let rows: Vec<ArtifactRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Artifact::try_from).collect()
    }

    async fn update_row(&self, kind: ArtifactKind, artifact: &Artifact) -> MetadataResult<()> {
        let mut qb = query::build_update::<Postgres>(kind, artifact)?;
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
        let mut qb = query::build_distinct::<Postgres>(kind, fields, DISTINCT_VALUES_SCAN_LIMIT)?;
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

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM distributed_locks WHERE expires_at < $1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let existing: Option<LockRow> = sqlx::query_as(&format!(
            "SELECT {LOCK_COLUMNS} FROM distributed_locks WHERE key = $1 FOR UPDATE"
        ))
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let insert = "INSERT INTO distributed_locks (key, owner, expires_at, created_at, updated_at) \
                      VALUES ($1, $2, $3, $4, $4) ON CONFLICT (key) DO NOTHING";

        let acquisition = match existing {
            None => {
                // A concurrent transaction may have inserted the key after our
                // read; ON CONFLICT waits for it and reports zero rows.
                let inserted = sqlx::query(insert)
                    .bind(key)
                    .bind(owner)
                    .bind(expires_at)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                if inserted == 0 {
                    let holder: LockRow = sqlx::query_as(&format!(
                        "SELECT {LOCK_COLUMNS} FROM distributed_locks WHERE key = $1"
                    ))
                    .bind(key)
                    .fetch_one(&mut *tx)
                    .await?;
                    return Err(lock_held(holder));
                }
                LockAcquisition::Created
            }
            Some(row) if row.deleted_at.is_some() => {
                sqlx::query("DELETE FROM distributed_locks WHERE key = $1")
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(insert)
                    .bind(key)
                    .bind(owner)
                    .bind(expires_at)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                LockAcquisition::Recreated
            }
            Some(row) if row.expires_at <= now || row.owner == owner => {
                sqlx::query(
                    "UPDATE distributed_locks SET owner = $1, expires_at = $2, updated_at = $3 \
                     WHERE key = $4",
                )
                .bind(owner)
                .bind(expires_at)
                .bind(now)
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
        sqlx::query("DELETE FROM distributed_locks WHERE key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn live_lock(&self, key: &str) -> MetadataResult<Option<LockRow>> {
        let row = sqlx::query_as(&format!(
            "SELECT {LOCK_COLUMNS} FROM distributed_locks \
             WHERE key = $1 AND deleted_at IS NULL AND expires_at > $2"
        ))
        .bind(key)
        .bind(OffsetDateTime::now_utc())
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
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(slot)
        .bind(block_root)
        .bind(network)
        .bind(OffsetDateTime::now_utc())
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
             WHERE network = $1 AND block_root = $2 AND deleted_at IS NULL"
        ))
        .bind(network)
        .bind(block_root)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn permanent_blocks_for(&self, network: &str) -> MetadataResult<Vec<PermanentBlockRow>> {
        let rows = sqlx::query_as(&format!(
            "SELECT {PERMANENT_COLUMNS} FROM permanent_blocks \
             WHERE network = $1 AND deleted_at IS NULL ORDER BY slot ASC, block_root ASC"
        ))
        .bind(network)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactRepo for PostgresStore {
    async fn insert_artifact(&self, kind: ArtifactKind, artifact: &Artifact) -> MetadataResult<()> {
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

    async fn update_artifact(&self, kind: ArtifactKind, artifact: &Artifact) -> MetadataResult<()> {
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
impl LockRepo for PostgresStore {
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
impl PermanentBlockRepo for PostgresStore {
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

    async fn list_permanent_blocks(&self, network: &str) -> MetadataResult<Vec<PermanentBlockRow>> {
        self.metrics
            .track("permanent_block.list", self.permanent_blocks_for(network))
            .await
    }
}
