//! Relational index for tracoor.
//!
//! This crate owns everything stored in SQL:
//! - Artifact rows for the six artifact kinds, behind one generic query engine
//! - Lease-based distributed locks shared by every server instance
//! - Records of blocks copied to permanent storage

pub mod error;
pub mod metrics;
pub mod models;
pub mod postgres;
mod query;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use metrics::QueryMetrics;
pub use models::{LockAcquisition, LockLease, LockRow, PermanentBlockRow};
pub use postgres::PostgresStore;
pub use repos::{ArtifactRepo, LockRepo, PermanentBlockRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use tracoor_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(
    config: &MetadataConfig,
    metrics: QueryMetrics,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            let store = SqliteStore::new(path, metrics).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms, metrics)
                    .await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                    metrics,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
