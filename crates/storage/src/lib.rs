//! Object storage abstraction and backends for tracoor.
//!
//! Artifact bytes never live in the relational index; rows only carry a
//! `location` that resolves to an object in one of these backends:
//! - local filesystem (atomic writes, traversal protection)
//! - S3-compatible object storage

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectStore, delete_idempotent};

use std::sync::Arc;
use tracoor_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
