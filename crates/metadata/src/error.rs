//! Metadata store error types.

use thiserror::Error;
use time::OffsetDateTime;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid argument: {0}")]
    Invalid(#[from] tracoor_core::Error),

    /// The lock is held by another owner whose lease has not expired.
    #[error("lock {key} is held by {owner} until {expires_at}")]
    LockHeld {
        key: String,
        owner: String,
        expires_at: OffsetDateTime,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether this is an ownership conflict on a distributed lock.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, MetadataError::LockHeld { .. })
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_held_message_names_owner() {
        let err = MetadataError::LockHeld {
            key: "permanent_block:mainnet:0x1".to_string(),
            owner: "nodeA".to_string(),
            expires_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(err.is_lock_held());
        let msg = err.to_string();
        assert!(msg.contains("nodeA"));
        assert!(msg.contains("permanent_block:mainnet:0x1"));
    }

    #[test]
    fn test_core_errors_convert() {
        let err: MetadataError = tracoor_core::Error::UnknownField("nope".to_string()).into();
        assert!(matches!(err, MetadataError::Invalid(_)));
        assert!(!err.is_lock_held());
    }
}
