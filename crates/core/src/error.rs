//! Error types for the core domain.

use crate::artifact::{ArtifactField, ArtifactKind};
use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} does not have field {field}")]
    UnsupportedField {
        kind: ArtifactKind,
        field: ArtifactField,
    },

    #[error("{field} value {value} exceeds the signed 64-bit range")]
    OutOfRange { field: ArtifactField, value: u64 },

    #[error("unknown artifact kind: {0}")]
    UnknownKind(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid order_by: {0}")]
    InvalidOrderBy(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
