//! Agent error types.

use reqwest::StatusCode;
use thiserror::Error;
use tracoor_storage::StorageError;

/// Errors raised while polling nodes or ingesting artifacts.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The tracoor server rejected a request.
    #[error("server error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    /// The server already indexes an artifact with this natural key.
    #[error("already indexed: {0}")]
    AlreadyExists(String),

    /// A node returned an error or an unexpected payload.
    #[error("node error: {0}")]
    Node(String),

    /// The source cannot produce artifacts of this kind.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Core(#[from] tracoor_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The queue for this kind has shut down.
    #[error("queue closed for {0}")]
    QueueClosed(String),
}

impl AgentError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AgentError::AlreadyExists(_))
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;
