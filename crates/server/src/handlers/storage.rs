//! Storage handshake.
//!
//! An agent proves it writes to the same object store as the server by
//! putting a random token at `handshake/<node>` and asking the server to
//! read it back.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracoor_core::api::StorageHandshakeRequest;
use tracoor_core::location::handshake_location;
use tracoor_storage::StorageError;

/// POST /api/v1/storage/handshake
pub async fn storage_handshake(
    State(state): State<AppState>,
    Json(req): Json<StorageHandshakeRequest>,
) -> ApiResult<StatusCode> {
    if req.node.is_empty() || req.node.contains('/') || req.node.starts_with('.') {
        return Err(ApiError::InvalidArgument(format!(
            "invalid node name: {:?}",
            req.node
        )));
    }
    if req.token.is_empty() {
        return Err(ApiError::InvalidArgument("token is required".to_string()));
    }

    let location = handshake_location(&req.node);
    let stored = match state.storage.get(&location).await {
        Ok(data) => data,
        Err(StorageError::NotFound(_)) => {
            return Err(ApiError::InvalidArgument(format!(
                "no handshake token found at {location}"
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if String::from_utf8_lossy(&stored).trim() != req.token {
        tracing::warn!(node = %req.node, location = %location, "Storage handshake token mismatch");
        return Err(ApiError::InvalidArgument(
            "handshake token does not match".to_string(),
        ));
    }

    tracing::info!(node = %req.node, "Storage handshake verified");
    Ok(StatusCode::OK)
}
