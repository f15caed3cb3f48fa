//! Storage handshake: proves the agent and the server share an object store.

use crate::client::IndexClient;
use crate::error::AgentResult;
use bytes::Bytes;
use tracoor_core::location::handshake_location;
use tracoor_storage::ObjectStore;
use uuid::Uuid;

/// Write a fresh token under the node's handshake key and ask the server to
/// read it back.
pub async fn storage_handshake(
    storage: &dyn ObjectStore,
    index: &dyn IndexClient,
    node: &str,
) -> AgentResult<()> {
    let token = Uuid::new_v4().to_string();
    let location = handshake_location(node);
    storage.put(&location, Bytes::from(token.clone())).await?;
    index.storage_handshake(node, &token).await?;
    tracing::info!(node = %node, location = %location, "Storage handshake succeeded");
    Ok(())
}
