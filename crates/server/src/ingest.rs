//! Idempotent artifact creation.

use crate::error::{ApiError, ApiResult};
use crate::permanent::PermanentCandidate;
use crate::state::AppState;
use tracoor_core::{Artifact, ArtifactFilter, ArtifactKind, ArtifactRecord, Pagination};
use uuid::Uuid;

/// Index a new artifact whose object is already in storage.
///
/// Fails with [`ApiError::AlreadyExists`] when a row with the same natural
/// key exists. Two concurrent creates for one key can both pass the check;
/// the index then holds two rows for it.
pub async fn create_artifact(
    state: &AppState,
    kind: ArtifactKind,
    record: ArtifactRecord,
) -> ApiResult<Artifact> {
    record.validate(kind)?;

    if !state.storage.exists(&record.location).await? {
        return Err(ApiError::InvalidArgument(format!(
            "location {} does not exist in storage",
            record.location
        )));
    }

    let filter = ArtifactFilter::natural_key(kind, &record);
    let existing = state
        .metadata
        .list_artifacts(kind, &filter, &Pagination::new(0, 1))
        .await?;
    if let Some(existing) = existing.first() {
        state
            .metrics
            .artifacts_duplicate
            .with_label_values(&[kind.as_str()])
            .inc();
        return Err(ApiError::AlreadyExists(format!(
            "{kind} already indexed as {}",
            existing.id
        )));
    }

    let artifact = Artifact {
        id: Uuid::new_v4().to_string(),
        record,
    };
    state.metadata.insert_artifact(kind, &artifact).await?;

    state
        .metrics
        .artifacts_created
        .with_label_values(&[kind.as_str()])
        .inc();
    tracing::info!(
        kind = %kind,
        id = %artifact.id,
        node = %artifact.record.node,
        location = %artifact.record.location,
        "Indexed artifact"
    );

    if let Some(candidate) = PermanentCandidate::from_block(kind, &artifact) {
        state.permanent.queue_block(candidate);
    }

    Ok(artifact)
}
