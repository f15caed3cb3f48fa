//! Artifact index repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracoor_core::{Artifact, ArtifactField, ArtifactFilter, ArtifactKind, Pagination};

/// Query engine over the six artifact tables.
///
/// Every read ignores soft-deleted rows.
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    /// Insert a new row. The caller assigns `artifact.id`.
    async fn insert_artifact(&self, kind: ArtifactKind, artifact: &Artifact)
    -> MetadataResult<()>;

    /// Soft-delete a row by id. Returns `NotFound` if no live row matches.
    async fn delete_artifact(&self, kind: ArtifactKind, id: &str) -> MetadataResult<()>;

    /// Count live rows matching `filter`. The filter must not be empty.
    async fn count_artifacts(
        &self,
        kind: ArtifactKind,
        filter: &ArtifactFilter,
    ) -> MetadataResult<u64>;

    /// List live rows matching `filter`, ordered and paginated.
    ///
    /// A zero limit means "no limit".
    async fn list_artifacts(
        &self,
        kind: ArtifactKind,
        filter: &ArtifactFilter,
        pagination: &Pagination,
    ) -> MetadataResult<Vec<Artifact>>;

    /// Overwrite every column of a live row. Returns `NotFound` if absent.
    async fn update_artifact(&self, kind: ArtifactKind, artifact: &Artifact)
    -> MetadataResult<()>;

    /// Distinct non-null values per field, sampled from a bounded scan.
    async fn distinct_values(
        &self,
        kind: ArtifactKind,
        fields: &[ArtifactField],
    ) -> MetadataResult<BTreeMap<ArtifactField, Vec<String>>>;
}
