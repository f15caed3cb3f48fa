//! Request and response bodies for the REST API.
//!
//! Shared between the server handlers and the agent's HTTP client.

use crate::artifact::{Artifact, ArtifactField, ArtifactRecord};
use crate::filter::{ArtifactFilter, Pagination};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Create request: the record to index.
pub type CreateArtifactRequest = ArtifactRecord;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateArtifactResponse {
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListArtifactsRequest {
    pub filter: ArtifactFilter,
    pub pagination: Pagination,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListArtifactsResponse {
    pub items: Vec<Artifact>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CountArtifactsRequest {
    pub filter: ArtifactFilter,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountArtifactsResponse {
    pub count: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DistinctValuesRequest {
    pub fields: Vec<ArtifactField>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DistinctValuesResponse {
    pub values: BTreeMap<ArtifactField, Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageHandshakeRequest {
    pub node: String,
    pub token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error body returned by every failing endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Error code for a duplicate create.
pub const CODE_ALREADY_EXISTS: &str = "already_exists";
