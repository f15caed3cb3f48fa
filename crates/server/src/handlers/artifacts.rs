//! Artifact endpoints, shared by every kind.
//!
//! The kind comes from the path (`/api/v1/{kind}/...`) in kebab case.

use crate::error::ApiResult;
use crate::ingest;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracoor_core::api::{
    CountArtifactsRequest, CountArtifactsResponse, CreateArtifactRequest, CreateArtifactResponse,
    DistinctValuesRequest, DistinctValuesResponse, ListArtifactsRequest, ListArtifactsResponse,
};
use tracoor_core::{ArtifactKind, MAX_LIST_LIMIT};

fn parse_kind(slug: &str) -> ApiResult<ArtifactKind> {
    Ok(slug.parse()?)
}

/// POST /api/v1/{kind}
pub async fn create_artifact(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<CreateArtifactRequest>,
) -> ApiResult<(StatusCode, Json<CreateArtifactResponse>)> {
    let kind = parse_kind(&kind)?;
    let artifact = ingest::create_artifact(&state, kind, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateArtifactResponse { id: artifact.id }),
    ))
}

/// POST /api/v1/{kind}/list
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<ListArtifactsRequest>,
) -> ApiResult<Json<ListArtifactsResponse>> {
    let kind = parse_kind(&kind)?;
    req.pagination.require_limit(MAX_LIST_LIMIT)?;

    let items = state
        .metadata
        .list_artifacts(kind, &req.filter, &req.pagination)
        .await?;
    Ok(Json(ListArtifactsResponse { items }))
}

/// POST /api/v1/{kind}/count
pub async fn count_artifacts(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<CountArtifactsRequest>,
) -> ApiResult<Json<CountArtifactsResponse>> {
    let kind = parse_kind(&kind)?;
    let count = state.metadata.count_artifacts(kind, &req.filter).await?;
    Ok(Json(CountArtifactsResponse { count }))
}

/// POST /api/v1/{kind}/distinct
pub async fn distinct_values(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<DistinctValuesRequest>,
) -> ApiResult<Json<DistinctValuesResponse>> {
    let kind = parse_kind(&kind)?;
    let values = state.metadata.distinct_values(kind, &req.fields).await?;
    Ok(Json(DistinctValuesResponse { values }))
}
