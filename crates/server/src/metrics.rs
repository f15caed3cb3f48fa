//! Prometheus metrics for the tracoor server.
//!
//! Every server instance owns one [`Registry`]; nothing is registered
//! globally, so several instances can run side by side in one process.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! It must be network-restricted to the scrapers that need it.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry,
};
use tracoor_metadata::QueryMetrics;

/// All server-side metrics, registered against one registry.
#[derive(Clone, Debug)]
pub struct ServerMetrics {
    registry: Registry,
    /// Metadata store operation counters.
    pub query: QueryMetrics,
    /// Artifacts indexed through the create endpoint, by kind.
    pub artifacts_created: IntCounterVec,
    /// Create requests rejected because the natural key already exists.
    pub artifacts_duplicate: IntCounterVec,
    /// Rows removed by the retention sweeper, by kind.
    pub retention_deleted: IntCounterVec,
    /// Per-row sweeper failures, by kind and stage (`list`, `blob`, `index`).
    pub retention_failures: IntCounterVec,
    pub retention_sweep_duration: Histogram,
    /// Permanent store candidates, by outcome.
    pub permanent_outcomes: IntCounterVec,
    /// Candidates dropped because the permanent queue was full.
    pub permanent_queue_dropped: IntCounter,
    pub permanent_queue_depth: IntGauge,
}

impl ServerMetrics {
    pub fn new(registry: Registry) -> prometheus::Result<Self> {
        Ok(Self {
            query: QueryMetrics::new(&registry)?,
            artifacts_created: register_int_counter_vec_with_registry!(
                "tracoor_artifacts_created_total",
                "Artifacts indexed",
                &["kind"],
                registry,
            )?,
            artifacts_duplicate: register_int_counter_vec_with_registry!(
                "tracoor_artifacts_duplicate_total",
                "Create requests for artifacts that were already indexed",
                &["kind"],
                registry,
            )?,
            retention_deleted: register_int_counter_vec_with_registry!(
                "tracoor_retention_deleted_total",
                "Artifacts removed by the retention sweeper",
                &["kind"],
                registry,
            )?,
            retention_failures: register_int_counter_vec_with_registry!(
                "tracoor_retention_failures_total",
                "Retention sweeper failures",
                &["kind", "stage"],
                registry,
            )?,
            retention_sweep_duration: register_histogram_with_registry!(
                "tracoor_retention_sweep_duration_seconds",
                "Time taken by one retention sweep over every kind",
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0],
                registry,
            )?,
            permanent_outcomes: register_int_counter_vec_with_registry!(
                "tracoor_permanent_blocks_total",
                "Permanent store candidates processed",
                &["outcome"],
                registry,
            )?,
            permanent_queue_dropped: register_int_counter_with_registry!(
                "tracoor_permanent_queue_dropped_total",
                "Permanent store candidates dropped because the queue was full",
                registry,
            )?,
            permanent_queue_depth: register_int_gauge_with_registry!(
                "tracoor_permanent_queue_depth",
                "Permanent store candidates waiting to be processed",
                registry,
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
