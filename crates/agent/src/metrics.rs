//! Prometheus metrics for the collector agent.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry,
};
use std::sync::Arc;

/// Agent-side metrics, registered against one registry per agent.
#[derive(Clone, Debug)]
pub struct AgentMetrics {
    registry: Registry,
    /// Jobs waiting in each kind's queue.
    pub queue_depth: IntGaugeVec,
    /// Time from enqueue to completion, by kind.
    pub job_duration: HistogramVec,
    /// Finished jobs, by kind and outcome (`indexed`, `already_indexed`, `failed`).
    pub jobs: IntCounterVec,
    /// Head polls, by layer (`beacon`, `execution`) and result.
    pub head_polls: IntCounterVec,
}

impl AgentMetrics {
    pub fn new(registry: Registry) -> prometheus::Result<Self> {
        Ok(Self {
            queue_depth: register_int_gauge_vec_with_registry!(
                "tracoor_agent_queue_depth",
                "Jobs waiting in the ingestion queue",
                &["kind"],
                registry,
            )?,
            job_duration: register_histogram_vec_with_registry!(
                "tracoor_agent_job_duration_seconds",
                "Time from enqueue until the job finished",
                &["kind"],
                vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0],
                registry,
            )?,
            jobs: register_int_counter_vec_with_registry!(
                "tracoor_agent_jobs_total",
                "Ingestion jobs processed",
                &["kind", "outcome"],
                registry,
            )?,
            head_polls: register_int_counter_vec_with_registry!(
                "tracoor_agent_head_polls_total",
                "Head polls against the beacon and execution nodes",
                &["layer", "result"],
                registry,
            )?,
            registry,
        })
    }

    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

async fn metrics_handler(State(metrics): State<Arc<AgentMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
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

/// Router serving `GET /metrics`.
pub fn metrics_router(metrics: Arc<AgentMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_router_serves_text_format() {
        let metrics = Arc::new(AgentMetrics::new(Registry::new()).unwrap());
        metrics
            .jobs
            .with_label_values(&["beacon_block", "indexed"])
            .inc();

        let response = metrics_router(metrics)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(
            "tracoor_agent_jobs_total{kind=\"beacon_block\",outcome=\"indexed\"} 1"
        ));
    }
}
