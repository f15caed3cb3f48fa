//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check for load balancers/k8s probes
        .route("/v1/health", get(handlers::health_check))
        .route(
            "/api/v1/storage/handshake",
            post(handlers::storage_handshake),
        )
        // Per-kind artifact endpoints; `kind` is the kebab-case slug
        .route("/api/v1/{kind}", post(handlers::create_artifact))
        .route("/api/v1/{kind}/list", post(handlers::list_artifacts))
        .route("/api/v1/{kind}/count", post(handlers::count_artifacts))
        .route("/api/v1/{kind}/distinct", post(handlers::distinct_values));

    let mut router = Router::new().merge(api_routes);

    // The metrics endpoint is unauthenticated; keep it network-restricted.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
