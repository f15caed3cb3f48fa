//! HTTP server for tracoor.
//!
//! This crate provides:
//! - Artifact indexing and query endpoints for every artifact kind
//! - The storage handshake used by agents
//! - The permanent beacon block store
//! - The retention sweeper

pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod permanent;
pub mod retention;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use metrics::ServerMetrics;
pub use permanent::{PermanentCandidate, PermanentOutcome, PermanentStore, PermanentWorker};
pub use retention::{RetentionSweeper, SweepStats};
pub use routes::create_router;
pub use state::AppState;
