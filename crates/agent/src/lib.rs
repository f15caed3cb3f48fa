//! tracoor collector agent.
//!
//! The agent follows the heads of a beacon node and an optional execution
//! node, writes the artifacts it sees to the shared object store and indexes
//! them through the server:
//! - [`poller`] turns new heads into jobs
//! - [`queue`] holds one bounded queue and worker per artifact kind
//! - [`pipeline`] fetches, stores and indexes one job idempotently

pub mod client;
pub mod error;
pub mod handshake;
pub mod metrics;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod source;

pub use client::{HttpIndexClient, IndexClient};
pub use error::{AgentError, AgentResult};
pub use handshake::storage_handshake;
pub use metrics::{AgentMetrics, metrics_router};
pub use pipeline::{Job, JobOutcome, Pipeline};
pub use poller::Poller;
pub use queue::{IngestQueue, QueueWorker};
pub use source::{
    ArtifactSource, BeaconHead, ClientVersion, ClientVersions, ExecutionBlock, HttpSource,
};
