//! Core domain types for tracoor.
//!
//! This crate defines the data model shared by the server, the agent and the
//! storage crates:
//! - Artifact kinds and their column descriptors
//! - Filters, predicates and pagination for the query engine
//! - Deterministic object-store locations
//! - REST request/response bodies
//! - Configuration

pub mod api;
pub mod artifact;
pub mod config;
pub mod error;
pub mod filter;
pub mod location;

pub use artifact::{Artifact, ArtifactField, ArtifactKind, ArtifactRecord};
pub use error::{Error, Result};
pub use filter::{
    ArtifactFilter, FieldValue, OrderBy, Pagination, Predicate, PredicateOp, SortDirection,
};

/// Upper bound on rows scanned by a distinct-values query.
pub const DISTINCT_VALUES_SCAN_LIMIT: u64 = 1000;

/// Maximum page size accepted by list endpoints.
pub const MAX_LIST_LIMIT: u64 = 1000;
