//! Per-operation counters for the metadata store.

use crate::error::MetadataResult;
use prometheus::{IntCounterVec, Opts, Registry, register_int_counter_vec_with_registry};
use std::future::Future;

/// Attempted/failed counters keyed by logical operation name
/// (e.g. `beacon_state.list`, `lock.acquire`).
#[derive(Clone, Debug)]
pub struct QueryMetrics {
    operations: IntCounterVec,
    failures: IntCounterVec,
}

impl QueryMetrics {
    /// Create the counters and register them with `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            operations: register_int_counter_vec_with_registry!(
                "tracoor_metadata_operations_total",
                "Metadata store operations attempted",
                &["operation"],
                registry,
            )?,
            failures: register_int_counter_vec_with_registry!(
                "tracoor_metadata_operation_failures_total",
                "Metadata store operations that returned an error",
                &["operation"],
                registry,
            )?,
        })
    }

    /// Counters that are not exported anywhere. Used by tests and tools that
    /// do not serve metrics.
    pub fn unregistered() -> Self {
        let build = |name: &str, help: &str| {
            IntCounterVec::new(Opts::new(name, help), &["operation"])
                .unwrap_or_else(|e| unreachable!("static metric definition is valid: {e}"))
        };
        Self {
            operations: build("tracoor_metadata_operations_total", "operations"),
            failures: build("tracoor_metadata_operation_failures_total", "failures"),
        }
    }

    /// Run `fut`, counting the attempt and, on error, the failure.
    pub async fn track<T, F>(&self, operation: &str, fut: F) -> MetadataResult<T>
    where
        F: Future<Output = MetadataResult<T>>,
    {
        self.operations.with_label_values(&[operation]).inc();
        let result = fut.await;
        if result.is_err() {
            self.failures.with_label_values(&[operation]).inc();
        }
        result
    }

    pub fn operations(&self, operation: &str) -> u64 {
        self.operations.with_label_values(&[operation]).get()
    }

    pub fn failures(&self, operation: &str) -> u64 {
        self.failures.with_label_values(&[operation]).get()
    }
}

impl Default for QueryMetrics {
    fn default() -> Self {
        Self::unregistered()
    }
}
