//! Retention sweeper.
//!
//! Periodically removes artifacts older than their kind's configured
//! retention: the stored object first, then the index row. A row whose
//! object could not be deleted stays indexed and is retried on the next pass.

use crate::metrics::ServerMetrics;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracoor_core::config::RetentionConfig;
use tracoor_core::{ArtifactField, ArtifactFilter, ArtifactKind, OrderBy, Pagination};
use tracoor_metadata::{MetadataError, MetadataStore};
use tracoor_storage::{ObjectStore, delete_idempotent};

/// Counters for one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Rows past their retention that were looked at.
    pub examined: u64,
    /// Rows removed from the index.
    pub deleted: u64,
    /// Rows whose object was already gone.
    pub blobs_missing: u64,
    pub failures: u64,
}

pub struct RetentionSweeper {
    config: RetentionConfig,
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    metrics: Arc<ServerMetrics>,
}

impl RetentionSweeper {
    pub fn new(
        config: RetentionConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            config,
            storage,
            metadata,
            metrics,
        }
    }

    /// Sweep every `sweep_interval` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.sweep_interval_secs,
            batch_size = self.config.batch_size,
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let stats = self.sweep_once().await;
                    if stats.examined > 0 {
                        tracing::info!(
                            examined = stats.examined,
                            deleted = stats.deleted,
                            blobs_missing = stats.blobs_missing,
                            failures = stats.failures,
                            "Retention sweep finished"
                        );
                    }
                }
            }
        }

        tracing::info!("Retention sweeper stopped");
    }

    /// Run a single pass over every kind with a configured retention.
    pub async fn sweep_once(&self) -> SweepStats {
        let timer = self.metrics.retention_sweep_duration.start_timer();
        let now = OffsetDateTime::now_utc();
        let mut stats = SweepStats::default();

        for kind in ArtifactKind::ALL {
            if let Some(retention) = self.config.retention_for(kind) {
                self.sweep_kind(kind, now - retention, &mut stats).await;
            }
        }

        timer.observe_duration();
        stats
    }

    async fn sweep_kind(&self, kind: ArtifactKind, cutoff: OffsetDateTime, stats: &mut SweepStats) {
        let filter = ArtifactFilter::fetched_at_or_before(cutoff);
        let pagination = Pagination::new(0, u64::from(self.config.batch_size))
            .with_order(OrderBy::asc(ArtifactField::FetchedAt));

        let rows = match self
            .metadata
            .list_artifacts(kind, &filter, &pagination)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Failed to list expired artifacts");
                self.fail(kind, "list", stats);
                return;
            }
        };

        for row in rows {
            stats.examined += 1;

            match delete_idempotent(self.storage.as_ref(), &row.record.location).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        kind = %kind,
                        id = %row.id,
                        location = %row.record.location,
                        "Expired artifact object already gone"
                    );
                    stats.blobs_missing += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %kind,
                        id = %row.id,
                        location = %row.record.location,
                        error = %e,
                        "Failed to delete expired artifact object, keeping row for next sweep"
                    );
                    self.fail(kind, "blob", stats);
                    continue;
                }
            }

            match self.metadata.delete_artifact(kind, &row.id).await {
                Ok(()) | Err(MetadataError::NotFound(_)) => {
                    stats.deleted += 1;
                    self.metrics
                        .retention_deleted
                        .with_label_values(&[kind.as_str()])
                        .inc();
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %kind,
                        id = %row.id,
                        error = %e,
                        "Failed to delete expired artifact row"
                    );
                    self.fail(kind, "index", stats);
                }
            }
        }
    }

    fn fail(&self, kind: ArtifactKind, stage: &str, stats: &mut SweepStats) {
        stats.failures += 1;
        self.metrics
            .retention_failures
            .with_label_values(&[kind.as_str(), stage])
            .inc();
    }
}
