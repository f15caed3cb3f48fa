//! Bounded per-kind ingestion queues.
//!
//! Each artifact kind gets its own channel and worker so a slow kind (beacon
//! states are large) never delays the others. Producers wait when a channel
//! is full.

use crate::error::{AgentError, AgentResult};
use crate::metrics::AgentMetrics;
use crate::pipeline::{Job, Pipeline};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracoor_core::config::AgentQueueConfig;
use tracoor_core::{ArtifactKind, ArtifactRecord};

/// Producer side of the queues.
#[derive(Clone)]
pub struct IngestQueue {
    senders: HashMap<ArtifactKind, mpsc::Sender<Job>>,
    metrics: Arc<AgentMetrics>,
}

impl IngestQueue {
    /// Create one channel per kind and the workers that drain them.
    pub fn new(
        config: &AgentQueueConfig,
        pipeline: Arc<Pipeline>,
        metrics: Arc<AgentMetrics>,
    ) -> (Self, Vec<QueueWorker>) {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();
        for kind in ArtifactKind::ALL {
            let (tx, rx) = mpsc::channel(config.capacity(kind).max(1));
            senders.insert(kind, tx);
            workers.push(QueueWorker {
                kind,
                rx,
                pipeline: pipeline.clone(),
                metrics: metrics.clone(),
            });
        }
        (Self { senders, metrics }, workers)
    }

    /// Queue an artifact, waiting for room if the kind's queue is full.
    pub async fn enqueue(&self, kind: ArtifactKind, record: ArtifactRecord) -> AgentResult<()> {
        let sender = self
            .senders
            .get(&kind)
            .ok_or_else(|| AgentError::QueueClosed(kind.to_string()))?;
        sender
            .send(Job::new(kind, record))
            .await
            .map_err(|_| AgentError::QueueClosed(kind.to_string()))?;
        self.metrics
            .queue_depth
            .with_label_values(&[kind.as_str()])
            .set((sender.max_capacity() - sender.capacity()) as i64);
        Ok(())
    }

    /// Jobs currently waiting for `kind`.
    pub fn depth(&self, kind: ArtifactKind) -> usize {
        self.senders
            .get(&kind)
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0)
    }
}

/// Consumer side of one kind's queue.
pub struct QueueWorker {
    kind: ArtifactKind,
    rx: mpsc::Receiver<Job>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<AgentMetrics>,
}

impl QueueWorker {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!(kind = %self.kind, "Ingestion worker started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.handle(job).await;
        }
        tracing::debug!(kind = %self.kind, "Ingestion worker stopped");
    }

    async fn handle(&self, job: Job) {
        let kind = self.kind.as_str();
        let outcome = match self.pipeline.process(&job).await {
            Ok(outcome) => outcome.label(),
            Err(e) => {
                tracing::warn!(
                    kind = %self.kind,
                    location = %job.record.location,
                    error = %e,
                    "Failed to ingest artifact"
                );
                "failed"
            }
        };

        self.metrics.jobs.with_label_values(&[kind, outcome]).inc();
        self.metrics
            .job_duration
            .with_label_values(&[kind])
            .observe(job.enqueued_at.elapsed().as_secs_f64());
        self.metrics
            .queue_depth
            .with_label_values(&[kind])
            .set(self.rx.len() as i64);
    }
}
