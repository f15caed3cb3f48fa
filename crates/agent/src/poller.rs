//! Head polling: turns new chain heads into ingestion jobs.

use crate::error::{AgentError, AgentResult};
use crate::metrics::AgentMetrics;
use crate::queue::IngestQueue;
use crate::source::{ArtifactSource, BeaconHead, ClientVersions, ExecutionBlock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracoor_core::location::artifact_location;
use tracoor_core::{ArtifactKind, ArtifactRecord};

pub struct Poller {
    name: String,
    network: String,
    source: Arc<dyn ArtifactSource>,
    queue: IngestQueue,
    metrics: Arc<AgentMetrics>,
    interval: Duration,
    versions: Option<ClientVersions>,
    /// Last slot queued per beacon kind.
    last_slots: HashMap<ArtifactKind, u64>,
    last_block: Option<u64>,
    /// Bad blocks already queued that the node still reports.
    seen_bad_blocks: HashSet<String>,
}

impl Poller {
    pub fn new(
        name: impl Into<String>,
        network: impl Into<String>,
        source: Arc<dyn ArtifactSource>,
        queue: IngestQueue,
        metrics: Arc<AgentMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
            source,
            queue,
            metrics,
            interval,
            versions: None,
            last_slots: HashMap::new(),
            last_block: None,
            seen_bad_blocks: HashSet::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Head poller started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                enqueued = self.poll_once() => {
                    if enqueued > 0 {
                        tracing::debug!(enqueued, "Queued artifacts from new heads");
                    }
                }
            }
        }
        tracing::info!("Head poller stopped");
    }

    /// Poll both layers once and return the number of jobs queued.
    pub async fn poll_once(&mut self) -> usize {
        if self.versions.is_none() {
            self.versions = Some(self.source.client_versions().await);
        }

        let mut enqueued = 0;
        match self.poll_beacon().await {
            Ok(n) => {
                enqueued += n;
                self.record_poll("beacon", "ok");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Beacon head poll failed");
                self.record_poll("beacon", "error");
            }
        }
        match self.poll_execution().await {
            Ok(Some(n)) => {
                enqueued += n;
                self.record_poll("execution", "ok");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Execution head poll failed");
                self.record_poll("execution", "error");
            }
        }
        enqueued
    }

    fn record_poll(&self, layer: &str, result: &str) {
        self.metrics
            .head_polls
            .with_label_values(&[layer, result])
            .inc();
    }

    async fn poll_beacon(&mut self) -> AgentResult<usize> {
        let head = self.source.beacon_head().await?;

        // A failed enqueue only holds back its own kind.
        let mut enqueued = 0;
        for kind in [ArtifactKind::BeaconState, ArtifactKind::BeaconBlock] {
            if self.last_slots.get(&kind).is_some_and(|last| *last >= head.slot) {
                continue;
            }
            if enqueued == 0 {
                tracing::debug!(slot = head.slot, block_root = %head.block_root, "New beacon head");
            }
            let record = self.beacon_record(kind, &head)?;
            self.queue.enqueue(kind, record).await?;
            self.last_slots.insert(kind, head.slot);
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// `None` when no execution node is configured.
    async fn poll_execution(&mut self) -> AgentResult<Option<usize>> {
        let Some(head) = self.source.execution_head().await? else {
            return Ok(None);
        };

        let mut enqueued = 0;
        if !self.last_block.is_some_and(|last| last >= head.number) {
            tracing::debug!(number = head.number, hash = %head.hash, "New execution head");
            let record = self.execution_record(ArtifactKind::ExecutionBlockTrace, &head)?;
            self.queue
                .enqueue(ArtifactKind::ExecutionBlockTrace, record)
                .await?;
            self.last_block = Some(head.number);
            enqueued += 1;
        }

        let reported = self.source.execution_bad_blocks().await?;
        // Forget blocks the node no longer reports
        self.seen_bad_blocks
            .retain(|hash| reported.iter().any(|bad| &bad.hash == hash));

        for bad in reported {
            if self.seen_bad_blocks.contains(&bad.hash) {
                continue;
            }
            tracing::info!(number = bad.number, hash = %bad.hash, "Execution node reported a bad block");
            let record = self.execution_record(ArtifactKind::ExecutionBadBlock, &bad)?;
            self.queue
                .enqueue(ArtifactKind::ExecutionBadBlock, record)
                .await?;
            self.seen_bad_blocks.insert(bad.hash);
            enqueued += 1;
        }

        Ok(Some(enqueued))
    }

    fn base_record(&self, kind: ArtifactKind) -> ArtifactRecord {
        let mut record = ArtifactRecord {
            node: self.name.clone(),
            network: self.network.clone(),
            fetched_at: OffsetDateTime::now_utc(),
            ..Default::default()
        };
        let versions = self.versions.clone().unwrap_or_default();
        if kind.is_beacon() {
            if let Some(beacon) = versions.beacon {
                record.beacon_implementation = Some(beacon.implementation);
                record.beacon_version = Some(beacon.version);
            }
        } else if let Some(execution) = versions.execution {
            record.execution_implementation = Some(execution.implementation);
            record.execution_version = Some(execution.version);
        }
        record
    }

    fn beacon_record(&self, kind: ArtifactKind, head: &BeaconHead) -> AgentResult<ArtifactRecord> {
        let mut record = self.base_record(kind);
        record.slot = Some(head.slot);
        record.epoch = Some(head.epoch());
        match kind {
            ArtifactKind::BeaconState => record.state_root = Some(head.state_root.clone()),
            _ => record.block_root = Some(head.block_root.clone()),
        }
        with_location(kind, record)
    }

    fn execution_record(
        &self,
        kind: ArtifactKind,
        block: &ExecutionBlock,
    ) -> AgentResult<ArtifactRecord> {
        let mut record = self.base_record(kind);
        record.block_hash = Some(block.hash.clone());
        record.block_number = Some(block.number);
        if kind.supports(tracoor_core::ArtifactField::BlockExtraData) {
            record.block_extra_data = block.extra_data.clone();
        }
        with_location(kind, record)
    }
}

fn with_location(kind: ArtifactKind, mut record: ArtifactRecord) -> AgentResult<ArtifactRecord> {
    record.location = artifact_location(kind, &record).ok_or_else(|| {
        AgentError::Node(format!("{kind} record is missing its coordinates"))
    })?;
    Ok(record)
}
