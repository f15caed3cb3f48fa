//! Permanent copies of beacon blocks.
//!
//! Indexed blocks are eventually removed by the retention sweeper. Before
//! that happens, every block seen by any server is copied once to
//! `permanent/<network>/<root><ext>` and recorded in `permanent_blocks`.
//! Servers sharing an index coordinate through a lease lock per block, so
//! each block is copied by exactly one of them.

use crate::metrics::ServerMetrics;
use moka::sync::Cache;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracoor_core::config::PermanentStoreConfig;
use tracoor_core::location::permanent_location;
use tracoor_core::{Artifact, ArtifactKind};
use tracoor_metadata::{MetadataError, MetadataStore};
use tracoor_storage::{ObjectStore, StorageError};

/// A block waiting to be made permanent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermanentCandidate {
    pub network: String,
    pub slot: u64,
    pub block_root: String,
    /// Location of the indexed copy.
    pub location: String,
}

impl PermanentCandidate {
    /// Build a candidate from an indexed beacon block.
    pub fn from_block(kind: ArtifactKind, artifact: &Artifact) -> Option<Self> {
        if kind != ArtifactKind::BeaconBlock {
            return None;
        }
        let record = &artifact.record;
        Some(Self {
            network: record.network.clone(),
            slot: record.slot?,
            block_root: record.block_root.clone()?,
            location: record.location.clone(),
        })
    }

    pub fn lock_key(&self) -> String {
        format!("permanent_block:{}:{}", self.network, self.block_root)
    }

    fn cache_key(&self) -> String {
        format!("{}:{}", self.network, self.block_root)
    }
}

/// What happened to one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermanentOutcome {
    /// The service is disabled.
    Disabled,
    /// The queue was full.
    Dropped,
    /// This instance already stored the block.
    CachedBeforeLock,
    /// Another owner holds the block's lock.
    LockHeld,
    /// The block was stored while this instance waited for the lock.
    CachedAfterLock,
    /// The permanent object already existed; its record was ensured.
    AlreadyStored,
    /// The block was copied and recorded.
    Stored,
    Failed,
}

impl PermanentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Dropped => "dropped",
            Self::CachedBeforeLock => "cached",
            Self::LockHeld => "lock_held",
            Self::CachedAfterLock => "cached_after_lock",
            Self::AlreadyStored => "already_stored",
            Self::Stored => "stored",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PermanentError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

struct Job {
    candidate: PermanentCandidate,
    notify: Option<oneshot::Sender<PermanentOutcome>>,
}

struct Inner {
    enabled: bool,
    owner: String,
    lock_ttl: time::Duration,
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    cache: Cache<String, ()>,
    metrics: Arc<ServerMetrics>,
}

/// Handle for queueing candidates. Cheap to clone.
#[derive(Clone)]
pub struct PermanentStore {
    inner: Arc<Inner>,
    tx: mpsc::Sender<Job>,
}

/// Sequential worker draining a [`PermanentStore`] queue.
pub struct PermanentWorker {
    store: PermanentStore,
    rx: mpsc::Receiver<Job>,
}

impl PermanentStore {
    /// Create the queue handle and its worker.
    ///
    /// `owner` prefixes this instance's lease owners in lock rows and must be
    /// unique among servers sharing the index.
    pub fn new(
        config: &PermanentStoreConfig,
        owner: impl Into<String>,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        metrics: Arc<ServerMetrics>,
    ) -> (Self, PermanentWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let store = Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                owner: owner.into(),
                lock_ttl: config.lock_ttl(),
                storage,
                metadata,
                cache: Cache::new(config.cache_capacity),
                metrics,
            }),
            tx,
        };
        let worker = PermanentWorker {
            store: store.clone(),
            rx,
        };
        (store, worker)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Queue a candidate without waiting. Drops it with a warning when the
    /// queue is full.
    pub fn queue_block(&self, candidate: PermanentCandidate) {
        let _ = self.enqueue(candidate, None);
    }

    /// Queue a candidate and get notified once it has been processed.
    pub fn queue_block_with_notify(
        &self,
        candidate: PermanentCandidate,
    ) -> oneshot::Receiver<PermanentOutcome> {
        let (notify, done) = oneshot::channel();
        if let Err(job) = self.enqueue(candidate, Some(notify))
            && let Some(notify) = job.notify
        {
            let outcome = if self.inner.enabled {
                PermanentOutcome::Dropped
            } else {
                PermanentOutcome::Disabled
            };
            let _ = notify.send(outcome);
        }
        done
    }

    /// Hand the job to the worker, or give it back if it was not queued.
    fn enqueue(
        &self,
        candidate: PermanentCandidate,
        notify: Option<oneshot::Sender<PermanentOutcome>>,
    ) -> Result<(), Job> {
        let job = Job { candidate, notify };
        if !self.inner.enabled {
            return Err(job);
        }
        match self.tx.try_send(job) {
            Ok(()) => {
                self.inner.metrics.permanent_queue_depth.inc();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    network = %job.candidate.network,
                    block_root = %job.candidate.block_root,
                    "Permanent block queue full, dropping block"
                );
                self.inner.metrics.permanent_queue_dropped.inc();
                Err(job)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    block_root = %job.candidate.block_root,
                    "Permanent block worker stopped, dropping block"
                );
                Err(job)
            }
        }
    }

    /// Make one candidate permanent.
    ///
    /// Every call takes the block's lock under its own lease owner, so
    /// concurrent calls on this instance exclude each other the same way
    /// calls on other instances sharing the index do.
    pub async fn process(&self, candidate: &PermanentCandidate) -> PermanentOutcome {
        let outcome = self.process_inner(candidate).await;
        self.inner
            .metrics
            .permanent_outcomes
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }

    async fn process_inner(&self, candidate: &PermanentCandidate) -> PermanentOutcome {
        let inner = &self.inner;
        let cache_key = candidate.cache_key();
        if inner.cache.contains_key(&cache_key) {
            return PermanentOutcome::CachedBeforeLock;
        }

        let lock_key = candidate.lock_key();
        let lease_owner = format!("{}:{}", inner.owner, uuid::Uuid::new_v4());
        match inner
            .metadata
            .acquire_lock(&lock_key, &lease_owner, inner.lock_ttl)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_lock_held() => {
                tracing::debug!(key = %lock_key, error = %e, "Permanent block owned elsewhere");
                return PermanentOutcome::LockHeld;
            }
            Err(e) => {
                tracing::warn!(key = %lock_key, error = %e, "Failed to acquire permanent block lock");
                return PermanentOutcome::Failed;
            }
        }

        // Another call may have stored the block and released the lock
        // between our cache check and the acquire.
        let outcome = if inner.cache.contains_key(&cache_key) {
            PermanentOutcome::CachedAfterLock
        } else {
            match self.copy_and_record(candidate).await {
                Ok(outcome) => {
                    inner.cache.insert(cache_key, ());
                    outcome
                }
                Err(e) => {
                    tracing::warn!(
                        network = %candidate.network,
                        block_root = %candidate.block_root,
                        location = %candidate.location,
                        error = %e,
                        "Failed to store permanent block"
                    );
                    PermanentOutcome::Failed
                }
            }
        };

        if let Err(e) = inner.metadata.release_lock(&lock_key, &lease_owner).await {
            tracing::warn!(key = %lock_key, error = %e, "Failed to release permanent block lock");
        }

        outcome
    }

    async fn copy_and_record(
        &self,
        candidate: &PermanentCandidate,
    ) -> Result<PermanentOutcome, PermanentError> {
        let inner = &self.inner;
        let destination = permanent_location(
            &candidate.network,
            &candidate.block_root,
            &candidate.location,
        );

        let outcome = if inner.storage.exists(&destination).await? {
            PermanentOutcome::AlreadyStored
        } else {
            inner.storage.copy(&candidate.location, &destination).await?;
            tracing::info!(
                network = %candidate.network,
                slot = candidate.slot,
                block_root = %candidate.block_root,
                location = %destination,
                "Stored permanent block"
            );
            PermanentOutcome::Stored
        };

        inner
            .metadata
            .insert_permanent_block(candidate.slot, &candidate.block_root, &candidate.network)
            .await?;

        Ok(outcome)
    }
}

impl PermanentWorker {
    /// Process queued candidates one at a time until cancelled.
    ///
    /// A lease held when cancellation arrives is left to expire.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(owner = %self.store.owner(), "Permanent block worker started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.store.inner.metrics.permanent_queue_depth.dec();

            let outcome = self.store.process(&job.candidate).await;
            if let Some(notify) = job.notify {
                let _ = notify.send(outcome);
            }
        }
        tracing::info!("Permanent block worker stopped");
    }
}
