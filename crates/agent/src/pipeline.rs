//! Fetch, store and index one artifact.

use crate::client::IndexClient;
use crate::error::AgentResult;
use crate::source::ArtifactSource;
use std::sync::Arc;
use std::time::Instant;
use tracoor_core::api::ListArtifactsRequest;
use tracoor_core::{ArtifactFilter, ArtifactKind, ArtifactRecord, Pagination};
use tracoor_storage::ObjectStore;

/// One unit of ingestion work.
#[derive(Clone, Debug)]
pub struct Job {
    pub kind: ArtifactKind,
    pub record: ArtifactRecord,
    pub enqueued_at: Instant,
}

impl Job {
    pub fn new(kind: ArtifactKind, record: ArtifactRecord) -> Self {
        Self {
            kind,
            record,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The server indexed the artifact under this id.
    Indexed(String),
    /// Another agent or an earlier attempt got there first.
    AlreadyIndexed,
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Indexed(_) => "indexed",
            JobOutcome::AlreadyIndexed => "already_indexed",
        }
    }
}

pub struct Pipeline {
    storage: Arc<dyn ObjectStore>,
    index: Arc<dyn IndexClient>,
    source: Arc<dyn ArtifactSource>,
}

impl Pipeline {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        index: Arc<dyn IndexClient>,
        source: Arc<dyn ArtifactSource>,
    ) -> Self {
        Self {
            storage,
            index,
            source,
        }
    }

    /// Run a job to completion.
    ///
    /// Safe to repeat: a stored and indexed artifact is neither fetched nor
    /// indexed again, and a stored but unindexed one is only indexed.
    pub async fn process(&self, job: &Job) -> AgentResult<JobOutcome> {
        let Job { kind, record, .. } = job;
        let kind = *kind;
        record.validate(kind)?;

        let stored = self.storage.exists(&record.location).await?;
        if stored && self.is_indexed(kind, record).await? {
            tracing::debug!(kind = %kind, location = %record.location, "Artifact already indexed");
            return Ok(JobOutcome::AlreadyIndexed);
        }

        if !stored {
            let data = self.source.fetch(kind, record).await?;
            tracing::debug!(
                kind = %kind,
                location = %record.location,
                bytes = data.len(),
                "Storing artifact"
            );
            self.storage.put(&record.location, data).await?;
        }

        match self.index.create(kind, record).await {
            Ok(id) => {
                tracing::info!(kind = %kind, id = %id, location = %record.location, "Artifact indexed");
                Ok(JobOutcome::Indexed(id))
            }
            Err(e) if e.is_already_exists() => Ok(JobOutcome::AlreadyIndexed),
            Err(e) => Err(e),
        }
    }

    async fn is_indexed(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<bool> {
        let request = ListArtifactsRequest {
            filter: ArtifactFilter::natural_key(kind, record),
            pagination: Pagination::new(0, 1),
        };
        Ok(!self.index.list(kind, &request).await?.is_empty())
    }
}
