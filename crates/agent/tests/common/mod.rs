//! In-process doubles for the server API and the Ethereum nodes.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use time::OffsetDateTime;
use tracoor_agent::{
    AgentError, AgentResult, ArtifactSource, BeaconHead, ClientVersions, ExecutionBlock,
    IndexClient,
};
use tracoor_core::api::ListArtifactsRequest;
use tracoor_core::location::artifact_location;
use tracoor_core::{Artifact, ArtifactFilter, ArtifactKind, ArtifactRecord};
use tracoor_storage::{FilesystemBackend, ObjectStore};

pub struct TestStorage {
    pub backend: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

impl TestStorage {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path())
            .await
            .expect("Failed to create filesystem backend");
        Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }
}

/// Server double that enforces natural-key uniqueness like the real one.
#[derive(Default)]
pub struct MockIndex {
    rows: Mutex<Vec<(ArtifactKind, Artifact)>>,
    handshakes: Mutex<Vec<(String, String)>>,
    pub creates: AtomicUsize,
    pub lists: AtomicUsize,
}

impl MockIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows(&self, kind: ArtifactKind) -> Vec<Artifact> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// Insert a row directly, bypassing `create`.
    pub fn seed(&self, kind: ArtifactKind, record: ArtifactRecord) {
        let mut rows = self.rows.lock().unwrap();
        let id = format!("seed-{}", rows.len());
        rows.push((kind, Artifact { id, record }));
    }

    pub fn handshakes(&self) -> Vec<(String, String)> {
        self.handshakes.lock().unwrap().clone()
    }

    fn matches(kind: ArtifactKind, row: &Artifact, filter: &ArtifactFilter) -> bool {
        ArtifactFilter::natural_key(kind, &row.record) == *filter
    }
}

#[async_trait]
impl IndexClient for MockIndex {
    async fn create(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let key = ArtifactFilter::natural_key(kind, record);
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|(k, row)| *k == kind && Self::matches(kind, row, &key))
        {
            return Err(AgentError::AlreadyExists(record.location.clone()));
        }
        let id = format!("id-{}", rows.len());
        rows.push((
            kind,
            Artifact {
                id: id.clone(),
                record: record.clone(),
            },
        ));
        Ok(id)
    }

    async fn list(
        &self,
        kind: ArtifactKind,
        request: &ListArtifactsRequest,
    ) -> AgentResult<Vec<Artifact>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let limit = request.pagination.limit as usize;
        Ok(self
            .rows(kind)
            .into_iter()
            .filter(|row| Self::matches(kind, row, &request.filter))
            .take(if limit == 0 { usize::MAX } else { limit })
            .collect())
    }

    async fn storage_handshake(&self, node: &str, token: &str) -> AgentResult<()> {
        self.handshakes
            .lock()
            .unwrap()
            .push((node.to_string(), token.to_string()));
        Ok(())
    }
}

/// Node double with settable heads.
#[derive(Default)]
pub struct MockSource {
    pub beacon: Mutex<Option<BeaconHead>>,
    pub execution: Mutex<Option<ExecutionBlock>>,
    pub bad_blocks: Mutex<Vec<ExecutionBlock>>,
    pub versions: ClientVersions,
    pub fail_fetch: AtomicBool,
    pub fetches: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_versions(versions: ClientVersions) -> Arc<Self> {
        Arc::new(Self {
            versions,
            ..Default::default()
        })
    }

    pub fn set_beacon_head(&self, slot: u64) {
        *self.beacon.lock().unwrap() = Some(BeaconHead {
            slot,
            block_root: format!("0xb{slot}"),
            state_root: format!("0xs{slot}"),
        });
    }

    pub fn set_execution_head(&self, number: u64) {
        *self.execution.lock().unwrap() = Some(ExecutionBlock {
            hash: format!("0xe{number}"),
            number,
            extra_data: None,
        });
    }

    /// Bytes `fetch` returns for `record`.
    pub fn payload(kind: ArtifactKind, record: &ArtifactRecord) -> Bytes {
        Bytes::from(format!("{kind}@{}", record.location))
    }
}

#[async_trait]
impl ArtifactSource for MockSource {
    async fn beacon_head(&self) -> AgentResult<BeaconHead> {
        self.beacon
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::Node("beacon node unavailable".to_string()))
    }

    async fn execution_head(&self) -> AgentResult<Option<ExecutionBlock>> {
        Ok(self.execution.lock().unwrap().clone())
    }

    async fn execution_bad_blocks(&self) -> AgentResult<Vec<ExecutionBlock>> {
        Ok(self.bad_blocks.lock().unwrap().clone())
    }

    async fn fetch(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AgentError::Node("fetch failed".to_string()));
        }
        Ok(Self::payload(kind, record))
    }

    async fn client_versions(&self) -> ClientVersions {
        self.versions.clone()
    }
}

pub fn beacon_block_record(node: &str, slot: u64) -> ArtifactRecord {
    let mut record = ArtifactRecord {
        node: node.to_string(),
        network: "mainnet".to_string(),
        fetched_at: OffsetDateTime::now_utc(),
        slot: Some(slot),
        epoch: Some(slot / 32),
        block_root: Some(format!("0xb{slot}")),
        ..Default::default()
    };
    record.location = artifact_location(ArtifactKind::BeaconBlock, &record).unwrap();
    record
}
