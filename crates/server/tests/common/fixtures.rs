//! Test fixtures for generating artifact records.

use bytes::Bytes;
use time::OffsetDateTime;
use tracoor_core::location::artifact_location;
use tracoor_core::{ArtifactKind, ArtifactRecord};
use tracoor_storage::ObjectStore;

/// A beacon block record at `slot` with a root derived from the slot.
#[allow(dead_code)]
pub fn beacon_block_record(network: &str, node: &str, slot: u64) -> ArtifactRecord {
    let mut record = ArtifactRecord {
        node: node.to_string(),
        fetched_at: OffsetDateTime::now_utc(),
        network: network.to_string(),
        slot: Some(slot),
        epoch: Some(slot / 32),
        block_root: Some(format!("0x{slot:064x}")),
        beacon_implementation: Some("lighthouse".to_string()),
        beacon_version: Some("v5.3.0".to_string()),
        ..Default::default()
    };
    record.location = artifact_location(ArtifactKind::BeaconBlock, &record)
        .expect("beacon block record has its coordinates");
    record
}

/// A beacon state record at `slot`.
#[allow(dead_code)]
pub fn beacon_state_record(network: &str, node: &str, slot: u64) -> ArtifactRecord {
    let mut record = ArtifactRecord {
        node: node.to_string(),
        fetched_at: OffsetDateTime::now_utc(),
        network: network.to_string(),
        slot: Some(slot),
        epoch: Some(slot / 32),
        state_root: Some(format!("0x{:064x}", slot + 1_000_000)),
        beacon_implementation: Some("teku".to_string()),
        ..Default::default()
    };
    record.location = artifact_location(ArtifactKind::BeaconState, &record)
        .expect("beacon state record has its coordinates");
    record
}

/// An execution block trace record at `number`.
#[allow(dead_code)]
pub fn block_trace_record(network: &str, node: &str, number: u64) -> ArtifactRecord {
    let mut record = ArtifactRecord {
        node: node.to_string(),
        fetched_at: OffsetDateTime::now_utc(),
        network: network.to_string(),
        block_number: Some(number),
        block_hash: Some(format!("0x{number:064x}")),
        block_extra_data: Some("geth".to_string()),
        execution_implementation: Some("geth".to_string()),
        execution_version: Some("1.14.0".to_string()),
        ..Default::default()
    };
    record.location = artifact_location(ArtifactKind::ExecutionBlockTrace, &record)
        .expect("trace record has its coordinates");
    record
}

/// Write placeholder bytes at the record's location.
#[allow(dead_code)]
pub async fn put_object(storage: &dyn ObjectStore, record: &ArtifactRecord) {
    storage
        .put(
            &record.location,
            Bytes::from(format!("artifact bytes for {}", record.location)),
        )
        .await
        .expect("Failed to write test object");
}
