// Consistency tests for concurrent writers sharing one filesystem store,
// as happens when several agents ingest the same artifact.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use tempfile::TempDir;
use tracoor_storage::{FilesystemBackend, ObjectStore, delete_idempotent};

async fn backend() -> (TempDir, Arc<FilesystemBackend>) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(temp_dir.path()).await.unwrap();
    (temp_dir, Arc::new(backend))
}

#[tokio::test]
async fn test_concurrent_puts_to_distinct_keys() {
    let (_temp, backend) = backend().await;

    let writes = (0..50u8).map(|i| {
        let backend = backend.clone();
        async move {
            backend
                .put(
                    &format!("mainnet/beacon_block/n{}/{i}/0x{i:02x}.ssz", i % 3),
                    Bytes::from(vec![i; 64]),
                )
                .await
        }
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    for i in 0..50u8 {
        let data = backend
            .get(&format!("mainnet/beacon_block/n{}/{i}/0x{i:02x}.ssz", i % 3))
            .await
            .unwrap();
        assert_eq!(data, Bytes::from(vec![i; 64]));
    }
}

#[tokio::test]
async fn test_concurrent_overwrites_never_tear() {
    let (_temp, backend) = backend().await;
    let key = "mainnet/beacon_state/n1/32/0xroot.ssz";

    let writes = (0..20u8).map(|i| {
        let backend = backend.clone();
        async move { backend.put(key, Bytes::from(vec![i; 4096])).await }
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    // Whichever writer won, the object holds exactly one writer's bytes
    let data = backend.get(key).await.unwrap();
    assert_eq!(data.len(), 4096);
    assert!(data.iter().all(|b| *b == data[0]));
}

#[tokio::test]
async fn test_concurrent_idempotent_deletes() {
    let (_temp, backend) = backend().await;
    let key = "mainnet/execution_block_trace/geth/10/0xabc.json";
    backend.put(key, Bytes::from_static(b"{}")).await.unwrap();

    let deletes = (0..8).map(|_| {
        let backend = backend.clone();
        async move { delete_idempotent(backend.as_ref(), key).await }
    });
    let removed = join_all(deletes)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|removed| *removed)
        .count();

    assert_eq!(removed, 1);
    assert!(!backend.exists(key).await.unwrap());
}
