//! Server test utilities.

use prometheus::Registry;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracoor_core::config::{AppConfig, MetadataConfig, StorageConfig};
use tracoor_metadata::{MetadataStore, SqliteStore};
use tracoor_server::{AppState, PermanentStore, ServerMetrics, create_router};
use tracoor_storage::{FilesystemBackend, ObjectStore};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    cancel: CancellationToken,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    ///
    /// The permanent block worker is started when the modified config
    /// enables it, and stopped when the server is dropped.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        // Create storage
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let metrics =
            Arc::new(ServerMetrics::new(Registry::new()).expect("Failed to register metrics"));

        // Create metadata
        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, metrics.query.clone())
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem {
                path: storage_path.clone(),
            },
            metadata: MetadataConfig::Sqlite { path: db_path },
            ..AppConfig::for_testing()
        };

        // Apply user modifications
        modifier(&mut config);

        let cancel = CancellationToken::new();
        let (permanent, worker) = PermanentStore::new(
            &config.permanent_store,
            "test-server",
            storage.clone(),
            metadata.clone(),
            metrics.clone(),
        );
        if permanent.is_enabled() {
            tokio::spawn(worker.run(cancel.clone()));
        }

        // Create state
        let state = AppState::new(config, storage, metadata, permanent, metrics);

        // Create router
        let router = create_router(state.clone());

        Self {
            router,
            state,
            cancel,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Get access to the underlying object store.
    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
