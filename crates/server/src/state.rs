//! Application state shared across handlers.

use crate::metrics::ServerMetrics;
use crate::permanent::PermanentStore;
use std::sync::Arc;
use tracoor_core::config::AppConfig;
use tracoor_metadata::MetadataStore;
use tracoor_storage::ObjectStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Queue into the permanent block store.
    pub permanent: PermanentStore,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. `tracoord` validates before
    /// building any component, so this only trips on programming errors.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        permanent: PermanentStore,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        if let Err(error) = config.validate() {
            panic!("Invalid configuration: {}", error);
        }

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            permanent,
            metrics,
        }
    }
}
