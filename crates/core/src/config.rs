//! Configuration types shared across crates.

use crate::artifact::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8081").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Expose `/metrics` for Prometheus scraping.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: true,
        }
    }
}

/// Object storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        bucket: String,
        /// Endpoint URL for MinIO and other S3-compatible services.
        endpoint: Option<String>,
        region: Option<String>,
        /// Key prefix applied to every object.
        prefix: Option<String>,
        /// Falls back to the ambient AWS credential chain when unset.
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        /// Use `endpoint/bucket/key` URLs instead of virtual-hosted style.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/store"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                if access_key_id.is_some() != secret_access_key.is_some() {
                    return Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    );
                }
                Ok(())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Relational metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database file. Suitable for a single server instance and tests.
    Sqlite { path: PathBuf },
    /// PostgreSQL, required when several servers share one index.
    Postgres {
        /// Connection URL; takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer TRACOOR_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Server-side statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/tracoor.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url, host, database) {
                (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Age-based retention, per artifact kind.
///
/// A kind without a configured duration is kept forever.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum rows examined per kind per sweep.
    #[serde(default = "default_retention_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub beacon_state_secs: Option<u64>,
    #[serde(default)]
    pub beacon_block_secs: Option<u64>,
    #[serde(default)]
    pub beacon_bad_block_secs: Option<u64>,
    #[serde(default)]
    pub beacon_bad_blob_secs: Option<u64>,
    #[serde(default)]
    pub execution_block_trace_secs: Option<u64>,
    #[serde(default)]
    pub execution_bad_block_secs: Option<u64>,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_retention_batch_size() -> u32 {
    10_000
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            batch_size: default_retention_batch_size(),
            beacon_state_secs: None,
            beacon_block_secs: None,
            beacon_bad_block_secs: None,
            beacon_bad_blob_secs: None,
            execution_block_trace_secs: None,
            execution_bad_block_secs: None,
        }
    }
}

impl RetentionConfig {
    fn secs_for(&self, kind: ArtifactKind) -> Option<u64> {
        match kind {
            ArtifactKind::BeaconState => self.beacon_state_secs,
            ArtifactKind::BeaconBlock => self.beacon_block_secs,
            ArtifactKind::BeaconBadBlock => self.beacon_bad_block_secs,
            ArtifactKind::BeaconBadBlob => self.beacon_bad_blob_secs,
            ArtifactKind::ExecutionBlockTrace => self.execution_block_trace_secs,
            ArtifactKind::ExecutionBadBlock => self.execution_bad_block_secs,
        }
    }

    /// Configured retention for `kind`, if any.
    pub fn retention_for(&self, kind: ArtifactKind) -> Option<Duration> {
        self.secs_for(kind)
            .map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    /// Set the retention for `kind`.
    pub fn set_retention(&mut self, kind: ArtifactKind, secs: Option<u64>) {
        let slot = match kind {
            ArtifactKind::BeaconState => &mut self.beacon_state_secs,
            ArtifactKind::BeaconBlock => &mut self.beacon_block_secs,
            ArtifactKind::BeaconBadBlock => &mut self.beacon_bad_block_secs,
            ArtifactKind::BeaconBadBlob => &mut self.beacon_bad_blob_secs,
            ArtifactKind::ExecutionBlockTrace => &mut self.execution_block_trace_secs,
            ArtifactKind::ExecutionBadBlock => &mut self.execution_bad_block_secs,
        };
        *slot = secs;
    }

    /// Interval between sweeps.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate retention settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_secs == 0 {
            return Err("retention.sweep_interval_secs must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return Err("retention.batch_size must be at least 1".to_string());
        }
        for kind in ArtifactKind::ALL {
            match self.secs_for(kind) {
                Some(0) => {
                    return Err(format!("retention.{kind}_secs must be at least 1"));
                }
                Some(secs) if secs > i64::MAX as u64 => {
                    return Err(format!(
                        "retention.{kind}_secs {secs} exceeds maximum value {}",
                        i64::MAX
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Permanent retention of beacon blocks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermanentStoreConfig {
    /// Copy every indexed beacon block to `permanent/<network>/<root>`.
    #[serde(default)]
    pub enabled: bool,
    /// Lease length for the per-block distributed lock.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Pending blocks held in memory; further blocks are dropped.
    #[serde(default = "default_permanent_queue_capacity")]
    pub queue_capacity: usize,
    /// Entries in the per-instance "already stored" cache.
    #[serde(default = "default_permanent_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_permanent_queue_capacity() -> usize {
    1000
}

fn default_permanent_cache_capacity() -> u64 {
    5000
}

impl Default for PermanentStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_ttl_secs: default_lock_ttl_secs(),
            queue_capacity: default_permanent_queue_capacity(),
            cache_capacity: default_permanent_cache_capacity(),
        }
    }
}

impl PermanentStoreConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.lock_ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.lock_ttl_secs == 0 {
            return Err("permanent_store.lock_ttl_secs must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("permanent_store.queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub permanent_store: PermanentStoreConfig,
}

impl AppConfig {
    /// Create a test configuration with filesystem storage and SQLite metadata.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate every section, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.retention.validate()?;
        self.permanent_store.validate()?;
        Ok(())
    }
}

/// Bounded queue capacity for each artifact kind on the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentQueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub beacon_state: usize,
    #[serde(default = "default_queue_capacity")]
    pub beacon_block: usize,
    #[serde(default = "default_queue_capacity")]
    pub beacon_bad_block: usize,
    #[serde(default = "default_queue_capacity")]
    pub beacon_bad_blob: usize,
    #[serde(default = "default_queue_capacity")]
    pub execution_block_trace: usize,
    #[serde(default = "default_queue_capacity")]
    pub execution_bad_block: usize,
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for AgentQueueConfig {
    fn default() -> Self {
        Self {
            beacon_state: default_queue_capacity(),
            beacon_block: default_queue_capacity(),
            beacon_bad_block: default_queue_capacity(),
            beacon_bad_blob: default_queue_capacity(),
            execution_block_trace: default_queue_capacity(),
            execution_bad_block: default_queue_capacity(),
        }
    }
}

impl AgentQueueConfig {
    pub fn capacity(&self, kind: ArtifactKind) -> usize {
        match kind {
            ArtifactKind::BeaconState => self.beacon_state,
            ArtifactKind::BeaconBlock => self.beacon_block,
            ArtifactKind::BeaconBadBlock => self.beacon_bad_block,
            ArtifactKind::BeaconBadBlob => self.beacon_bad_blob,
            ArtifactKind::ExecutionBlockTrace => self.execution_block_trace,
            ArtifactKind::ExecutionBadBlock => self.execution_bad_block,
        }
    }
}

/// Collector agent configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Node name reported with every artifact.
    pub name: String,
    /// Base URL of the tracoor server.
    pub server_url: String,
    /// Beacon node REST API.
    pub beacon_node_url: String,
    /// Execution node JSON-RPC endpoint; traces are skipped when unset.
    #[serde(default)]
    pub execution_node_url: Option<String>,
    pub network: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queues: AgentQueueConfig,
    /// Seconds between head polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// HTTP request timeout for node and server calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Serve `/metrics` on this address when set.
    #[serde(default)]
    pub metrics_bind: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl AgentConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("name", &self.name),
            ("server_url", &self.server_url),
            ("beacon_node_url", &self.beacon_node_url),
            ("network", &self.network),
        ] {
            if value.trim().is_empty() {
                return Err(format!("agent.{name} is required"));
            }
        }
        if self.name.contains('/') || self.network.contains('/') {
            return Err("agent name and network must not contain '/'".to_string());
        }
        if self.poll_interval_secs == 0 {
            return Err("agent.poll_interval_secs must be at least 1".to_string());
        }
        for kind in ArtifactKind::ALL {
            if self.queues.capacity(kind) == 0 {
                return Err(format!("agent.queues.{kind} must be at least 1"));
            }
        }
        self.storage.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.batch_size, 10_000);
        for kind in ArtifactKind::ALL {
            assert!(config.retention_for(kind).is_none());
        }
    }

    #[test]
    fn test_retention_per_kind_lookup() {
        let json = r#"{"beacon_state_secs": 5400, "execution_bad_block_secs": 60}"#;
        let config: RetentionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.retention_for(ArtifactKind::BeaconState),
            Some(Duration::minutes(90))
        );
        assert_eq!(
            config.retention_for(ArtifactKind::ExecutionBadBlock),
            Some(Duration::seconds(60))
        );
        assert!(config.retention_for(ArtifactKind::BeaconBlock).is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_retention_rejects_zero_durations() {
        let mut config = RetentionConfig::default();
        config.set_retention(ArtifactKind::BeaconBlock, Some(0));
        assert!(config.validate().is_err());

        let config = RetentionConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_permanent_store_defaults() {
        let config = PermanentStoreConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.lock_ttl(), Duration::seconds(30));
        assert_eq!(config.cache_capacity, 5000);
    }

    #[test]
    fn test_permanent_store_validation_only_when_enabled() {
        let mut config = PermanentStoreConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "tracoor".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_metadata_config_postgres_requires_database() {
        let json = r#"{"type":"postgres","host":"db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"type":"postgres","url":"postgres://db/tracoor"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_config_defaults_and_validation() {
        let json = r#"{
            "name": "lighthouse-001",
            "server_url": "http://localhost:8081",
            "beacon_node_url": "http://localhost:5052",
            "network": "mainnet"
        }"#;
        let mut config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.poll_interval_secs, 12);
        assert_eq!(config.queues.capacity(ArtifactKind::BeaconState), 100);
        config.validate().unwrap();

        config.name = "a/b".to_string();
        assert!(config.validate().is_err());
    }
}
