use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./sentinel.db")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    pub hub: Option<HubConfig>,

    pub ingest: Option<IngestConfig>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,
}

/// Settings of the alerting hub
#[derive(Debug, Clone, serde::Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_hub_bind")]
    pub bind: SocketAddr,

    /// Origins allowed to open realtime connections (empty = any)
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Close alert streams after this many seconds (never when unset)
    #[serde(default)]
    pub alert_stream_timeout_secs: Option<u64>,

    #[serde(default = "default_identity_cache_ttl_secs")]
    pub identity_cache_ttl_secs: u64,

    #[serde(default = "default_identity_cache_capacity")]
    pub identity_cache_capacity: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: default_hub_bind(),
            allowed_origins: vec![],
            alert_stream_timeout_secs: None,
            identity_cache_ttl_secs: default_identity_cache_ttl_secs(),
            identity_cache_capacity: default_identity_cache_capacity(),
        }
    }
}

impl HubConfig {
    pub fn alert_stream_timeout(&self) -> Option<Duration> {
        self.alert_stream_timeout_secs.map(Duration::from_secs)
    }
}

/// Where an ingestion process sends parsed metrics for threshold checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// Check against the local threshold replica, report violations to the hub
    #[default]
    Local,

    /// Forward raw metrics to the hub's `POST /metrics`
    Remote,
}

/// Settings of an ingestion process
#[derive(Debug, Clone, serde::Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_bind")]
    pub bind: SocketAddr,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Base URL of the hub
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Consumer workers per topic
    #[serde(default = "default_consumer_concurrency")]
    pub consumer_concurrency: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    #[serde(default)]
    pub evaluation: EvaluationMode,

    #[serde(default = "default_threshold_refresh_secs")]
    pub threshold_refresh_secs: u64,

    #[serde(default = "default_liveness_sweep_secs")]
    pub liveness_sweep_secs: u64,

    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_secs: u64,

    /// A websocket send taking longer than this counts as a failed attempt
    #[serde(default = "default_session_send_timeout_ms")]
    pub session_send_timeout_ms: u64,

    /// Raw metric messages buffered for websocket delivery before the oldest are dropped
    #[serde(default = "default_raw_queue_capacity")]
    pub raw_queue_capacity: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_identity_cache_ttl_secs")]
    pub identity_cache_ttl_secs: u64,

    #[serde(default = "default_identity_cache_capacity")]
    pub identity_cache_capacity: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: default_ingest_bind(),
            allowed_origins: vec![],
            hub_url: default_hub_url(),
            group_id: default_group_id(),
            topics: default_topics(),
            partitions: default_partitions(),
            consumer_concurrency: default_consumer_concurrency(),
            batch_size: default_batch_size(),
            poll_wait_ms: default_poll_wait_ms(),
            evaluation: EvaluationMode::default(),
            threshold_refresh_secs: default_threshold_refresh_secs(),
            liveness_sweep_secs: default_liveness_sweep_secs(),
            session_sweep_secs: default_session_sweep_secs(),
            session_send_timeout_ms: default_session_send_timeout_ms(),
            raw_queue_capacity: default_raw_queue_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            identity_cache_ttl_secs: default_identity_cache_ttl_secs(),
            identity_cache_capacity: default_identity_cache_capacity(),
        }
    }
}

fn default_hub_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ingest_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn default_hub_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_group_id() -> String {
    "metric-sentinel".to_string()
}

fn default_topics() -> Vec<String> {
    vec![
        "host".to_string(),
        "container".to_string(),
        "localhost".to_string(),
    ]
}

fn default_partitions() -> u32 {
    4
}

fn default_consumer_concurrency() -> usize {
    2
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_wait_ms() -> u64 {
    500
}

fn default_threshold_refresh_secs() -> u64 {
    30
}

fn default_liveness_sweep_secs() -> u64 {
    30
}

fn default_session_sweep_secs() -> u64 {
    300
}

fn default_session_send_timeout_ms() -> u64 {
    5_000
}

fn default_raw_queue_capacity() -> usize {
    1024
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_identity_cache_ttl_secs() -> u64 {
    600
}

fn default_identity_cache_capacity() -> u64 {
    10_000
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
