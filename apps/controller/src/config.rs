//! YAML configuration surface (§10.3). Loaded once at startup from the path
//! named by `CONTROLLER_CONFIG_PATH` (default `./config.yaml`); invalid
//! configuration is a fatal startup error (§7 kind a).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use controller_domain::CoreKind;
use controller_store::StoreManagerConfig;

pub const CONFIG_PATH_ENV: &str = "CONTROLLER_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub endpoint: String,
    pub core_kind: CoreKind,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind_address: String,
    pub bearer_token: String,
}

fn default_high_queue_capacity() -> usize {
    256
}
fn default_low_queue_capacity() -> usize {
    256
}
fn default_high_send_timeout_ms() -> u64 {
    1_000
}
fn default_low_send_timeout_ms() -> u64 {
    2_000
}
fn default_high_wait_timeout_ms() -> u64 {
    3_000
}
fn default_low_wait_timeout_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_shutdown_drain_timeout_ms() -> u64 {
    10_000
}

/// StoreManager tuning (§4.1); every field is optional in YAML and falls
/// back to the spec's stated defaults.
#[derive(Debug, Deserialize)]
pub struct StoreTuningConfig {
    #[serde(default = "default_high_queue_capacity")]
    pub high_queue_capacity: usize,
    #[serde(default = "default_low_queue_capacity")]
    pub low_queue_capacity: usize,
    #[serde(default = "default_high_send_timeout_ms")]
    pub high_send_timeout_ms: u64,
    #[serde(default = "default_low_send_timeout_ms")]
    pub low_send_timeout_ms: u64,
    #[serde(default = "default_high_wait_timeout_ms")]
    pub high_wait_timeout_ms: u64,
    #[serde(default = "default_low_wait_timeout_ms")]
    pub low_wait_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_shutdown_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,
}

impl Default for StoreTuningConfig {
    fn default() -> Self {
        Self {
            high_queue_capacity: default_high_queue_capacity(),
            low_queue_capacity: default_low_queue_capacity(),
            high_send_timeout_ms: default_high_send_timeout_ms(),
            low_send_timeout_ms: default_low_send_timeout_ms(),
            high_wait_timeout_ms: default_high_wait_timeout_ms(),
            low_wait_timeout_ms: default_low_wait_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            shutdown_drain_timeout_ms: default_shutdown_drain_timeout_ms(),
        }
    }
}

impl StoreTuningConfig {
    pub fn to_manager_config(&self) -> StoreManagerConfig {
        StoreManagerConfig {
            high_queue_capacity: self.high_queue_capacity,
            low_queue_capacity: self.low_queue_capacity,
            high_send_timeout: Duration::from_millis(self.high_send_timeout_ms),
            low_send_timeout: Duration::from_millis(self.low_send_timeout_ms),
            high_wait_timeout: Duration::from_millis(self.high_wait_timeout_ms),
            low_wait_timeout: Duration::from_millis(self.low_wait_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            shutdown_drain_timeout: Duration::from_millis(self.shutdown_drain_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    pub webhook_url: String,
    pub chat_id: String,
}

fn default_online_threshold_kbps() -> i64 {
    0
}
fn default_ip_ttl_seconds() -> u64 {
    66
}
fn default_ip_flush_interval_seconds() -> u64 {
    30
}
fn default_stream_interval_seconds() -> i32 {
    5
}
fn default_lifecycle_cadence_seconds() -> u64 {
    3_600
}
fn default_cold_store_path() -> String {
    "./controller-cold.db".to_string()
}
fn default_disabled_users_path() -> String {
    "./.disabled_users".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub nodes: Vec<NodeConfig>,
    pub http: HttpConfig,

    #[serde(default)]
    pub store: StoreTuningConfig,

    #[serde(default = "default_cold_store_path")]
    pub cold_store_path: String,

    #[serde(default = "default_online_threshold_kbps")]
    pub online_threshold_kbps: i64,

    #[serde(default = "default_ip_ttl_seconds")]
    pub ip_ttl_seconds: u64,

    #[serde(default = "default_ip_flush_interval_seconds")]
    pub ip_flush_interval_seconds: u64,

    #[serde(default = "default_stream_interval_seconds")]
    pub stream_interval_seconds: i32,

    #[serde(default = "default_lifecycle_cadence_seconds")]
    pub lifecycle_cadence_seconds: u64,

    pub telegram: Option<TelegramConfig>,

    #[serde(default = "default_disabled_users_path")]
    pub disabled_users_path: String,
}

impl Config {
    /// Loads configuration from the path named by `CONTROLLER_CONFIG_PATH`
    /// (defaulting to `./config.yaml`), failing fatally on missing file,
    /// unparsable YAML, or a node list that names no nodes.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading controller config at {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing controller config at {}", path.display()))?;

        if config.nodes.is_empty() {
            anyhow::bail!("controller config at {} declares no nodes", path.display());
        }

        Ok(config)
    }
}
