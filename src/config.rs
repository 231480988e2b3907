use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::{Severity, TagDataType};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (samples/readings older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./plcwatch.db")
}

fn default_retention_days() -> u32 {
    90
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub endpoints: Option<Vec<EndpointConfig>>,

    /// Engine timing/threshold knobs (optional - all have defaults)
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EndpointConfig {
    pub id: i64,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TagConfig {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub data_type: TagDataType,
    pub scan_interval_ms: Option<u64>,
    #[serde(default = "default_tag_active")]
    pub active: bool,
    #[serde(default)]
    pub alarm_on_true: bool,
    #[serde(default)]
    pub alarm_on_false: bool,
    #[serde(default)]
    pub severity: Severity,
}

fn default_tag_active() -> bool {
    true
}

/// Timing and threshold knobs for the prober and tag monitors.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Seconds between probe cycles
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// TCP ports raced during a probe, in preference order
    #[serde(default = "default_probe_ports")]
    pub probe_ports: Vec<u16>,

    /// Per-port connect timeout in milliseconds
    #[serde(default = "default_probe_attempt_timeout_ms")]
    pub probe_attempt_timeout_ms: u64,

    /// Overall probe deadline in milliseconds
    #[serde(default = "default_probe_deadline_ms")]
    pub probe_deadline_ms: u64,

    /// Seconds between reconnect attempts after a connection drop
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Seconds between subscription-set refreshes against the registry
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Poll interval for tags without an explicit scan interval
    #[serde(default = "default_scan_interval_ms")]
    pub default_scan_interval_ms: u64,

    /// Latency above this raises a warning alert
    #[serde(default = "default_latency_warning_ms")]
    pub latency_warning_ms: u64,

    /// Window during which repeat offline alerts for an endpoint are suppressed
    #[serde(default = "default_offline_dedup_secs")]
    pub offline_dedup_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_ports: default_probe_ports(),
            probe_attempt_timeout_ms: default_probe_attempt_timeout_ms(),
            probe_deadline_ms: default_probe_deadline_ms(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            default_scan_interval_ms: default_scan_interval_ms(),
            latency_warning_ms: default_latency_warning_ms(),
            offline_dedup_secs: default_offline_dedup_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn probe_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_attempt_timeout_ms)
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_millis(self.probe_deadline_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn offline_dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.offline_dedup_secs as i64)
    }
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_probe_ports() -> Vec<u16> {
    vec![80, 443, 22, 3389, 21, 23]
}

fn default_probe_attempt_timeout_ms() -> u64 {
    3000
}

fn default_probe_deadline_ms() -> u64 {
    5000
}

fn default_reconnect_interval_secs() -> u64 {
    30
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_scan_interval_ms() -> u64 {
    2000
}

fn default_latency_warning_ms() -> u64 {
    1000
}

fn default_offline_dedup_secs() -> u64 {
    3600
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
