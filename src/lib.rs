pub mod actors;
pub mod adapter;
pub mod config;
pub mod registry;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored site controller or IPC device, identified by a network address.
///
/// Endpoints are owned by the registry; the engine only updates the derived
/// status fields (via the storage contract) and never creates or removes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    pub name: String,
    /// Host or IP, without a port. Probe ports come from the engine config.
    pub address: String,
    #[serde(default)]
    pub status: EndpointStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointStatus::Unknown => write!(f, "unknown"),
            EndpointStatus::Online => write!(f, "online"),
            EndpointStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A protocol-exposed data point on an endpoint.
///
/// Lifecycle (create/edit/delete) is owned by the registry; the engine reads
/// active tags and writes back `last_value`/`last_read_time` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTag {
    pub id: i64,
    pub endpoint_id: i64,
    pub name: String,
    /// Protocol address/path, e.g. `MAIN.bPumpRunning`.
    pub address: String,
    pub data_type: TagDataType,
    /// Poll interval for adapters without push notifications. Falls back to
    /// the engine-wide default when unset.
    pub scan_interval_ms: Option<u64>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub alarm_on_true: bool,
    #[serde(default)]
    pub alarm_on_false: bool,
    #[serde(default)]
    pub severity: Severity,
    pub last_value: Option<String>,
    pub last_read_time: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

/// Declared PLC data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagDataType {
    Bool,
    Int,
    Real,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A value read from a tag, typed the way the protocol delivered it.
///
/// Alarm evaluation compares values by their canonical serialized form
/// (`Display`), never numerically: `Real` uses Rust's shortest-roundtrip
/// formatting for `f64`, so two readings compare equal exactly when the bits
/// match. There is no implicit coercion between variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Int(v) => write!(f, "{v}"),
            TagValue::Real(v) => write!(f, "{v}"),
            TagValue::Text(v) => write!(f, "{v}"),
        }
    }
}
