//! Persisted history rows
//!
//! Three append-only record types make up the durable history: uptime
//! samples (one per probe), tag readings (one per value change), and alerts.
//! The engine never mutates or deletes them; `is_read`/`is_resolved` flags on
//! alerts are flipped by external consumers only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Endpoint, MonitoredTag, Severity};

/// One reachability measurement for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UptimeSample {
    pub endpoint_id: i64,
    pub timestamp: DateTime<Utc>,
    pub is_online: bool,
    /// Handshake latency; only present when online.
    pub latency_ms: Option<u64>,
}

/// One observed value change of one tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagReading {
    pub tag_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Unset for the seeding read (no prior value).
    pub old_value: Option<String>,
    pub new_value: String,
}

/// Kind of alert, used for filtering and offline-alert deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    EndpointOffline,
    HighLatency,
    TagAlarm,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::EndpointOffline => write!(f, "endpoint_offline"),
            AlertKind::HighLatency => write!(f, "high_latency"),
            AlertKind::TagAlarm => write!(f, "tag_alarm"),
        }
    }
}

/// An operational alert raised by the prober or the alarm evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Assigned by the backend on insert.
    pub id: Option<i64>,
    pub endpoint_id: Option<i64>,
    pub tag_id: Option<i64>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_resolved: bool,
    /// Free-form context (probe diagnostics, transition values, ...)
    pub metadata: Option<serde_json::Value>,
}

impl Alert {
    /// Critical alert for an endpoint that transitioned to offline.
    pub fn endpoint_offline(endpoint: &Endpoint, error: Option<&str>) -> Self {
        Self {
            id: None,
            endpoint_id: Some(endpoint.id),
            tag_id: None,
            kind: AlertKind::EndpointOffline,
            severity: Severity::Critical,
            title: format!("{} is offline", endpoint.name),
            message: format!(
                "No TCP port on {} answered within the probe deadline",
                endpoint.address
            ),
            created_at: Utc::now(),
            is_read: false,
            is_resolved: false,
            metadata: error.map(|e| serde_json::json!({ "error": e })),
        }
    }

    /// Warning for an endpoint answering slower than the configured threshold.
    pub fn high_latency(endpoint: &Endpoint, latency_ms: u64, threshold_ms: u64) -> Self {
        Self {
            id: None,
            endpoint_id: Some(endpoint.id),
            tag_id: None,
            kind: AlertKind::HighLatency,
            severity: Severity::Warning,
            title: format!("{} responds slowly", endpoint.name),
            message: format!(
                "{} answered in {latency_ms}ms (threshold {threshold_ms}ms)",
                endpoint.address
            ),
            created_at: Utc::now(),
            is_read: false,
            is_resolved: false,
            metadata: Some(serde_json::json!({
                "latency_ms": latency_ms,
                "threshold_ms": threshold_ms,
            })),
        }
    }

    /// Alarm raised by an armed edge-trigger rule on a tag transition.
    pub fn tag_alarm(tag: &MonitoredTag, old_value: Option<&str>, new_value: &str) -> Self {
        Self {
            id: None,
            endpoint_id: Some(tag.endpoint_id),
            tag_id: Some(tag.id),
            kind: AlertKind::TagAlarm,
            severity: tag.severity,
            title: format!("Alarm: {}", tag.name),
            message: format!(
                "{} ({}) changed to {new_value}",
                tag.name, tag.address
            ),
            created_at: Utc::now(),
            is_read: false,
            is_resolved: false,
            metadata: Some(serde_json::json!({
                "old_value": old_value,
                "new_value": new_value,
            })),
        }
    }
}
