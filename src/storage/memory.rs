//! In-memory storage backend (no persistence)
//!
//! Ring-buffered history per endpoint/tag. Used when no persistence is
//! configured and throughout the test suite. All data is lost on restart.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::EndpointStatus;

use super::backend::{HealthStatus, StorageBackend};
use super::error::StorageResult;
use super::schema::{Alert, AlertKind, TagReading, UptimeSample};

/// Maximum samples kept per endpoint
const MAX_SAMPLES_PER_ENDPOINT: usize = 1000;

/// Maximum readings kept per tag
const MAX_READINGS_PER_TAG: usize = 1000;

/// Maximum alerts kept overall
const MAX_ALERTS: usize = 1000;

#[derive(Debug, Default)]
struct MemoryState {
    samples: HashMap<i64, VecDeque<UptimeSample>>,
    readings: HashMap<i64, VecDeque<TagReading>>,
    alerts: VecDeque<Alert>,
    endpoint_status: HashMap<i64, (EndpointStatus, Option<u64>, DateTime<Utc>)>,
    tag_state: HashMap<i64, (String, DateTime<Utc>)>,
    next_alert_id: i64,
}

/// In-memory storage backend
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Current derived status of an endpoint, if any probe has run.
    pub async fn endpoint_status(&self, endpoint_id: i64) -> Option<EndpointStatus> {
        self.state
            .read()
            .await
            .endpoint_status
            .get(&endpoint_id)
            .map(|(status, _, _)| *status)
    }

    /// Current derived `last_value` of a tag, if any reading committed.
    pub async fn tag_last_value(&self, tag_id: i64) -> Option<String> {
        self.state
            .read()
            .await
            .tag_state
            .get(&tag_id)
            .map(|(value, _)| value.clone())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, cap: usize) {
    if buffer.len() == cap {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn record_uptime_sample(&self, sample: UptimeSample) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let buffer = state.samples.entry(sample.endpoint_id).or_default();
        push_bounded(buffer, sample, MAX_SAMPLES_PER_ENDPOINT);
        Ok(())
    }

    async fn update_endpoint_status(
        &self,
        endpoint_id: i64,
        status: EndpointStatus,
        latency_ms: Option<u64>,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.state
            .write()
            .await
            .endpoint_status
            .insert(endpoint_id, (status, latency_ms, seen_at));
        Ok(())
    }

    async fn record_tag_reading(&self, reading: TagReading) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let buffer = state.readings.entry(reading.tag_id).or_default();
        push_bounded(buffer, reading, MAX_READINGS_PER_TAG);
        Ok(())
    }

    async fn update_tag_last_value(
        &self,
        tag_id: i64,
        value: &str,
        read_time: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.state
            .write()
            .await
            .tag_state
            .insert(tag_id, (value.to_string(), read_time));
        Ok(())
    }

    async fn create_alert(&self, mut alert: Alert) -> StorageResult<i64> {
        let mut state = self.state.write().await;
        state.next_alert_id += 1;
        let id = state.next_alert_id;
        alert.id = Some(id);
        push_bounded(&mut state.alerts, alert, MAX_ALERTS);
        Ok(id)
    }

    async fn find_recent_unresolved_alert(
        &self,
        endpoint_id: i64,
        kind: AlertKind,
        within: chrono::Duration,
    ) -> StorageResult<Option<Alert>> {
        let cutoff = Utc::now() - within;
        let state = self.state.read().await;

        Ok(state
            .alerts
            .iter()
            .rev()
            .find(|alert| {
                alert.endpoint_id == Some(endpoint_id)
                    && alert.kind == kind
                    && !alert.is_resolved
                    && alert.created_at >= cutoff
            })
            .cloned())
    }

    async fn query_uptime_range(
        &self,
        endpoint_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<UptimeSample>> {
        let state = self.state.read().await;

        Ok(state
            .samples
            .get(&endpoint_id)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_latest_readings(
        &self,
        tag_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<TagReading>> {
        let state = self.state.read().await;

        Ok(state
            .readings
            .get(&tag_id)
            .map(|buffer| buffer.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn query_recent_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        let state = self.state.read().await;
        Ok(state.alerts.iter().rev().take(limit).cloned().collect())
    }

    async fn cleanup_history(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut deleted = 0;

        for buffer in state.samples.values_mut() {
            let len = buffer.len();
            buffer.retain(|s| s.timestamp >= before);
            deleted += len - buffer.len();
        }
        for buffer in state.readings.values_mut() {
            let len = buffer.len();
            buffer.retain(|r| r.timestamp >= before);
            deleted += len - buffer.len();
        }

        debug!("in-memory cleanup removed {deleted} rows");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: format!(
                "in-memory storage operational ({} alerts buffered)",
                state.alerts.len()
            ),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
