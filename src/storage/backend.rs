//! Storage backend trait definition
//!
//! The engine delegates all persistence through this trait: probe samples,
//! endpoint status, tag readings, derived tag state, and alerts. Backends
//! must support safe concurrent writers (the prober and every tag monitor
//! write independently); single-row upsert atomicity is all the engine
//! relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::EndpointStatus;

use super::error::StorageResult;
use super::schema::{Alert, AlertKind, TagReading, UptimeSample};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,
}

/// Trait for history/alert storage backends
///
/// Implementations must be `Send + Sync` as they are shared across async
/// tasks. Write methods are fire-and-forget from the engine's point of view:
/// a returned error is logged by the caller and never aborts a monitoring
/// loop.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append one uptime sample. Samples are immutable once written.
    async fn record_uptime_sample(&self, sample: UptimeSample) -> StorageResult<()>;

    /// Upsert an endpoint's derived status fields.
    async fn update_endpoint_status(
        &self,
        endpoint_id: i64,
        status: EndpointStatus,
        latency_ms: Option<u64>,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Append one tag reading. Readings are immutable once written.
    async fn record_tag_reading(&self, reading: TagReading) -> StorageResult<()>;

    /// Upsert a tag's derived `last_value`/`last_read_time`.
    async fn update_tag_last_value(
        &self,
        tag_id: i64,
        value: &str,
        read_time: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Insert an alert, returning its assigned id.
    async fn create_alert(&self, alert: Alert) -> StorageResult<i64>;

    /// Most recent unresolved alert of `kind` for `endpoint_id` created
    /// within `within` of now, if any. Used for offline-alert deduplication.
    async fn find_recent_unresolved_alert(
        &self,
        endpoint_id: i64,
        kind: AlertKind,
        within: chrono::Duration,
    ) -> StorageResult<Option<Alert>>;

    /// Uptime samples for an endpoint within a time range, oldest first.
    async fn query_uptime_range(
        &self,
        endpoint_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<UptimeSample>>;

    /// The N most recent readings for a tag, newest first.
    async fn query_latest_readings(
        &self,
        tag_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<TagReading>>;

    /// The N most recent alerts, newest first.
    async fn query_recent_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>>;

    /// Delete samples and readings older than `before` (retention policy).
    /// Alerts are kept. Returns the number of rows deleted.
    async fn cleanup_history(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight operational check (ping database, count rows, ...).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend, flushing and releasing resources.
    async fn close(&self) -> StorageResult<()>;
}
