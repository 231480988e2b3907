//! SQLite storage backend implementation
//!
//! Embedded history storage: no separate database server, WAL journal mode
//! for concurrent readers during writes, pooled connections, and automatic
//! schema versioning through `sqlx::migrate!`.
//!
//! The prober and every tag monitor write through the same pool; the engine
//! only depends on single-row upsert atomicity, which SQLite provides.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::{EndpointStatus, Severity};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{Alert, AlertKind, TagReading, UptimeSample};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (creating if missing) the database at `db_path` and run
    /// migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_severity(s: &str) -> Severity {
        match s {
            "info" => Severity::Info,
            "critical" => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    fn parse_kind(s: &str) -> AlertKind {
        match s {
            "endpoint_offline" => AlertKind::EndpointOffline,
            "high_latency" => AlertKind::HighLatency,
            _ => AlertKind::TagAlarm,
        }
    }

    fn alert_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Alert> {
        let metadata: Option<String> = row.get("metadata");
        let metadata = metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(Alert {
            id: Some(row.get("id")),
            endpoint_id: row.get("endpoint_id"),
            tag_id: row.get("tag_id"),
            kind: Self::parse_kind(row.get("kind")),
            severity: Self::parse_severity(row.get("severity")),
            title: row.get("title"),
            message: row.get("message"),
            created_at: Self::from_millis(row.get("created_at")),
            is_read: row.get::<i64, _>("is_read") != 0,
            is_resolved: row.get::<i64, _>("is_resolved") != 0,
            metadata,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, sample), fields(endpoint_id = sample.endpoint_id))]
    async fn record_uptime_sample(&self, sample: UptimeSample) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO uptime_samples (endpoint_id, timestamp, is_online, latency_ms)
             VALUES (?, ?, ?, ?)",
        )
        .bind(sample.endpoint_id)
        .bind(Self::millis(&sample.timestamp))
        .bind(sample.is_online as i64)
        .bind(sample.latency_ms.map(|v| v as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_endpoint_status(
        &self,
        endpoint_id: i64,
        status: EndpointStatus,
        latency_ms: Option<u64>,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO endpoint_status (endpoint_id, status, last_seen, latency_ms)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (endpoint_id) DO UPDATE SET
                 status = excluded.status,
                 last_seen = excluded.last_seen,
                 latency_ms = excluded.latency_ms",
        )
        .bind(endpoint_id)
        .bind(status.to_string())
        .bind(Self::millis(&seen_at))
        .bind(latency_ms.map(|v| v as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, reading), fields(tag_id = reading.tag_id))]
    async fn record_tag_reading(&self, reading: TagReading) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO tag_readings (tag_id, timestamp, old_value, new_value)
             VALUES (?, ?, ?, ?)",
        )
        .bind(reading.tag_id)
        .bind(Self::millis(&reading.timestamp))
        .bind(reading.old_value)
        .bind(reading.new_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn update_tag_last_value(
        &self,
        tag_id: i64,
        value: &str,
        read_time: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO tag_state (tag_id, last_value, last_read_time)
             VALUES (?, ?, ?)
             ON CONFLICT (tag_id) DO UPDATE SET
                 last_value = excluded.last_value,
                 last_read_time = excluded.last_read_time",
        )
        .bind(tag_id)
        .bind(value)
        .bind(Self::millis(&read_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, alert), fields(kind = %alert.kind))]
    async fn create_alert(&self, alert: Alert) -> StorageResult<i64> {
        let metadata = alert
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO alerts (
                 endpoint_id, tag_id, kind, severity, title, message,
                 created_at, is_read, is_resolved, metadata
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.endpoint_id)
        .bind(alert.tag_id)
        .bind(alert.kind.to_string())
        .bind(alert.severity.to_string())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(Self::millis(&alert.created_at))
        .bind(alert.is_read as i64)
        .bind(alert.is_resolved as i64)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn find_recent_unresolved_alert(
        &self,
        endpoint_id: i64,
        kind: AlertKind,
        within: chrono::Duration,
    ) -> StorageResult<Option<Alert>> {
        let cutoff = Self::millis(&(Utc::now() - within));

        let row = sqlx::query(
            "SELECT id, endpoint_id, tag_id, kind, severity, title, message,
                    created_at, is_read, is_resolved, metadata
             FROM alerts
             WHERE endpoint_id = ? AND kind = ? AND is_resolved = 0 AND created_at >= ?
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(endpoint_id)
        .bind(kind.to_string())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::alert_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn query_uptime_range(
        &self,
        endpoint_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<UptimeSample>> {
        let limit_clause = limit.map(|l| format!("LIMIT {l}")).unwrap_or_default();
        let sql = format!(
            "SELECT endpoint_id, timestamp, is_online, latency_ms
             FROM uptime_samples
             WHERE endpoint_id = ? AND timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp ASC
             {limit_clause}"
        );

        let rows = sqlx::query(&sql)
            .bind(endpoint_id)
            .bind(Self::millis(&start))
            .bind(Self::millis(&end))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| UptimeSample {
                endpoint_id: row.get("endpoint_id"),
                timestamp: Self::from_millis(row.get("timestamp")),
                is_online: row.get::<i64, _>("is_online") != 0,
                latency_ms: row.get::<Option<i64>, _>("latency_ms").map(|v| v as u64),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn query_latest_readings(
        &self,
        tag_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<TagReading>> {
        let rows = sqlx::query(
            "SELECT tag_id, timestamp, old_value, new_value
             FROM tag_readings
             WHERE tag_id = ?
             ORDER BY timestamp DESC
             LIMIT ?",
        )
        .bind(tag_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TagReading {
                tag_id: row.get("tag_id"),
                timestamp: Self::from_millis(row.get("timestamp")),
                old_value: row.get("old_value"),
                new_value: row.get("new_value"),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn query_recent_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT id, endpoint_id, tag_id, kind, severity, title, message,
                    created_at, is_read, is_resolved, metadata
             FROM alerts
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn cleanup_history(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = Self::millis(&before);

        let samples = sqlx::query("DELETE FROM uptime_samples WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let readings = sqlx::query("DELETE FROM tag_readings WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let deleted = (samples + readings) as usize;
        if deleted > 0 {
            debug!("retention cleanup removed {deleted} rows");
        }
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uptime_samples")
            .fetch_one(&self.pool)
            .await?;

        Ok(HealthStatus {
            healthy: true,
            message: format!("SQLite at {} operational ({count} samples)", self.db_path),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing SQLite pool");
        self.pool.close().await;
        Ok(())
    }
}
