//! SQLite persistence across restarts, driven through the real pipeline

use std::sync::Arc;

use plcwatch::TagValue;
use plcwatch::actors::TagMonitorHandle;
use plcwatch::adapter::sim::SimulatedAdapter;
use plcwatch::registry::{EndpointRegistry, StaticRegistry};
use plcwatch::storage::sqlite::SqliteBackend;
use plcwatch::storage::{AlertKind, StorageBackend};

use crate::helpers::*;

#[tokio::test]
async fn test_pipeline_alert_survives_backend_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("history.db");

    let adapter = SimulatedAdapter::new();
    adapter.set_value("MAIN.bFault", TagValue::Bool(false)).await;

    let registry = Arc::new(StaticRegistry::from_config(&[endpoint_config(
        1,
        "10.0.0.5",
        vec![bool_tag(10, "MAIN.bFault", true, false)],
    )]));
    let endpoint = registry.list_endpoints().await.unwrap().remove(0);

    {
        let storage = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let monitor = TagMonitorHandle::spawn(
            endpoint,
            registry.clone(),
            Arc::new(adapter.clone()),
            storage.clone(),
            test_monitor_config(),
        );
        monitor.refresh_now().await.unwrap();
        settle().await;

        adapter.set_value("MAIN.bFault", TagValue::Bool(true)).await;
        settle().await;

        monitor.shutdown().await.unwrap();
        settle().await;
        storage.close().await.unwrap();
    }

    // Reopen the same database file
    let storage = SqliteBackend::new(&db_path).await.unwrap();

    let alerts = storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::TagAlarm);
    assert_eq!(alerts[0].tag_id, Some(10));

    let readings = storage.query_latest_readings(10, 10).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].new_value, "true");

    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_writers_share_one_pool() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("history.db");
    let storage = Arc::new(SqliteBackend::new(&db_path).await.unwrap());

    let adapter = SimulatedAdapter::new();
    adapter.set_value("MAIN.bA", TagValue::Bool(false)).await;
    adapter.set_value("MAIN.bB", TagValue::Bool(false)).await;

    let registry = Arc::new(StaticRegistry::from_config(&[
        endpoint_config(1, "10.0.0.5", vec![bool_tag(10, "MAIN.bA", true, false)]),
        endpoint_config(2, "10.0.0.6", vec![bool_tag(20, "MAIN.bB", true, false)]),
    ]));

    let mut monitors = Vec::new();
    for endpoint in registry.list_endpoints().await.unwrap() {
        let monitor = TagMonitorHandle::spawn(
            endpoint,
            registry.clone(),
            Arc::new(adapter.clone()),
            storage.clone(),
            test_monitor_config(),
        );
        monitor.refresh_now().await.unwrap();
        monitors.push(monitor);
    }
    settle().await;

    // Both monitors write through the same pool at once
    adapter.set_value("MAIN.bA", TagValue::Bool(true)).await;
    adapter.set_value("MAIN.bB", TagValue::Bool(true)).await;
    settle().await;

    let alerts = storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 2);

    let health = storage.health_check().await.unwrap();
    assert!(health.healthy);

    for monitor in &monitors {
        monitor.shutdown().await.unwrap();
    }
    settle().await;
    storage.close().await.unwrap();
}
