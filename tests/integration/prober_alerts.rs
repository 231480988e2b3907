//! Prober scenarios: reachability samples, offline edges and deduplication

use std::sync::Arc;

use plcwatch::EndpointStatus;
use plcwatch::actors::ProberHandle;
use plcwatch::config::MonitorConfig;
use plcwatch::registry::StaticRegistry;
use plcwatch::storage::memory::MemoryBackend;
use plcwatch::storage::{AlertKind, StorageBackend};
use tokio::net::TcpListener;

use crate::helpers::endpoint_config;

fn probe_config(ports: Vec<u16>) -> MonitorConfig {
    MonitorConfig {
        probe_interval_secs: 3600,
        probe_ports: ports,
        probe_attempt_timeout_ms: 500,
        probe_deadline_ms: 1000,
        ..MonitorConfig::default()
    }
}

fn spawn_prober(ports: Vec<u16>) -> (ProberHandle, Arc<MemoryBackend>) {
    let registry = Arc::new(StaticRegistry::from_config(&[endpoint_config(
        1,
        "127.0.0.1",
        vec![],
    )]));
    let storage = Arc::new(MemoryBackend::new());
    let handle = ProberHandle::spawn(registry, storage.clone(), probe_config(ports));
    (handle, storage)
}

async fn closed_port() -> u16 {
    // Bind-then-drop to get a port that refuses connections
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_reachable_endpoint_sampled_online_without_alert() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (handle, storage) = spawn_prober(vec![port]);
    handle.probe_now().await.unwrap();

    // At least the explicit probe has been recorded (the startup probe may
    // add another sample)
    let samples = storage
        .query_uptime_range(1, chrono::Utc::now() - chrono::Duration::minutes(1), chrono::Utc::now(), None)
        .await
        .unwrap();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| s.is_online));
    assert!(samples.iter().all(|s| s.latency_ms.is_some()));

    assert_eq!(storage.endpoint_status(1).await, Some(EndpointStatus::Online));
    assert!(storage.query_recent_alerts(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_endpoint_raises_one_critical_alert() {
    let port = closed_port().await;
    let (handle, storage) = spawn_prober(vec![port]);

    handle.probe_now().await.unwrap();
    // Still offline: suppressed by the unresolved alert within the window
    handle.probe_now().await.unwrap();

    assert_eq!(storage.endpoint_status(1).await, Some(EndpointStatus::Offline));

    let alerts = storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::EndpointOffline);
    assert_eq!(alerts[0].endpoint_id, Some(1));
}

#[tokio::test]
async fn test_offline_alert_deduplicated_across_flaps() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (handle, storage) = spawn_prober(vec![port]);

    // Offline edge: alert raised
    handle.probe_now().await.unwrap();
    assert_eq!(storage.query_recent_alerts(10).await.unwrap().len(), 1);

    // Comes back up, then flaps down again within the dedup window
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    handle.probe_now().await.unwrap();
    assert_eq!(storage.endpoint_status(1).await, Some(EndpointStatus::Online));

    drop(listener);
    handle.probe_now().await.unwrap();
    assert_eq!(storage.endpoint_status(1).await, Some(EndpointStatus::Offline));

    // Second outage suppressed by the unresolved alert from the first
    let alerts = storage.query_recent_alerts(10).await.unwrap();
    let offline: Vec<_> = alerts
        .iter()
        .filter(|a| a.kind == AlertKind::EndpointOffline)
        .collect();
    assert_eq!(offline.len(), 1);
}

#[tokio::test]
async fn test_every_probe_appends_a_sample() {
    let port = closed_port().await;
    let (handle, storage) = spawn_prober(vec![port]);

    handle.probe_now().await.unwrap();
    handle.probe_now().await.unwrap();
    handle.probe_now().await.unwrap();

    let samples = storage
        .query_uptime_range(1, chrono::Utc::now() - chrono::Duration::minutes(1), chrono::Utc::now(), None)
        .await
        .unwrap();
    // Three explicit probes plus possibly the startup probe
    assert!(samples.len() >= 3);
    assert!(samples.iter().all(|s| !s.is_online));
}
