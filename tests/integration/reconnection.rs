//! Connection lifecycle scenarios: loss, recovery, runtime tag changes

use std::sync::Arc;
use std::time::{Duration, Instant};

use plcwatch::TagValue;
use plcwatch::actors::{ConnectionState, TagMonitorHandle};
use plcwatch::adapter::sim::SimulatedAdapter;
use plcwatch::config::MonitorConfig;
use plcwatch::registry::{EndpointRegistry, StaticRegistry};
use plcwatch::storage::StorageBackend;
use plcwatch::storage::memory::MemoryBackend;

use crate::helpers::*;

#[tokio::test]
async fn test_each_endpoint_gets_its_own_connection() {
    let adapter = SimulatedAdapter::new();
    let rig = spawn_monitors(
        vec![
            endpoint_config(1, "10.0.0.5", vec![bool_tag(10, "MAIN.bA", true, false)]),
            endpoint_config(2, "10.0.0.6", vec![bool_tag(20, "MAIN.bB", true, false)]),
        ],
        adapter,
    )
    .await;
    settle().await;

    assert_eq!(rig.adapter.connection_count().await, 2);

    for monitor in &rig.monitors {
        let state = monitor.state().await.unwrap();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.subscribed_tags.len(), 1);
    }
}

#[tokio::test]
async fn test_subscriptions_only_exist_while_connected() {
    let adapter = SimulatedAdapter::new();
    let rig = spawn_monitors(
        vec![endpoint_config(
            1,
            "10.0.0.5",
            vec![bool_tag(10, "MAIN.bA", true, false)],
        )],
        adapter,
    )
    .await;
    settle().await;

    rig.adapter.drop_connections().await;
    settle().await;

    let state = rig.monitors[0].state().await.unwrap();
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert!(state.subscribed_tags.is_empty());

    // Reconnect rebuilds the full subscription set
    rig.monitors[0].refresh_now().await.unwrap();
    let state = rig.monitors[0].state().await.unwrap();
    assert_eq!(state.connection, ConnectionState::Connected);
    assert_eq!(state.subscribed_tags, vec![10]);
}

#[tokio::test]
async fn test_alarms_resume_after_reconnect() {
    let adapter = SimulatedAdapter::new();
    adapter.set_value("MAIN.bFault", TagValue::Bool(false)).await;

    let rig = spawn_monitors(
        vec![endpoint_config(
            1,
            "10.0.0.5",
            vec![bool_tag(10, "MAIN.bFault", true, false)],
        )],
        adapter,
    )
    .await;
    settle().await;

    rig.adapter.drop_connections().await;
    settle().await;
    rig.monitors[0].refresh_now().await.unwrap();
    settle().await;

    rig.adapter.set_value("MAIN.bFault", TagValue::Bool(true)).await;
    settle().await;

    let alerts = rig.storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
}

#[tokio::test]
async fn test_reconnect_timer_restores_connection_unattended() {
    let adapter = SimulatedAdapter::new();
    adapter.set_connectable(false).await;
    adapter.set_value("MAIN.bA", TagValue::Bool(false)).await;

    let registry = Arc::new(StaticRegistry::from_config(&[endpoint_config(
        1,
        "10.0.0.5",
        vec![bool_tag(10, "MAIN.bA", true, false)],
    )]));
    let storage = Arc::new(MemoryBackend::new());
    let config = MonitorConfig {
        reconnect_interval_secs: 1,
        refresh_interval_secs: 3600,
        ..MonitorConfig::default()
    };
    let endpoint = registry.list_endpoints().await.unwrap().remove(0);

    let monitor = TagMonitorHandle::spawn(
        endpoint,
        registry.clone(),
        Arc::new(adapter.clone()),
        storage,
        config,
    );
    settle().await;

    // Initial connect failed while the target was down
    let state = monitor.state().await.unwrap();
    assert_eq!(state.connection, ConnectionState::Disconnected);

    // Target comes back; the retry timer alone must restore the connection,
    // with no refresh or command issued from here on
    adapter.set_connectable(true).await;

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let state = monitor.state().await.unwrap();
        if state.connection == ConnectionState::Connected {
            assert_eq!(state.subscribed_tags, vec![10]);
            break;
        }
        assert!(
            Instant::now() < deadline,
            "monitor never reconnected on its own"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_tag_activated_at_runtime_triggers_connection() {
    let adapter = SimulatedAdapter::new();

    let mut inactive = bool_tag(10, "MAIN.bA", true, false);
    inactive.active = false;

    let rig = spawn_monitors(
        vec![endpoint_config(1, "10.0.0.5", vec![inactive])],
        adapter,
    )
    .await;

    // No active tags, so no connection was opened
    let state = rig.monitors[0].state().await.unwrap();
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert_eq!(rig.adapter.connection_count().await, 0);

    rig.registry.set_tag_active(10, true).await;
    rig.monitors[0].refresh_now().await.unwrap();

    let state = rig.monitors[0].state().await.unwrap();
    assert_eq!(state.connection, ConnectionState::Connected);
    assert_eq!(state.subscribed_tags, vec![10]);
}

#[tokio::test]
async fn test_unresolvable_tag_does_not_block_others() {
    let adapter = SimulatedAdapter::new();
    adapter.break_address("MAIN.bGone").await;
    adapter.set_value("MAIN.bOk", TagValue::Bool(false)).await;

    let rig = spawn_monitors(
        vec![endpoint_config(
            1,
            "10.0.0.5",
            vec![
                bool_tag(10, "MAIN.bGone", true, false),
                bool_tag(11, "MAIN.bOk", true, false),
            ],
        )],
        adapter,
    )
    .await;
    settle().await;

    // The broken tag is skipped; the healthy one is live
    let state = rig.monitors[0].state().await.unwrap();
    assert_eq!(state.connection, ConnectionState::Connected);
    assert_eq!(state.subscribed_tags, vec![11]);

    rig.adapter.set_value("MAIN.bOk", TagValue::Bool(true)).await;
    settle().await;
    assert_eq!(rig.storage.query_recent_alerts(10).await.unwrap().len(), 1);
}
