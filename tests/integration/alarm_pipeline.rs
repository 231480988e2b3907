//! End-to-end alarm pipeline: simulator → tag monitor → evaluator → storage

use plcwatch::TagValue;
use plcwatch::adapter::sim::SimulatedAdapter;
use plcwatch::storage::{AlertKind, StorageBackend};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_edge_sequence_produces_expected_alerts_and_readings() {
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

    // false (initial seed), then true, true, false, true
    for value in [true, true, false, true] {
        rig.adapter.set_value("MAIN.bFault", TagValue::Bool(value)).await;
        settle().await;
    }

    // Two rising edges fired; the repeated true and the falling edge did not
    let alerts = rig.storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.kind == AlertKind::TagAlarm));
    assert!(alerts.iter().all(|a| a.tag_id == Some(10)));

    // Three value changes were recorded (true, false, true)
    let readings = rig.storage.query_latest_readings(10, 10).await.unwrap();
    assert_eq!(readings.len(), 3);

    assert_eq!(rig.storage.tag_last_value(10).await.as_deref(), Some("true"));
}

#[tokio::test]
async fn test_alarm_on_false_fires_on_falling_edge_only() {
    let adapter = SimulatedAdapter::new();
    adapter.set_value("MAIN.bRunning", TagValue::Bool(true)).await;

    let rig = spawn_monitors(
        vec![endpoint_config(
            1,
            "10.0.0.5",
            vec![bool_tag(10, "MAIN.bRunning", false, true)],
        )],
        adapter,
    )
    .await;
    settle().await;

    rig.adapter.set_value("MAIN.bRunning", TagValue::Bool(false)).await;
    settle().await;
    rig.adapter.set_value("MAIN.bRunning", TagValue::Bool(true)).await;
    settle().await;

    let alerts = rig.storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);

    let readings = rig.storage.query_latest_readings(10, 10).await.unwrap();
    assert_eq!(readings.len(), 2);
}

#[tokio::test]
async fn test_numeric_changes_recorded_without_alerts() {
    let adapter = SimulatedAdapter::new();
    adapter.set_value("MAIN.nLevel", TagValue::Int(10)).await;

    let rig = spawn_monitors(
        vec![endpoint_config(
            1,
            "10.0.0.5",
            vec![int_tag(11, "MAIN.nLevel")],
        )],
        adapter,
    )
    .await;
    settle().await;

    rig.adapter.set_value("MAIN.nLevel", TagValue::Int(10)).await;
    rig.adapter.set_value("MAIN.nLevel", TagValue::Int(25)).await;
    settle().await;

    assert!(rig.storage.query_recent_alerts(10).await.unwrap().is_empty());

    let readings = rig.storage.query_latest_readings(11, 10).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].old_value.as_deref(), Some("10"));
    assert_eq!(readings[0].new_value, "25");
}

#[tokio::test]
async fn test_tags_evaluated_independently() {
    let adapter = SimulatedAdapter::new();
    adapter.set_value("MAIN.bA", TagValue::Bool(false)).await;
    adapter.set_value("MAIN.bB", TagValue::Bool(false)).await;

    let rig = spawn_monitors(
        vec![endpoint_config(
            1,
            "10.0.0.5",
            vec![
                bool_tag(10, "MAIN.bA", true, false),
                bool_tag(11, "MAIN.bB", true, false),
            ],
        )],
        adapter,
    )
    .await;
    settle().await;

    // Only tag A rises; B's last value must be untouched
    rig.adapter.set_value("MAIN.bA", TagValue::Bool(true)).await;
    settle().await;

    let alerts = rig.storage.query_recent_alerts(10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].tag_id, Some(10));

    assert_eq!(rig.storage.tag_last_value(10).await.as_deref(), Some("true"));
    assert_eq!(rig.storage.tag_last_value(11).await.as_deref(), Some("false"));
}
