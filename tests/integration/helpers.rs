//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use plcwatch::actors::TagMonitorHandle;
use plcwatch::adapter::sim::SimulatedAdapter;
use plcwatch::config::{EndpointConfig, MonitorConfig, TagConfig};
use plcwatch::registry::{EndpointRegistry, StaticRegistry};
use plcwatch::storage::memory::MemoryBackend;
use plcwatch::{Severity, TagDataType};

/// Monitor config with the periodic timers effectively disabled, so tests
/// drive refreshes and reconnects explicitly through the handle.
pub fn test_monitor_config() -> MonitorConfig {
    MonitorConfig {
        reconnect_interval_secs: 3600,
        refresh_interval_secs: 3600,
        default_scan_interval_ms: 10,
        ..MonitorConfig::default()
    }
}

pub fn bool_tag(id: i64, address: &str, alarm_on_true: bool, alarm_on_false: bool) -> TagConfig {
    TagConfig {
        id,
        name: format!("tag {id}"),
        address: address.to_string(),
        data_type: TagDataType::Bool,
        scan_interval_ms: None,
        active: true,
        alarm_on_true,
        alarm_on_false,
        severity: Severity::Critical,
    }
}

pub fn int_tag(id: i64, address: &str) -> TagConfig {
    TagConfig {
        id,
        name: format!("tag {id}"),
        address: address.to_string(),
        data_type: TagDataType::Int,
        scan_interval_ms: Some(10),
        active: true,
        alarm_on_true: false,
        alarm_on_false: false,
        severity: Severity::Warning,
    }
}

pub fn endpoint_config(id: i64, address: &str, tags: Vec<TagConfig>) -> EndpointConfig {
    EndpointConfig {
        id,
        name: format!("endpoint {id}"),
        address: address.to_string(),
        tags,
    }
}

/// A monitor wired to a simulator and in-memory storage.
pub struct TestRig {
    pub registry: Arc<StaticRegistry>,
    pub adapter: SimulatedAdapter,
    pub storage: Arc<MemoryBackend>,
    pub monitors: Vec<TagMonitorHandle>,
}

/// Spawn one tag monitor per configured endpoint, all sharing one simulator.
pub async fn spawn_monitors(endpoints: Vec<EndpointConfig>, adapter: SimulatedAdapter) -> TestRig {
    let registry = Arc::new(StaticRegistry::from_config(&endpoints));
    let storage = Arc::new(MemoryBackend::new());

    let mut monitors = Vec::new();
    for endpoint in registry.list_endpoints().await.unwrap() {
        let handle = TagMonitorHandle::spawn(
            endpoint,
            registry.clone(),
            Arc::new(adapter.clone()),
            storage.clone(),
            test_monitor_config(),
        );
        // Force the initial refresh to complete before the test proceeds
        handle.refresh_now().await.unwrap();
        monitors.push(handle);
    }

    TestRig {
        registry,
        adapter,
        storage,
        monitors,
    }
}

/// Let in-flight adapter events drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
