//! Endpoint registry read contract
//!
//! The registry is an external collaborator: it owns the lifecycle of
//! endpoints and tags (CRUD happens elsewhere). The engine only reads
//! snapshots through this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::{EndpointConfig, TagConfig};
use crate::{Endpoint, EndpointStatus, MonitoredTag};

/// Read access to the set of monitored endpoints and their tags.
///
/// Implementations must be `Send + Sync` as they are shared across the
/// prober and the per-endpoint tag monitor tasks.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Current endpoint snapshot.
    async fn list_endpoints(&self) -> anyhow::Result<Vec<Endpoint>>;

    /// Active tags, optionally restricted to one endpoint.
    async fn list_active_tags(&self, endpoint_id: Option<i64>)
    -> anyhow::Result<Vec<MonitoredTag>>;
}

/// Registry backed by the config file.
///
/// Tags can be toggled at runtime (`set_tag_active`), which the monitors pick
/// up on their next refresh cycle. Everything else is fixed at load time.
pub struct StaticRegistry {
    endpoints: Vec<Endpoint>,
    tags: RwLock<HashMap<i64, MonitoredTag>>,
}

impl StaticRegistry {
    pub fn from_config(endpoints: &[EndpointConfig]) -> Self {
        let mut tags = HashMap::new();

        for endpoint in endpoints {
            for tag in &endpoint.tags {
                tags.insert(tag.id, tag_from_config(endpoint.id, tag));
            }
        }

        Self {
            endpoints: endpoints
                .iter()
                .map(|e| Endpoint {
                    id: e.id,
                    name: e.name.clone(),
                    address: e.address.clone(),
                    status: EndpointStatus::Unknown,
                    last_seen: None,
                    latency_ms: None,
                })
                .collect(),
            tags: RwLock::new(tags),
        }
    }

    /// Toggle a tag's active flag. Unknown ids are ignored.
    pub async fn set_tag_active(&self, tag_id: i64, active: bool) {
        if let Some(tag) = self.tags.write().await.get_mut(&tag_id) {
            tag.active = active;
        }
    }
}

fn tag_from_config(endpoint_id: i64, tag: &TagConfig) -> MonitoredTag {
    MonitoredTag {
        id: tag.id,
        endpoint_id,
        name: tag.name.clone(),
        address: tag.address.clone(),
        data_type: tag.data_type,
        scan_interval_ms: tag.scan_interval_ms,
        active: tag.active,
        alarm_on_true: tag.alarm_on_true,
        alarm_on_false: tag.alarm_on_false,
        severity: tag.severity,
        last_value: None,
        last_read_time: None,
    }
}

#[async_trait]
impl EndpointRegistry for StaticRegistry {
    async fn list_endpoints(&self) -> anyhow::Result<Vec<Endpoint>> {
        Ok(self.endpoints.clone())
    }

    async fn list_active_tags(
        &self,
        endpoint_id: Option<i64>,
    ) -> anyhow::Result<Vec<MonitoredTag>> {
        let tags = self.tags.read().await;

        let mut active: Vec<_> = tags
            .values()
            .filter(|tag| tag.active)
            .filter(|tag| endpoint_id.is_none_or(|id| tag.endpoint_id == id))
            .cloned()
            .collect();

        // Stable ordering keeps subscription diffs deterministic
        active.sort_by_key(|tag| tag.id);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Severity, TagDataType};

    fn sample_config() -> Vec<EndpointConfig> {
        vec![EndpointConfig {
            id: 1,
            name: "Site A".to_string(),
            address: "10.0.0.5".to_string(),
            tags: vec![
                TagConfig {
                    id: 10,
                    name: "pump".to_string(),
                    address: "MAIN.bPump".to_string(),
                    data_type: TagDataType::Bool,
                    scan_interval_ms: None,
                    active: true,
                    alarm_on_true: true,
                    alarm_on_false: false,
                    severity: Severity::Critical,
                },
                TagConfig {
                    id: 11,
                    name: "spare".to_string(),
                    address: "MAIN.bSpare".to_string(),
                    data_type: TagDataType::Bool,
                    scan_interval_ms: None,
                    active: false,
                    alarm_on_true: false,
                    alarm_on_false: false,
                    severity: Severity::Warning,
                },
            ],
        }]
    }

    #[tokio::test]
    async fn test_inactive_tags_filtered() {
        let registry = StaticRegistry::from_config(&sample_config());

        let tags = registry.list_active_tags(Some(1)).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, 10);
    }

    #[tokio::test]
    async fn test_set_tag_active_visible_on_next_listing() {
        let registry = StaticRegistry::from_config(&sample_config());

        registry.set_tag_active(11, true).await;
        registry.set_tag_active(10, false).await;

        let tags = registry.list_active_tags(None).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, 11);
    }

    #[tokio::test]
    async fn test_endpoints_start_unknown() {
        let registry = StaticRegistry::from_config(&sample_config());

        let endpoints = registry.list_endpoints().await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].status, EndpointStatus::Unknown);
        assert!(endpoints[0].last_seen.is_none());
    }
}
