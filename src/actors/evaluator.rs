//! Alarm evaluation for tag value transitions
//!
//! Decides, from a `(tag, old value, new value)` transition, whether a
//! `TagReading` is persisted and whether an `Alert` is raised. The decision
//! itself (`classify`) is a pure function; `AlarmEvaluator` wraps it with the
//! storage writes.
//!
//! ## Comparison rule
//!
//! Values are compared as normalized strings. BOOL tags compare
//! case-insensitively against `"true"`/`"false"`; every other type compares
//! by exact serialized equality. There is no numeric tolerance for REAL tags.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, trace};

use crate::storage::schema::{Alert, TagReading};
use crate::storage::{StorageBackend, StorageResult};
use crate::{MonitoredTag, TagDataType, TagValue};

/// Canonical comparison form of a raw serialized value.
pub fn normalize(data_type: TagDataType, raw: &str) -> String {
    let trimmed = raw.trim();
    match data_type {
        TagDataType::Bool => trimmed.to_ascii_lowercase(),
        _ => trimmed.to_string(),
    }
}

/// Outcome of comparing consecutive values of one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTransition {
    /// Value unchanged. Nothing is persisted.
    NoChange,

    /// First observed value (no prior signal). Seeds the tag's last value;
    /// no reading and no alert.
    Seeded,

    /// Value changed. A reading is persisted; `alarm` says whether an armed
    /// edge rule fired.
    Changed { alarm: bool },
}

/// Classify a transition. `old` and `new` are normalized internally.
pub fn classify(tag: &MonitoredTag, old: Option<&str>, new: &str) -> TagTransition {
    let new = normalize(tag.data_type, new);

    let Some(old) = old else {
        return TagTransition::Seeded;
    };
    let old = normalize(tag.data_type, old);

    if old == new {
        return TagTransition::NoChange;
    }

    let rose_to_true = tag.alarm_on_true && new == "true" && old != "true";
    let fell_to_false = tag.alarm_on_false && new == "false" && old != "false";

    TagTransition::Changed {
        alarm: rose_to_true || fell_to_false,
    }
}

/// Applies `classify` outcomes to storage.
///
/// Not safe to invoke concurrently for the same tag: the caller (the tag
/// monitor's event loop) must await each evaluation before starting the next
/// for that tag, or the edge logic could observe a stale old value.
#[derive(Clone)]
pub struct AlarmEvaluator {
    storage: Arc<dyn StorageBackend>,
}

impl AlarmEvaluator {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Evaluate one transition, performing the reading/last-value/alert
    /// writes as required.
    ///
    /// Returns the normalized value now committed as the tag's last value,
    /// or `None` when the value was unchanged. Storage failures are logged
    /// and never propagate - a lost write must not stall the monitor.
    #[instrument(skip(self, tag, new_value), fields(tag = %tag.name))]
    pub async fn evaluate(
        &self,
        tag: &MonitoredTag,
        old_value: Option<&str>,
        new_value: &TagValue,
        timestamp: DateTime<Utc>,
    ) -> Option<String> {
        let raw = new_value.to_string();
        let normalized = normalize(tag.data_type, &raw);

        match classify(tag, old_value, &raw) {
            TagTransition::NoChange => {
                trace!("value unchanged ({normalized})");
                None
            }

            TagTransition::Seeded => {
                trace!("seeding initial value ({normalized})");
                self.commit_last_value(tag, &normalized, timestamp).await;
                Some(normalized)
            }

            TagTransition::Changed { alarm } => {
                let old = old_value.map(|v| normalize(tag.data_type, v));
                debug!(
                    "value changed: {} -> {normalized}{}",
                    old.as_deref().unwrap_or("?"),
                    if alarm { " (alarm)" } else { "" }
                );

                self.log_write_error(
                    self.storage
                        .record_tag_reading(TagReading {
                            tag_id: tag.id,
                            timestamp,
                            old_value: old.clone(),
                            new_value: normalized.clone(),
                        })
                        .await,
                    "tag reading",
                );

                self.commit_last_value(tag, &normalized, timestamp).await;

                if alarm {
                    self.log_write_error(
                        self.storage
                            .create_alert(Alert::tag_alarm(tag, old.as_deref(), &normalized))
                            .await
                            .map(|_| ()),
                        "tag alarm alert",
                    );
                }

                Some(normalized)
            }
        }
    }

    async fn commit_last_value(&self, tag: &MonitoredTag, value: &str, timestamp: DateTime<Utc>) {
        self.log_write_error(
            self.storage
                .update_tag_last_value(tag.id, value, timestamp)
                .await,
            "tag last value",
        );
    }

    fn log_write_error(&self, result: StorageResult<()>, what: &str) {
        if let Err(e) = result {
            error!("failed to persist {what}: {e}");
        }
    }
}
