//! Application-level change events reported by the business-logic layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened to the subject entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// A committed change, handed to the dispatcher exactly once and never stored.
///
/// The timestamp is stamped at construction, which callers do at-or-after
/// commit — a receiver that re-queries current state after observing the event
/// sees at least this change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_data: Option<Value>,
    pub originator: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        kind: ChangeKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        new_data: Option<Value>,
        originator: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            new_data,
            originator: originator.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChangeKind::Create).unwrap(),
            "\"create\""
        );
        let parsed: ChangeKind = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(parsed, ChangeKind::Delete);
    }

    #[test]
    fn new_data_is_omitted_when_absent() {
        let event = ChangeEvent::new(ChangeKind::Delete, "order", "42", None, "svc-billing");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("new_data").is_none());
        assert_eq!(json["entity_type"], "order");
        assert_eq!(json["originator"], "svc-billing");
    }

    #[test]
    fn timestamp_is_stamped_at_construction() {
        let before = Utc::now();
        let event = ChangeEvent::new(ChangeKind::Update, "order", "42", None, "svc");
        assert!(event.timestamp >= before);
        assert!(event.timestamp <= Utc::now());
    }
}
