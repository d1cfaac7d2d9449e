use beacon_events::ids::UserId;
use beacon_events::types::{Envelope, EventKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable audit trail row, one per event, keyed by `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    pub kind: EventKind,
    pub subject_id: String,
    pub user_id: UserId,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_envelope(envelope: &Envelope, recorded_at: DateTime<Utc>) -> Self {
        let payload = serde_json::to_value(&envelope.body)
            .ok()
            .and_then(|v| v.get("payload").cloned())
            .unwrap_or(Value::Null);
        Self {
            event_id: envelope.event_id.clone(),
            kind: envelope.body.kind(),
            subject_id: envelope.subject_id.clone(),
            user_id: envelope.user_id.clone(),
            payload,
            occurred_at: envelope.occurred_at,
            recorded_at,
        }
    }
}
