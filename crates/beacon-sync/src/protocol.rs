//! Wire frames for the realtime sync channel.

use beacon_events::ids::UserId;
use beacon_events::types::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First frame a client sends. `last_sequence` is the highest delta sequence
/// it has applied, 0 for a fresh session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub user_id: UserId,
    pub last_sequence: i64,
}

/// Frames a client may send after the handshake. Anything that does not
/// parse as one of these is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ack { sequence: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; `head` is the log's current highest sequence.
    HelloOk { head: i64 },
    Delta { sequence: i64, event: Value },
    /// The client's resume point predates the retention window. It must
    /// re-fetch full state from the task store; the channel stays open and
    /// carries deltas from the current head onward.
    ResyncRequired,
}

impl ServerFrame {
    pub fn delta(envelope: &Envelope) -> Self {
        // EventBody serializes as `{type, payload}`, which is exactly the
        // shape the client expects under `event`.
        let event = serde_json::to_value(&envelope.body).unwrap_or(Value::Null);
        Self::Delta {
            sequence: envelope.seq,
            event,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::publisher::mint_event_id;
    use beacon_events::ids::{NotificationId, TaskId};
    use beacon_events::types::{EventBody, SCHEMA_VERSION, SyncDelta};
    use chrono::Utc;

    #[test]
    fn hello_parses_from_the_documented_shape() {
        let user = UserId::generate();
        let json = format!(r#"{{"user_id":"{user}","last_sequence":42}}"#);
        let hello: ClientHello = serde_json::from_str(&json).unwrap();
        assert_eq!(hello.user_id, user);
        assert_eq!(hello.last_sequence, 42);
    }

    #[test]
    fn ack_frames_are_tagged() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ack","sequence":7}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ack { sequence: 7 });
    }

    #[test]
    fn delta_frames_carry_the_event_type_and_payload() {
        let notification_id = NotificationId::generate();
        let body = EventBody::SyncDelta {
            delta: SyncDelta::Notification {
                notification_id: notification_id.clone(),
                task_id: TaskId::generate(),
                title: "Task reminder".to_string(),
                body: None,
                created_at: Utc::now(),
            },
        };
        let envelope = Envelope {
            event_id: mint_event_id(),
            seq: 9,
            subject_id: body.subject_id(),
            body,
            user_id: UserId::generate(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };

        let encoded = ServerFrame::delta(&envelope).encode();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["sequence"], 9);
        assert_eq!(value["event"]["type"], "sync.delta");
        assert_eq!(value["event"]["payload"]["delta"]["kind"], "notification");
        assert_eq!(
            value["event"]["payload"]["delta"]["notification_id"],
            notification_id.as_str()
        );
    }

    #[test]
    fn control_frames_use_snake_case_tags() {
        assert_eq!(
            ServerFrame::HelloOk { head: 3 }.encode(),
            r#"{"type":"hello_ok","head":3}"#
        );
        assert_eq!(
            ServerFrame::ResyncRequired.encode(),
            r#"{"type":"resync_required"}"#
        );
    }
}
