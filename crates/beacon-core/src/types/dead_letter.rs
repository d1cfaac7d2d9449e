use beacon_events::ids::DeadLetterId;
use beacon_events::types::Envelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event a consumer gave up on, parked with enough context for an
/// operator to replay or discard it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: DeadLetterId,
    pub consumer_name: String,
    pub event_id: String,
    pub envelope: Envelope,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        consumer_name: impl Into<String>,
        envelope: Envelope,
        attempts: u32,
        last_error: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeadLetterId::generate(),
            consumer_name: consumer_name.into(),
            event_id: envelope.event_id.clone(),
            envelope,
            attempts,
            last_error: last_error.into(),
            failed_at,
        }
    }
}
