use crate::error::BeaconError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub consumer_name: String,
    pub event_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Per-consumer processed-event markers. Insert happens after the handler's
/// side effect succeeds; a redelivered event with a marker is skipped.
pub trait IdempotencyRepository {
    fn seen(&self, consumer_name: &str, event_id: &str) -> Result<bool, BeaconError>;

    /// Idempotent itself: recording the same pair twice is a no-op.
    fn record(
        &self,
        consumer_name: &str,
        event_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), BeaconError>;

    /// Retention must exceed the bus's maximum redelivery window.
    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, BeaconError>;
}
