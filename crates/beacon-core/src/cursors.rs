use crate::error::BeaconError;
use chrono::{DateTime, Utc};

/// Per-consumer acknowledgment position in the event log. Advancing the
/// cursor is the runtime's "ack"; anything above it may be redelivered.
pub trait CursorRepository {
    /// 0 for a consumer that has never acknowledged anything.
    fn get(&self, consumer_name: &str) -> Result<i64, BeaconError>;

    /// Monotonic upsert; a stale seq below the stored one is ignored.
    fn advance(
        &self,
        consumer_name: &str,
        seq: i64,
        now: DateTime<Utc>,
    ) -> Result<(), BeaconError>;
}
