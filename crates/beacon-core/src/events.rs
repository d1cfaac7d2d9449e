use crate::error::BeaconError;
use beacon_events::ids::UserId;
use beacon_events::types::Envelope;
use chrono::{DateTime, Utc};

/// Durable, ordered event log; the persistence half of the bus. `seq` is a
/// single global monotonic counter assigned at append.
pub trait EventLogRepository {
    /// Assigns the next seq and inserts. Insert-if-absent on `event_id`: a
    /// re-publish of an already-accepted envelope returns the original row
    /// untouched, so at-least-once producers never duplicate log entries.
    fn append(&self, envelope: Envelope) -> Result<Envelope, BeaconError>;

    fn list_after(&self, after: i64, limit: u32) -> Result<Vec<Envelope>, BeaconError>;

    /// Sync deltas for one user, ordered by seq. Backfill query.
    fn deltas_for_user_after(
        &self,
        user_id: &UserId,
        after: i64,
        limit: u32,
    ) -> Result<Vec<Envelope>, BeaconError>;

    fn head_seq(&self) -> Result<i64, BeaconError>;

    /// Highest seq removed by retention so far; 0 when nothing was pruned.
    /// A client whose resume point is below this cannot be backfilled.
    fn pruned_through(&self) -> Result<i64, BeaconError>;

    /// Removes events older than `cutoff` and advances the pruned horizon.
    /// Returns how many rows went away.
    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, BeaconError>;
}
