use crate::error::BeaconError;
use crate::types::ReminderJob;
use beacon_events::ids::{JobId, TaskId};
use chrono::{DateTime, Utc};

/// Reminder job store. Every mutation is a single-row conditional update
/// keyed by `job_id`, so concurrent cancel/fire races resolve to exactly one
/// winner at the storage layer.
pub trait ReminderJobRepository {
    fn insert(&self, job: &ReminderJob) -> Result<(), BeaconError>;

    fn get(&self, job_id: &JobId) -> Result<Option<ReminderJob>, BeaconError>;

    /// The one armed (`scheduled`) job for this task, if any. A `firing` row
    /// is already past the point of no return and is not reported here.
    fn find_scheduled_for_task(&self, task_id: &TaskId)
    -> Result<Option<ReminderJob>, BeaconError>;

    /// `scheduled → cancelled`; false when the row was no longer `scheduled`.
    fn cancel_if_scheduled(&self, job_id: &JobId) -> Result<bool, BeaconError>;

    /// Jobs ready to fire: `scheduled` with `fire_at <= now`.
    fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ReminderJob>, BeaconError>;

    /// `scheduled → firing`, persisting the minted event id and the late flag.
    /// False when a concurrent cancel (or another worker) got there first.
    fn claim_for_firing(
        &self,
        job_id: &JobId,
        fire_event_id: &str,
        late: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, BeaconError>;

    /// `firing` rows whose last attempt is older than `older_than`; these are
    /// crash leftovers the recovery pass must re-fire.
    fn stuck_firing(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReminderJob>, BeaconError>;

    /// Refreshes `last_attempt_at` on a `firing` row before a re-fire attempt.
    fn touch_firing(&self, job_id: &JobId, now: DateTime<Utc>) -> Result<bool, BeaconError>;

    /// `firing → fired`; false when the row was not in `firing`.
    fn mark_fired(&self, job_id: &JobId) -> Result<bool, BeaconError>;
}
