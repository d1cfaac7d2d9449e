use crate::error::BeaconError;
use crate::types::Notification;
use beacon_events::ids::UserId;

pub trait NotificationRepository {
    /// Insert-if-absent on `notification_id`. The id is derived from the
    /// triggering event, so a redelivered reminder lands on the same row.
    fn insert(&self, notification: &Notification) -> Result<(), BeaconError>;

    /// Newest first.
    fn list_for_user(&self, user_id: &UserId, limit: u32) -> Result<Vec<Notification>, BeaconError>;
}
