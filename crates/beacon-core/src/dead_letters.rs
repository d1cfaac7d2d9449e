use crate::error::BeaconError;
use crate::types::DeadLetter;
use beacon_events::ids::DeadLetterId;

pub trait DeadLetterRepository {
    fn insert(&self, letter: &DeadLetter) -> Result<(), BeaconError>;

    /// Newest first.
    fn list(&self, limit: u32) -> Result<Vec<DeadLetter>, BeaconError>;

    fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetter>, BeaconError>;

    /// False when the row was already gone.
    fn remove(&self, id: &DeadLetterId) -> Result<bool, BeaconError>;
}
