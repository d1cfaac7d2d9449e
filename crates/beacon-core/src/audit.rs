use crate::error::BeaconError;
use crate::types::AuditEntry;

pub trait AuditRepository {
    /// Insert-if-absent on `event_id`. Returns false when the entry already
    /// existed; callers treat that as success.
    fn record(&self, entry: &AuditEntry) -> Result<bool, BeaconError>;

    fn get(&self, event_id: &str) -> Result<Option<AuditEntry>, BeaconError>;
}
