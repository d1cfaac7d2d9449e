use async_trait::async_trait;
use beacon_core::HandlerError;
use beacon_core::audit::AuditRepository;
use beacon_core::store::Store;
use beacon_core::types::AuditEntry;
use beacon_db::DbStore;
use beacon_events::types::Envelope;
use chrono::Utc;
use tracing::debug;

use crate::handler::{Consumer, storage_failure};

/// Flattens every event into the audit table. Subscribes to all kinds; the
/// insert is keyed by event id, so redeliveries collapse onto the first row.
pub struct AuditConsumer {
    db_path: String,
}

impl AuditConsumer {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

#[async_trait]
impl Consumer for AuditConsumer {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let entry = AuditEntry::from_envelope(envelope, Utc::now());
        let inserted = DbStore::open(&self.db_path)
            .map_err(storage_failure)?
            .audit()
            .record(&entry)
            .map_err(storage_failure)?;
        if !inserted {
            debug!(event_id = %envelope.event_id, "audit row already present");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{TempDb, reminder_due, task_completed};
    use beacon_events::ids::UserId;
    use beacon_events::types::EventKind;

    #[tokio::test]
    async fn every_kind_lands_in_the_trail() {
        let db = TempDb::new();
        let consumer = AuditConsumer::new(db.path.clone());
        let user = UserId::generate();
        let due = reminder_due(&user, Utc::now(), true);
        let completed = task_completed(&user, "mow the lawn", Utc::now(), None, None);

        consumer.handle(&due).await.unwrap();
        consumer.handle(&completed).await.unwrap();

        let store = db.store();
        let entry = store.audit().get(&due.event_id).unwrap().unwrap();
        assert_eq!(entry.kind, EventKind::ReminderDue);
        assert_eq!(entry.subject_id, due.subject_id);
        assert_eq!(entry.payload["late"], serde_json::json!(true));

        let entry = store.audit().get(&completed.event_id).unwrap().unwrap();
        assert_eq!(entry.kind, EventKind::TaskCompleted);
    }

    #[tokio::test]
    async fn redelivery_keeps_the_first_row() {
        let db = TempDb::new();
        let consumer = AuditConsumer::new(db.path.clone());
        let envelope = reminder_due(&UserId::generate(), Utc::now(), false);

        consumer.handle(&envelope).await.unwrap();
        let first = db.store().audit().get(&envelope.event_id).unwrap().unwrap();

        consumer.handle(&envelope).await.unwrap();
        let second = db.store().audit().get(&envelope.event_id).unwrap().unwrap();
        assert_eq!(first.recorded_at, second.recorded_at);
    }
}
