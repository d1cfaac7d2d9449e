use beacon_core::BeaconError;
use beacon_core::store::Store;
use rusqlite::Connection;

use crate::audit_repo::AuditRepo;
use crate::cursor_repo::CursorRepo;
use crate::dead_letter_repo::DeadLetterRepo;
use crate::event_repo::EventRepo;
use crate::idempotency_repo::IdempotencyRepo;
use crate::job_repo::JobRepo;
use crate::notification_repo::NotificationRepo;
use crate::schema;
use crate::util::storage;

pub struct DbStore {
    conn: Connection,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Opens an already-migrated database. Connections are cheap enough that
    /// workers open one per pass instead of sharing.
    pub fn open(path: &str) -> Result<Self, BeaconError> {
        let conn = schema::open(path).map_err(storage)?;
        Ok(Self::new(conn))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DbStore {
    type Events<'a>
        = EventRepo<'a>
    where
        Self: 'a;
    type Jobs<'a>
        = JobRepo<'a>
    where
        Self: 'a;
    type Idempotency<'a>
        = IdempotencyRepo<'a>
    where
        Self: 'a;
    type DeadLetters<'a>
        = DeadLetterRepo<'a>
    where
        Self: 'a;
    type Notifications<'a>
        = NotificationRepo<'a>
    where
        Self: 'a;
    type Audit<'a>
        = AuditRepo<'a>
    where
        Self: 'a;
    type Cursors<'a>
        = CursorRepo<'a>
    where
        Self: 'a;

    fn events(&self) -> Self::Events<'_> {
        EventRepo::new(&self.conn)
    }

    fn jobs(&self) -> Self::Jobs<'_> {
        JobRepo::new(&self.conn)
    }

    fn idempotency(&self) -> Self::Idempotency<'_> {
        IdempotencyRepo::new(&self.conn)
    }

    fn dead_letters(&self) -> Self::DeadLetters<'_> {
        DeadLetterRepo::new(&self.conn)
    }

    fn notifications(&self) -> Self::Notifications<'_> {
        NotificationRepo::new(&self.conn)
    }

    fn audit(&self) -> Self::Audit<'_> {
        AuditRepo::new(&self.conn)
    }

    fn cursors(&self) -> Self::Cursors<'_> {
        CursorRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, BeaconError>
    where
        F: FnOnce(&Self) -> Result<T, BeaconError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(storage)?;
        let result = f(self);
        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(storage)?;
                Ok(value)
            }
            Err(err) => {
                self.conn.execute_batch("ROLLBACK").map_err(storage)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use beacon_core::jobs::ReminderJobRepository;
    use beacon_core::publisher::{EventDraft, Publisher};
    use beacon_core::types::ReminderJob;
    use beacon_core::{PublishError, Store};
    use beacon_events::EventBus;
    use beacon_events::ids::{TaskId, UserId};
    use beacon_events::types::EventBody;
    use chrono::Utc;

    #[test]
    fn with_tx_rolls_back_on_error() {
        let store = DbStore::new(with_test_db().unwrap());
        let job = ReminderJob::new(TaskId::generate(), UserId::generate(), Utc::now(), Utc::now());

        let result: Result<(), BeaconError> = store.with_tx(|s| {
            s.jobs().insert(&job)?;
            Err(BeaconError::internal("forced failure"))
        });
        assert!(result.is_err());
        assert!(store.jobs().get(&job.job_id).unwrap().is_none());
    }

    #[test]
    fn publisher_acks_with_log_assigned_seq() {
        let store = DbStore::new(with_test_db().unwrap());
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let publisher = Publisher::new(store, bus);
        let user = UserId::generate();

        let ack = publisher
            .publish(EventDraft::new(
                user.clone(),
                EventBody::TaskCreated {
                    task_id: TaskId::generate(),
                    title: "write newsletter".to_string(),
                    due_at: None,
                    recurrence: None,
                },
            ))
            .unwrap();
        assert_eq!(ack.seq, 1);
        assert!(ack.event_id.starts_with("evt_"));

        let live = rx.try_recv().unwrap();
        assert_eq!(live.event_id, ack.event_id);
        assert_eq!(live.user_id, user);
    }

    #[test]
    fn publisher_rejects_malformed_payloads_without_writing() {
        let store = DbStore::new(with_test_db().unwrap());
        let publisher = Publisher::new(store, EventBus::new(8));

        let err = publisher
            .publish(EventDraft::new(
                UserId::generate(),
                EventBody::TaskCreated {
                    task_id: TaskId::generate(),
                    title: "   ".to_string(),
                    due_at: None,
                    recurrence: None,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
    }

    #[test]
    fn emit_task_event_refuses_non_task_kinds() {
        let store = DbStore::new(with_test_db().unwrap());
        let publisher = Publisher::new(store, EventBus::new(8));

        let err = publisher
            .emit_task_event(
                UserId::generate(),
                EventBody::ReminderCancelled {
                    job_id: beacon_events::ids::JobId::generate(),
                    task_id: TaskId::generate(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected { .. }));
    }

    #[test]
    fn prepared_envelopes_republish_to_the_original_seq() {
        use beacon_core::publisher::mint_event_id;
        use beacon_events::types::{Envelope, SCHEMA_VERSION};

        let store = DbStore::new(with_test_db().unwrap());
        let publisher = Publisher::new(store, EventBus::new(8));
        let user = UserId::generate();
        let task_id = TaskId::generate();
        let prepared = Envelope {
            event_id: mint_event_id(),
            seq: 0,
            subject_id: task_id.to_string(),
            body: EventBody::TaskDeleted { task_id },
            user_id: user.clone(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };

        let first = publisher.publish_prepared(prepared.clone()).unwrap();
        publisher
            .publish(EventDraft::new(
                user,
                EventBody::TaskCreated {
                    task_id: TaskId::generate(),
                    title: "unrelated".to_string(),
                    due_at: None,
                    recurrence: None,
                },
            ))
            .unwrap();

        // Replay after a simulated crash: the log already holds the event,
        // so the ack carries the seq assigned the first time around.
        let replay = publisher.publish_prepared(prepared).unwrap();
        assert_eq!(replay.seq, first.seq);
        assert_eq!(replay.event_id, first.event_id);
    }
}
