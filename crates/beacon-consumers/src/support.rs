//! Shared fixtures for this crate's test modules.

use beacon_core::publisher::{Publisher, mint_event_id};
use beacon_db::{DbStore, open_and_migrate};
use beacon_events::EventBus;
use beacon_events::ids::{JobId, TaskId, UserId};
use beacon_events::types::{Envelope, EventBody, RecurrenceRule, SCHEMA_VERSION};
use chrono::{DateTime, Utc};

/// File-backed database so multiple connections observe the same state.
/// Cleans up after itself, including SQLite sidecar files.
pub(crate) struct TempDb {
    pub(crate) path: String,
}

impl TempDb {
    pub(crate) fn new() -> Self {
        let path = std::env::temp_dir()
            .join(format!("beacon-consumers-{}.db", ulid::Ulid::new()))
            .to_string_lossy()
            .into_owned();
        open_and_migrate(&path).unwrap();
        Self { path }
    }

    pub(crate) fn store(&self) -> DbStore {
        DbStore::open(&self.path).unwrap()
    }

    pub(crate) fn publisher(&self, bus: &EventBus) -> Publisher<DbStore> {
        Publisher::new(self.store(), bus.clone())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path, suffix));
        }
    }
}

pub(crate) fn reminder_due(user_id: &UserId, fire_at: DateTime<Utc>, late: bool) -> Envelope {
    let body = EventBody::ReminderDue {
        job_id: JobId::generate(),
        task_id: TaskId::generate(),
        fire_at,
        late,
    };
    wrap(user_id, body)
}

pub(crate) fn task_completed(
    user_id: &UserId,
    title: &str,
    completed_at: DateTime<Utc>,
    due_at: Option<DateTime<Utc>>,
    recurrence: Option<RecurrenceRule>,
) -> Envelope {
    let body = EventBody::TaskCompleted {
        task_id: TaskId::generate(),
        title: title.to_string(),
        completed_at,
        due_at,
        recurrence,
    };
    wrap(user_id, body)
}

fn wrap(user_id: &UserId, body: EventBody) -> Envelope {
    Envelope {
        event_id: mint_event_id(),
        seq: 0,
        subject_id: body.subject_id(),
        body,
        user_id: user_id.clone(),
        occurred_at: Utc::now(),
        schema_version: SCHEMA_VERSION,
    }
}
