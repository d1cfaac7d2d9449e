use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::publisher::{Publisher, derive_event_id};
use beacon_core::recurrence::{dedup_token, next_occurrence};
use beacon_core::{HandlerError, NewTaskCommand, TaskStore, TaskStoreError};
use beacon_db::DbStore;
use beacon_events::EventBus;
use beacon_events::types::{Envelope, EventBody, SCHEMA_VERSION, SyncDelta};
use chrono::Utc;
use tracing::info;

use crate::handler::{Consumer, publish_failure, storage_failure};

/// Spawns the next occurrence when a recurring task completes. The creation
/// command carries a dedup token stable across redeliveries, so the external
/// store creates each occurrence once no matter how often the completion
/// event is seen.
pub struct RecurringTaskConsumer {
    db_path: String,
    bus: EventBus,
    tasks: Arc<dyn TaskStore>,
}

impl RecurringTaskConsumer {
    pub fn new(db_path: impl Into<String>, bus: EventBus, tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            db_path: db_path.into(),
            bus,
            tasks,
        }
    }
}

#[async_trait]
impl Consumer for RecurringTaskConsumer {
    fn name(&self) -> &'static str {
        "recurring_tasks"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let EventBody::TaskCompleted {
            task_id,
            title,
            completed_at,
            due_at,
            recurrence: Some(rule),
        } = &envelope.body
        else {
            return Ok(());
        };

        // The schedule anchors on the due date; a task without one recurs
        // from whenever it was completed.
        let anchor = (*due_at).unwrap_or(*completed_at);
        let next_date = next_occurrence(*rule, anchor.date_naive());
        let next_due = next_date.and_time(anchor.time()).and_utc();

        let command = NewTaskCommand {
            user_id: envelope.user_id.clone(),
            title: title.clone(),
            due_at: Some(next_due),
            recurrence: Some(*rule),
            recurrence_source_id: task_id.clone(),
            dedup_token: dedup_token(task_id, next_date),
        };
        let new_task_id = self
            .tasks
            .create_task(command)
            .await
            .map_err(task_store_failure)?;
        info!(
            source_task_id = %task_id,
            new_task_id = %new_task_id,
            next_due = %next_due,
            "next occurrence created"
        );

        let body = EventBody::SyncDelta {
            delta: SyncDelta::TaskCreated {
                task_id: new_task_id,
                title: title.clone(),
                due_at: Some(next_due),
                source_task_id: task_id.clone(),
            },
        };
        let delta = Envelope {
            event_id: derive_event_id(&envelope.event_id, "sync.task"),
            seq: 0,
            subject_id: body.subject_id(),
            body,
            user_id: envelope.user_id.clone(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        let store = DbStore::open(&self.db_path).map_err(storage_failure)?;
        Publisher::new(store, self.bus.clone())
            .publish_prepared(delta)
            .map_err(publish_failure)?;
        Ok(())
    }
}

fn task_store_failure(err: TaskStoreError) -> HandlerError {
    match err {
        TaskStoreError::Unavailable { message } => HandlerError::transient(message),
        TaskStoreError::Rejected { message } => HandlerError::permanent(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{TempDb, task_completed};
    use beacon_core::Store;
    use beacon_core::events::EventLogRepository;
    use beacon_events::ids::{TaskId, UserId};
    use beacon_events::types::RecurrenceRule;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTaskStore {
        commands: Mutex<Vec<NewTaskCommand>>,
        by_token: Mutex<HashMap<String, TaskId>>,
    }

    #[async_trait]
    impl TaskStore for MockTaskStore {
        async fn create_task(&self, command: NewTaskCommand) -> Result<TaskId, TaskStoreError> {
            let id = self
                .by_token
                .lock()
                .unwrap()
                .entry(command.dedup_token.clone())
                .or_insert_with(TaskId::generate)
                .clone();
            self.commands.lock().unwrap().push(command);
            Ok(id)
        }
    }

    struct DownTaskStore;

    #[async_trait]
    impl TaskStore for DownTaskStore {
        async fn create_task(&self, _command: NewTaskCommand) -> Result<TaskId, TaskStoreError> {
            Err(TaskStoreError::Unavailable {
                message: "connection refused".to_string(),
            })
        }
    }

    fn consumer(db: &TempDb, tasks: Arc<dyn TaskStore>) -> RecurringTaskConsumer {
        RecurringTaskConsumer::new(db.path.clone(), EventBus::new(8), tasks)
    }

    fn source_task_id(envelope: &Envelope) -> TaskId {
        match &envelope.body {
            EventBody::TaskCompleted { task_id, .. } => task_id.clone(),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn monthly_end_of_january_lands_on_end_of_february() {
        let db = TempDb::new();
        let tasks = Arc::new(MockTaskStore::default());
        let consumer = consumer(&db, tasks.clone());
        let due: DateTime<Utc> = "2025-01-31T09:00:00Z".parse().unwrap();
        let completed: DateTime<Utc> = "2025-01-31T10:22:00Z".parse().unwrap();
        let envelope = task_completed(
            &UserId::generate(),
            "pay rent",
            completed,
            Some(due),
            Some(RecurrenceRule::Monthly),
        );

        consumer.handle(&envelope).await.unwrap();

        let commands = tasks.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        let expected_due: DateTime<Utc> = "2025-02-28T09:00:00Z".parse().unwrap();
        assert_eq!(commands[0].due_at, Some(expected_due));
        assert_eq!(commands[0].recurrence, Some(RecurrenceRule::Monthly));
        assert_eq!(
            commands[0].dedup_token,
            dedup_token(&source_task_id(&envelope), expected_due.date_naive())
        );
    }

    #[tokio::test]
    async fn redelivered_completions_resubmit_the_same_token() {
        let db = TempDb::new();
        let tasks = Arc::new(MockTaskStore::default());
        let consumer = consumer(&db, tasks.clone());
        let envelope = task_completed(
            &UserId::generate(),
            "weekly review",
            Utc::now(),
            Some(Utc::now()),
            Some(RecurrenceRule::Weekly),
        );

        consumer.handle(&envelope).await.unwrap();
        consumer.handle(&envelope).await.unwrap();

        let commands = tasks.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].dedup_token, commands[1].dedup_token);

        // Same derived event id both times, so the log keeps one delta.
        assert_eq!(db.store().events().head_seq().unwrap(), 1);
    }

    #[tokio::test]
    async fn daily_without_a_due_date_recurs_from_completion_time() {
        let db = TempDb::new();
        let tasks = Arc::new(MockTaskStore::default());
        let consumer = consumer(&db, tasks.clone());
        let completed: DateTime<Utc> = "2025-03-15T18:30:00Z".parse().unwrap();
        let envelope = task_completed(
            &UserId::generate(),
            "stretch",
            completed,
            None,
            Some(RecurrenceRule::Daily),
        );

        consumer.handle(&envelope).await.unwrap();

        let commands = tasks.commands.lock().unwrap();
        let expected: DateTime<Utc> = "2025-03-16T18:30:00Z".parse().unwrap();
        assert_eq!(commands[0].due_at, Some(expected));
    }

    #[tokio::test]
    async fn completions_without_recurrence_are_ignored() {
        let db = TempDb::new();
        let tasks = Arc::new(MockTaskStore::default());
        let consumer = consumer(&db, tasks.clone());
        let envelope = task_completed(&UserId::generate(), "one-off", Utc::now(), None, None);

        consumer.handle(&envelope).await.unwrap();

        assert!(tasks.commands.lock().unwrap().is_empty());
        assert_eq!(db.store().events().head_seq().unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_task_store_reports_transient() {
        let db = TempDb::new();
        let consumer = consumer(&db, Arc::new(DownTaskStore));
        let envelope = task_completed(
            &UserId::generate(),
            "take out trash",
            Utc::now(),
            None,
            Some(RecurrenceRule::Daily),
        );

        let err = consumer.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transient { .. }));
    }
}
