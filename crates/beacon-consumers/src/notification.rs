use async_trait::async_trait;
use beacon_core::HandlerError;
use beacon_core::notifications::NotificationRepository;
use beacon_core::publisher::{Publisher, derive_event_id};
use beacon_core::store::Store;
use beacon_core::types::Notification;
use beacon_db::DbStore;
use beacon_events::EventBus;
use beacon_events::ids::NotificationId;
use beacon_events::types::{Envelope, EventBody, SCHEMA_VERSION, SyncDelta};
use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::handler::{Consumer, publish_failure, storage_failure};

const REMINDER_TITLE: &str = "Task reminder";

/// Turns `reminder.due` into an inbox notification and a sync delta for live
/// sessions. The notification id is derived from the triggering event, so a
/// redelivery lands on the existing row instead of minting a second one.
pub struct NotificationConsumer {
    db_path: String,
    bus: EventBus,
}

impl NotificationConsumer {
    pub fn new(db_path: impl Into<String>, bus: EventBus) -> Self {
        Self {
            db_path: db_path.into(),
            bus,
        }
    }
}

#[async_trait]
impl Consumer for NotificationConsumer {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let EventBody::ReminderDue {
            job_id,
            task_id,
            fire_at,
            late,
        } = &envelope.body
        else {
            return Ok(());
        };

        let Some(suffix) = envelope.event_id.strip_prefix("evt_") else {
            return Err(HandlerError::permanent(format!(
                "unexpected event_id shape: {}",
                envelope.event_id
            )));
        };
        let notification_id = NotificationId::new(format!("ntf_{suffix}"))
            .map_err(|err| HandlerError::permanent(err.to_string()))?;

        let created_at = Utc::now();
        let notification = Notification {
            notification_id: notification_id.clone(),
            user_id: envelope.user_id.clone(),
            task_id: task_id.clone(),
            job_id: Some(job_id.clone()),
            title: REMINDER_TITLE.to_string(),
            body: late.then(|| {
                format!(
                    "This reminder fired late; it was due at {}.",
                    fire_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                )
            }),
            created_at,
        };

        let store = DbStore::open(&self.db_path).map_err(storage_failure)?;
        store
            .notifications()
            .insert(&notification)
            .map_err(storage_failure)?;
        info!(
            notification_id = %notification.notification_id,
            user_id = %notification.user_id,
            late = *late,
            "notification created"
        );

        let body = EventBody::SyncDelta {
            delta: SyncDelta::Notification {
                notification_id,
                task_id: task_id.clone(),
                title: notification.title.clone(),
                body: notification.body.clone(),
                created_at,
            },
        };
        let delta = Envelope {
            event_id: derive_event_id(&envelope.event_id, "sync.notification"),
            seq: 0,
            subject_id: body.subject_id(),
            body,
            user_id: envelope.user_id.clone(),
            occurred_at: created_at,
            schema_version: SCHEMA_VERSION,
        };
        Publisher::new(store, self.bus.clone())
            .publish_prepared(delta)
            .map_err(publish_failure)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{TempDb, reminder_due, task_completed};
    use beacon_core::events::EventLogRepository;
    use beacon_events::ids::UserId;
    use chrono::{DateTime, Utc};

    #[tokio::test]
    async fn reminder_due_writes_the_inbox_and_emits_a_sync_delta() {
        let db = TempDb::new();
        let bus = EventBus::new(8);
        let consumer = NotificationConsumer::new(db.path.clone(), bus);
        let user = UserId::generate();
        let envelope = reminder_due(&user, Utc::now(), false);

        consumer.handle(&envelope).await.unwrap();

        let store = db.store();
        let rows = store.notifications().list_for_user(&user, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, REMINDER_TITLE);
        assert!(rows[0].body.is_none());
        assert_eq!(
            rows[0].notification_id.as_str(),
            format!("ntf_{}", envelope.event_id.strip_prefix("evt_").unwrap())
        );

        let deltas = store.events().deltas_for_user_after(&user, 0, 10).unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(matches!(
            &deltas[0].body,
            EventBody::SyncDelta {
                delta: SyncDelta::Notification { .. }
            }
        ));
    }

    #[tokio::test]
    async fn redelivery_lands_on_the_same_row_and_delta() {
        let db = TempDb::new();
        let bus = EventBus::new(8);
        let consumer = NotificationConsumer::new(db.path.clone(), bus);
        let user = UserId::generate();
        let envelope = reminder_due(&user, Utc::now(), false);

        consumer.handle(&envelope).await.unwrap();
        consumer.handle(&envelope).await.unwrap();

        let store = db.store();
        assert_eq!(
            store.notifications().list_for_user(&user, 10).unwrap().len(),
            1
        );
        assert_eq!(
            store.events().deltas_for_user_after(&user, 0, 10).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn late_reminders_explain_themselves() {
        let db = TempDb::new();
        let bus = EventBus::new(8);
        let consumer = NotificationConsumer::new(db.path.clone(), bus);
        let user = UserId::generate();
        let fire_at: DateTime<Utc> = "2025-01-31T09:00:00Z".parse().unwrap();
        let envelope = reminder_due(&user, fire_at, true);

        consumer.handle(&envelope).await.unwrap();

        let rows = db.store().notifications().list_for_user(&user, 10).unwrap();
        let body = rows[0].body.as_deref().unwrap();
        assert!(body.contains("2025-01-31T09:00:00Z"), "body was: {body}");
    }

    #[tokio::test]
    async fn unrelated_kinds_pass_through_untouched() {
        let db = TempDb::new();
        let bus = EventBus::new(8);
        let consumer = NotificationConsumer::new(db.path.clone(), bus);
        let user = UserId::generate();
        let envelope = task_completed(&user, "water the plants", Utc::now(), None, None);

        consumer.handle(&envelope).await.unwrap();

        let store = db.store();
        assert!(store.notifications().list_for_user(&user, 10).unwrap().is_empty());
        assert_eq!(store.events().head_seq().unwrap(), 0);
    }
}
