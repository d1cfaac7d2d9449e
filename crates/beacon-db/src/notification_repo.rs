use crate::util::{from_rfc3339, storage, to_rfc3339};
use beacon_core::BeaconError;
use beacon_core::notifications::NotificationRepository;
use beacon_core::types::Notification;
use beacon_events::ids::{JobId, NotificationId, TaskId, UserId};
use rusqlite::Connection;

pub struct NotificationRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> NotificationRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl NotificationRepository for NotificationRepo<'_> {
    fn insert(&self, notification: &Notification) -> Result<(), BeaconError> {
        let sql = "INSERT OR IGNORE INTO notifications (notification_id, user_id, task_id, \
             job_id, title, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
        let params = (
            notification.notification_id.to_string(),
            notification.user_id.to_string(),
            notification.task_id.to_string(),
            notification.job_id.as_ref().map(ToString::to_string),
            notification.title.clone(),
            notification.body.clone(),
            to_rfc3339(&notification.created_at),
        );
        self.conn.execute(sql, params).map_err(storage)?;
        Ok(())
    }

    fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT notification_id, user_id, task_id, job_id, title, body, created_at \
                 FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(storage)?;
        let mut rows = stmt
            .query(rusqlite::params![user_id.to_string(), limit])
            .map_err(storage)?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            notifications.push(map_notification_row(row)?);
        }
        Ok(notifications)
    }
}

fn map_notification_row(row: &rusqlite::Row<'_>) -> Result<Notification, BeaconError> {
    let notification_id: String = row.get(0).map_err(storage)?;
    let user_id: String = row.get(1).map_err(storage)?;
    let task_id: String = row.get(2).map_err(storage)?;
    let job_id: Option<String> = row.get(3).map_err(storage)?;
    let title: String = row.get(4).map_err(storage)?;
    let body: Option<String> = row.get(5).map_err(storage)?;
    let created_at: String = row.get(6).map_err(storage)?;

    Ok(Notification {
        notification_id: NotificationId::new(notification_id)?,
        user_id: UserId::new(user_id)?,
        task_id: TaskId::new(task_id)?,
        job_id: match job_id {
            Some(value) => Some(JobId::new(value)?),
            None => None,
        },
        title,
        body,
        created_at: from_rfc3339(&created_at)?,
    })
}
