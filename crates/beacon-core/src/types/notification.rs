use beacon_events::ids::{JobId, NotificationId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-app inbox record created when a reminder comes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: NotificationId,
    pub user_id: UserId,
    pub task_id: TaskId,
    pub job_id: Option<JobId>,
    pub title: String,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}
