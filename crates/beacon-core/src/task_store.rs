use crate::error::TaskStoreError;
use async_trait::async_trait;
use beacon_events::ids::{TaskId, UserId};
use beacon_events::types::RecurrenceRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation command sent to the external task store when a recurring task
/// spawns its next occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaskCommand {
    pub user_id: UserId,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceRule>,
    pub recurrence_source_id: TaskId,
    /// The store dedups on this; resubmitting the same command returns the
    /// originally created task id.
    pub dedup_token: String,
}

/// Boundary to the out-of-scope task CRUD service.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, command: NewTaskCommand) -> Result<TaskId, TaskStoreError>;
}
