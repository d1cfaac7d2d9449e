use crate::ids::{JobId, NotificationId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped when a payload shape changes incompatibly. Consumers may use it to
/// route old envelopes through migration shims.
pub const SCHEMA_VERSION: u16 = 1;

/// The canonical record exchanged over the bus. Immutable once published;
/// `seq` is assigned by the bus at the moment it durably accepts the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: String,
    pub seq: i64,
    #[serde(flatten)]
    pub body: EventBody,
    pub subject_id: String,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub schema_version: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    #[serde(rename = "task.created")]
    TaskCreated {
        task_id: TaskId,
        title: String,
        due_at: Option<DateTime<Utc>>,
        recurrence: Option<RecurrenceRule>,
    },
    #[serde(rename = "task.updated")]
    TaskUpdated {
        task_id: TaskId,
        title: String,
        due_at: Option<DateTime<Utc>>,
        recurrence: Option<RecurrenceRule>,
    },
    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: TaskId,
        title: String,
        completed_at: DateTime<Utc>,
        due_at: Option<DateTime<Utc>>,
        recurrence: Option<RecurrenceRule>,
    },
    #[serde(rename = "task.deleted")]
    TaskDeleted { task_id: TaskId },

    #[serde(rename = "reminder.scheduled")]
    ReminderScheduled {
        job_id: JobId,
        task_id: TaskId,
        fire_at: DateTime<Utc>,
    },
    #[serde(rename = "reminder.due")]
    ReminderDue {
        job_id: JobId,
        task_id: TaskId,
        fire_at: DateTime<Utc>,
        late: bool,
    },
    #[serde(rename = "reminder.cancelled")]
    ReminderCancelled { job_id: JobId, task_id: TaskId },

    #[serde(rename = "sync.delta")]
    SyncDelta { delta: SyncDelta },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated { .. } => EventKind::TaskCreated,
            Self::TaskUpdated { .. } => EventKind::TaskUpdated,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::TaskDeleted { .. } => EventKind::TaskDeleted,
            Self::ReminderScheduled { .. } => EventKind::ReminderScheduled,
            Self::ReminderDue { .. } => EventKind::ReminderDue,
            Self::ReminderCancelled { .. } => EventKind::ReminderCancelled,
            Self::SyncDelta { .. } => EventKind::SyncDelta,
        }
    }

    /// The task or reminder the event is about; sync deltas point at whatever
    /// record the delta carries.
    pub fn subject_id(&self) -> String {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskUpdated { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskDeleted { task_id } => task_id.to_string(),
            Self::ReminderScheduled { job_id, .. }
            | Self::ReminderDue { job_id, .. }
            | Self::ReminderCancelled { job_id, .. } => job_id.to_string(),
            Self::SyncDelta { delta } => delta.subject_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
    #[serde(rename = "reminder.scheduled")]
    ReminderScheduled,
    #[serde(rename = "reminder.due")]
    ReminderDue,
    #[serde(rename = "reminder.cancelled")]
    ReminderCancelled,
    #[serde(rename = "sync.delta")]
    SyncDelta,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskCompleted => "task.completed",
            Self::TaskDeleted => "task.deleted",
            Self::ReminderScheduled => "reminder.scheduled",
            Self::ReminderDue => "reminder.due",
            Self::ReminderCancelled => "reminder.cancelled",
            Self::SyncDelta => "sync.delta",
        }
    }
}

/// How a completed task schedules its next occurrence. Monthly steps clamp to
/// the last valid day of the target month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceRule {
    Daily,
    Weekly,
    Monthly,
}

/// State change pushed to live client sessions. Produced by consumers, never
/// by the task boundary directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncDelta {
    Notification {
        notification_id: NotificationId,
        task_id: TaskId,
        title: String,
        body: Option<String>,
        created_at: DateTime<Utc>,
    },
    TaskCreated {
        task_id: TaskId,
        title: String,
        due_at: Option<DateTime<Utc>>,
        source_task_id: TaskId,
    },
}

impl SyncDelta {
    pub fn subject_id(&self) -> String {
        match self {
            Self::Notification {
                notification_id, ..
            } => notification_id.to_string(),
            Self::TaskCreated { task_id, .. } => task_id.to_string(),
        }
    }
}
