use beacon_events::ids::{JobId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable timer state. `firing` is the transient claim between expiry and
/// the published `reminder.due`; a crash there is repaired by the recovery
/// pass, never by forgetting the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Firing,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderJob {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub fire_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Set at claim time when the fire happens outside the grace window.
    pub late: bool,
    /// Event id minted when the job is claimed for firing; reused verbatim on
    /// re-fire so consumers can dedup.
    pub fire_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ReminderJob {
    pub fn new(task_id: TaskId, user_id: UserId, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            job_id: JobId::generate(),
            task_id,
            user_id,
            fire_at,
            status: JobStatus::Scheduled,
            late: false,
            fire_event_id: None,
            created_at: now,
            last_attempt_at: None,
        }
    }
}
