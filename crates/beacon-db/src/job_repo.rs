use crate::util::{decode_enum, encode_enum, from_rfc3339, storage, to_rfc3339};
use beacon_core::BeaconError;
use beacon_core::jobs::ReminderJobRepository;
use beacon_core::types::{JobStatus, ReminderJob};
use beacon_events::ids::{JobId, TaskId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub struct JobRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> JobRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const SELECT_COLUMNS: &str = "SELECT job_id, task_id, user_id, fire_at, status, late, \
     fire_event_id, created_at, last_attempt_at FROM reminder_jobs";

impl ReminderJobRepository for JobRepo<'_> {
    fn insert(&self, job: &ReminderJob) -> Result<(), BeaconError> {
        let sql = "INSERT INTO reminder_jobs (job_id, task_id, user_id, fire_at, status, late, \
             fire_event_id, created_at, last_attempt_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";
        let params = (
            job.job_id.to_string(),
            job.task_id.to_string(),
            job.user_id.to_string(),
            to_rfc3339(&job.fire_at),
            encode_enum(&job.status)?,
            job.late,
            job.fire_event_id.clone(),
            to_rfc3339(&job.created_at),
            job.last_attempt_at.as_ref().map(to_rfc3339),
        );
        self.conn.execute(sql, params).map_err(storage)?;
        Ok(())
    }

    fn get(&self, job_id: &JobId) -> Result<Option<ReminderJob>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE job_id = ?1"))
            .map_err(storage)?;
        let mut rows = stmt.query([job_id.to_string()]).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };
        Ok(Some(map_job_row(row)?))
    }

    fn find_scheduled_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<ReminderJob>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE task_id = ?1 AND status = 'scheduled'"
            ))
            .map_err(storage)?;
        let mut rows = stmt.query([task_id.to_string()]).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };
        Ok(Some(map_job_row(row)?))
    }

    fn cancel_if_scheduled(&self, job_id: &JobId) -> Result<bool, BeaconError> {
        let affected = self
            .conn
            .execute(
                "UPDATE reminder_jobs SET status = 'cancelled' \
                 WHERE job_id = ?1 AND status = 'scheduled'",
                [job_id.to_string()],
            )
            .map_err(storage)?;
        Ok(affected > 0)
    }

    fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ReminderJob>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE status = 'scheduled' AND fire_at <= ?1 \
                 ORDER BY fire_at ASC LIMIT ?2"
            ))
            .map_err(storage)?;
        let mut rows = stmt
            .query(rusqlite::params![to_rfc3339(&now), limit])
            .map_err(storage)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            jobs.push(map_job_row(row)?);
        }
        Ok(jobs)
    }

    fn claim_for_firing(
        &self,
        job_id: &JobId,
        fire_event_id: &str,
        late: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, BeaconError> {
        let affected = self
            .conn
            .execute(
                "UPDATE reminder_jobs SET status = 'firing', fire_event_id = ?1, late = ?2, \
                 last_attempt_at = ?3 WHERE job_id = ?4 AND status = 'scheduled'",
                rusqlite::params![fire_event_id, late, to_rfc3339(&now), job_id.to_string()],
            )
            .map_err(storage)?;
        Ok(affected > 0)
    }

    fn stuck_firing(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReminderJob>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE status = 'firing' AND last_attempt_at < ?1 \
                 ORDER BY last_attempt_at ASC LIMIT ?2"
            ))
            .map_err(storage)?;
        let mut rows = stmt
            .query(rusqlite::params![to_rfc3339(&older_than), limit])
            .map_err(storage)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            jobs.push(map_job_row(row)?);
        }
        Ok(jobs)
    }

    fn touch_firing(&self, job_id: &JobId, now: DateTime<Utc>) -> Result<bool, BeaconError> {
        let affected = self
            .conn
            .execute(
                "UPDATE reminder_jobs SET last_attempt_at = ?1 \
                 WHERE job_id = ?2 AND status = 'firing'",
                rusqlite::params![to_rfc3339(&now), job_id.to_string()],
            )
            .map_err(storage)?;
        Ok(affected > 0)
    }

    fn mark_fired(&self, job_id: &JobId) -> Result<bool, BeaconError> {
        let affected = self
            .conn
            .execute(
                "UPDATE reminder_jobs SET status = 'fired' \
                 WHERE job_id = ?1 AND status = 'firing'",
                [job_id.to_string()],
            )
            .map_err(storage)?;
        Ok(affected > 0)
    }
}

fn map_job_row(row: &rusqlite::Row<'_>) -> Result<ReminderJob, BeaconError> {
    let job_id: String = row.get(0).map_err(storage)?;
    let task_id: String = row.get(1).map_err(storage)?;
    let user_id: String = row.get(2).map_err(storage)?;
    let fire_at: String = row.get(3).map_err(storage)?;
    let status: String = row.get(4).map_err(storage)?;
    let late: bool = row.get(5).map_err(storage)?;
    let fire_event_id: Option<String> = row.get(6).map_err(storage)?;
    let created_at: String = row.get(7).map_err(storage)?;
    let last_attempt_at: Option<String> = row.get(8).map_err(storage)?;

    Ok(ReminderJob {
        job_id: JobId::new(job_id)?,
        task_id: TaskId::new(task_id)?,
        user_id: UserId::new(user_id)?,
        fire_at: from_rfc3339(&fire_at)?,
        status: decode_enum::<JobStatus>(&status)?,
        late,
        fire_event_id,
        created_at: from_rfc3339(&created_at)?,
        last_attempt_at: match last_attempt_at {
            Some(value) => Some(from_rfc3339(&value)?),
            None => None,
        },
    })
}
