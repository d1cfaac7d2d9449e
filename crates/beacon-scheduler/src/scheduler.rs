use beacon_core::jobs::ReminderJobRepository;
use beacon_core::publisher::{EventDraft, Publisher};
use beacon_core::store::Store;
use beacon_core::types::{JobStatus, ReminderJob};
use beacon_core::{BeaconError, ScheduleError};
use beacon_events::ids::{JobId, TaskId, UserId};
use beacon_events::types::EventBody;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Owner of reminder job rows. Every mutation commits before its lifecycle
/// event is published; a publish failure is logged and the committed change
/// stands.
pub struct Scheduler<S> {
    publisher: Publisher<S>,
}

impl<S: Store> Scheduler<S> {
    pub fn new(publisher: Publisher<S>) -> Self {
        Self { publisher }
    }

    /// Arms a reminder for `task_id`, displacing any timer already scheduled
    /// for the task. A `fire_at` in the past is accepted; the firing worker
    /// picks it up on its next pass and flags it late when it is beyond the
    /// grace window.
    pub fn schedule(
        &self,
        task_id: TaskId,
        user_id: UserId,
        fire_at: DateTime<Utc>,
    ) -> Result<JobId, BeaconError> {
        let job = ReminderJob::new(task_id, user_id, fire_at, Utc::now());
        let displaced = self.publisher.store().with_tx(|store| {
            let jobs = store.jobs();
            let displaced = match jobs.find_scheduled_for_task(&job.task_id)? {
                Some(prior) if jobs.cancel_if_scheduled(&prior.job_id)? => Some(prior),
                _ => None,
            };
            jobs.insert(&job)?;
            Ok(displaced)
        })?;

        if let Some(prior) = displaced {
            self.emit(
                prior.user_id,
                EventBody::ReminderCancelled {
                    job_id: prior.job_id,
                    task_id: prior.task_id,
                },
            );
        }
        self.emit(
            job.user_id.clone(),
            EventBody::ReminderScheduled {
                job_id: job.job_id.clone(),
                task_id: job.task_id,
                fire_at,
            },
        );
        Ok(job.job_id)
    }

    /// Cancels `job_id` and arms a replacement in the same transaction, so no
    /// window exists where both timers can fire. Only a `scheduled` job can
    /// be rescheduled; a job already firing or finished is reported as an
    /// invalid transition.
    pub fn reschedule(
        &self,
        job_id: &JobId,
        new_fire_at: DateTime<Utc>,
    ) -> Result<JobId, BeaconError> {
        let now = Utc::now();
        let (replacement, prior) = self.publisher.store().with_tx(|store| {
            let jobs = store.jobs();
            let Some(prior) = jobs.get(job_id)? else {
                return Err(ScheduleError::JobNotFound.into());
            };
            if !jobs.cancel_if_scheduled(job_id)? {
                return Err(ScheduleError::InvalidTransition {
                    from: prior.status,
                    to: JobStatus::Cancelled,
                }
                .into());
            }
            let replacement =
                ReminderJob::new(prior.task_id.clone(), prior.user_id.clone(), new_fire_at, now);
            jobs.insert(&replacement)?;
            Ok((replacement, prior))
        })?;

        self.emit(
            prior.user_id,
            EventBody::ReminderCancelled {
                job_id: prior.job_id,
                task_id: prior.task_id,
            },
        );
        self.emit(
            replacement.user_id.clone(),
            EventBody::ReminderScheduled {
                job_id: replacement.job_id.clone(),
                task_id: replacement.task_id,
                fire_at: new_fire_at,
            },
        );
        Ok(replacement.job_id)
    }

    /// Marks a scheduled job cancelled. Cancellation is cooperative: a job
    /// already claimed for firing completes its fire, and the call still
    /// returns Ok without emitting anything. Cancelling a finished job is a
    /// no-op for the same reason.
    pub fn cancel(&self, job_id: &JobId) -> Result<(), BeaconError> {
        let cancelled = self.publisher.store().with_tx(|store| {
            let jobs = store.jobs();
            let Some(job) = jobs.get(job_id)? else {
                return Err(ScheduleError::JobNotFound.into());
            };
            if jobs.cancel_if_scheduled(job_id)? {
                Ok(Some(job))
            } else {
                Ok(None)
            }
        })?;

        if let Some(job) = cancelled {
            self.emit(
                job.user_id,
                EventBody::ReminderCancelled {
                    job_id: job.job_id,
                    task_id: job.task_id,
                },
            );
        }
        Ok(())
    }

    fn emit(&self, user_id: UserId, body: EventBody) {
        if let Err(err) = self.publisher.publish(EventDraft::new(user_id, body)) {
            warn!(error = %err, "reminder lifecycle event not published");
        }
    }
}
