use beacon_core::PublishError;
use beacon_core::jobs::ReminderJobRepository;
use beacon_core::publisher::{Publisher, mint_event_id};
use beacon_core::store::Store;
use beacon_core::types::ReminderJob;
use beacon_core::BeaconError;
use beacon_events::types::{Envelope, EventBody, SCHEMA_VERSION};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const FIRE_BATCH_LIMIT: u32 = 64;

/// Firing loop tuning.
#[derive(Debug, Clone)]
pub struct FiringConfig {
    /// How often the loop polls the job table.
    pub poll_interval_ms: u64,
    /// Jobs taken per pass, for each of the due and recovery sweeps.
    pub batch_limit: u32,
    /// A fire this many seconds past `fire_at` is still on time; beyond it
    /// the `reminder.due` event carries `late: true`.
    pub late_grace_secs: i64,
    /// A `firing` row untouched for this long is presumed a crash leftover
    /// and re-fired.
    pub stuck_firing_secs: i64,
}

impl Default for FiringConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_limit: FIRE_BATCH_LIMIT,
            late_grace_secs: 60,
            stuck_firing_secs: 30,
        }
    }
}

impl FiringConfig {
    /// Reads tuning from the environment, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `BEACON_POLL_INTERVAL_MS` | `1000` |
    /// | `BEACON_LATE_GRACE_SECS` | `60` |
    /// | `BEACON_STUCK_FIRING_SECS` | `30` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_ms: env_value("BEACON_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            batch_limit: defaults.batch_limit,
            late_grace_secs: env_value("BEACON_LATE_GRACE_SECS", defaults.late_grace_secs),
            stuck_firing_secs: env_value("BEACON_STUCK_FIRING_SECS", defaults.stuck_firing_secs),
        }
    }
}

fn env_value<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// What a single firing pass accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FirePass {
    /// Stale `firing` rows re-fired by the recovery sweep.
    pub recovered: usize,
    /// Due jobs fired for the first time.
    pub fired: usize,
}

/// Polls the durable job table and turns expired timers into `reminder.due`
/// events. Transitions are persisted before the publish they lead to, so a
/// crash anywhere in the pass is repaired by the recovery sweep instead of
/// losing or duplicating a reminder (consumers dedup on the persisted
/// `fire_event_id`).
pub struct FiringWorker<S> {
    publisher: Publisher<S>,
    config: FiringConfig,
}

/// Controls a spawned firing worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl WorkerHandle {
    /// Signals the worker to stop after its current pass. A worker that
    /// already stopped makes this a no-op.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl<S: Store> FiringWorker<S> {
    pub fn new(publisher: Publisher<S>, config: FiringConfig) -> Self {
        Self { publisher, config }
    }

    /// One synchronous pass: recover stale `firing` rows, then claim and fire
    /// everything due at `now`. The loop calls this on every poll tick; tests
    /// call it directly with a pinned clock.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Result<FirePass, BeaconError> {
        let mut pass = FirePass::default();

        let stale_before = now - Duration::seconds(self.config.stuck_firing_secs);
        let stuck = self
            .publisher
            .store()
            .jobs()
            .stuck_firing(stale_before, self.config.batch_limit)?;
        for job in stuck {
            if self.refire(&job, now)? {
                pass.recovered += 1;
            }
        }

        let due = self
            .publisher
            .store()
            .jobs()
            .due(now, self.config.batch_limit)?;
        for job in due {
            if self.fire(&job, now)? {
                pass.fired += 1;
            }
        }
        Ok(pass)
    }

    fn fire(&self, job: &ReminderJob, now: DateTime<Utc>) -> Result<bool, BeaconError> {
        let late = now - job.fire_at > Duration::seconds(self.config.late_grace_secs);
        let event_id = mint_event_id();
        let claimed =
            self.publisher
                .store()
                .jobs()
                .claim_for_firing(&job.job_id, &event_id, late, now)?;
        if !claimed {
            // A concurrent cancel won; nothing fires.
            return Ok(false);
        }
        self.dispatch(job, event_id, late, now)
    }

    fn refire(&self, job: &ReminderJob, now: DateTime<Utc>) -> Result<bool, BeaconError> {
        let Some(event_id) = job.fire_event_id.clone() else {
            error!(job_id = %job.job_id, "firing row is missing its event id, skipping");
            return Ok(false);
        };
        if !self.publisher.store().jobs().touch_firing(&job.job_id, now)? {
            return Ok(false);
        }
        self.dispatch(job, event_id, job.late, now)
    }

    fn dispatch(
        &self,
        job: &ReminderJob,
        event_id: String,
        late: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, BeaconError> {
        let envelope = Envelope {
            event_id,
            seq: 0,
            subject_id: job.job_id.to_string(),
            body: EventBody::ReminderDue {
                job_id: job.job_id.clone(),
                task_id: job.task_id.clone(),
                fire_at: job.fire_at,
                late,
            },
            user_id: job.user_id.clone(),
            occurred_at: now,
            schema_version: SCHEMA_VERSION,
        };

        match self.publisher.publish_prepared(envelope) {
            Ok(ack) => {
                self.publisher.store().jobs().mark_fired(&job.job_id)?;
                info!(job_id = %job.job_id, seq = ack.seq, late, "reminder fired");
                Ok(true)
            }
            Err(PublishError::Unavailable { message }) => {
                // The row stays `firing`; the recovery sweep retries it with
                // the same event id once the stale window elapses.
                warn!(job_id = %job.job_id, %message, "bus unavailable, will re-fire");
                Ok(false)
            }
            Err(PublishError::Rejected { message }) => {
                error!(job_id = %job.job_id, %message, "reminder envelope rejected, dropping job");
                self.publisher.store().jobs().mark_fired(&job.job_id)?;
                Ok(false)
            }
        }
    }
}

impl<S: Store + Send + 'static> FiringWorker<S> {
    /// Spawns the poll loop and returns its control handle.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        WorkerHandle { shutdown_tx }
    }

    async fn run(self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "reminder firing worker started"
        );
        let poll_interval = std::time::Duration::from_millis(self.config.poll_interval_ms);

        loop {
            match self.fire_due(Utc::now()) {
                Ok(pass) if pass.fired > 0 || pass.recovered > 0 => {
                    debug!(fired = pass.fired, recovered = pass.recovered, "firing pass");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "firing pass failed"),
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("reminder firing worker stopped");
                    return;
                }
                _ = sleep(poll_interval) => {}
            }
        }
    }
}
