use std::sync::Arc;
use std::time::Duration;

use beacon_core::cursors::CursorRepository;
use beacon_core::dead_letters::DeadLetterRepository;
use beacon_core::events::EventLogRepository;
use beacon_core::idempotency::IdempotencyRepository;
use beacon_core::store::Store;
use beacon_core::types::DeadLetter;
use beacon_core::{BeaconError, HandlerError};
use beacon_db::DbStore;
use beacon_events::EventBus;
use beacon_events::ids::{DeadLetterId, UserId};
use beacon_events::types::Envelope;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::handler::Consumer;
use crate::policy::RetryPolicy;

const DEFAULT_BATCH_LIMIT: u32 = 128;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;

/// Runtime loop tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Events read from the log per drain pass.
    pub batch_limit: u32,
    /// Poll fallback when the bus is quiet.
    pub poll_interval_ms: u64,
    /// A handler invocation running longer than this counts as a transient
    /// failure, so a stuck handler cannot freeze its consumer forever.
    pub handler_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            handler_timeout_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
        }
    }
}

impl RuntimeConfig {
    /// Reads tuning from the environment, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `BEACON_POLL_INTERVAL_MS` | `1000` |
    /// | `BEACON_HANDLER_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_limit: defaults.batch_limit,
            poll_interval_ms: env_value("BEACON_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            handler_timeout_secs: env_value(
                "BEACON_HANDLER_TIMEOUT_SECS",
                defaults.handler_timeout_secs,
            ),
        }
    }
}

fn env_value<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// How each event of a drained batch resolved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainPass {
    pub delivered: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
}

impl DrainPass {
    pub fn total(self) -> usize {
        self.delivered + self.duplicates + self.dead_lettered
    }

    fn absorb(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.duplicates += other.duplicates;
        self.dead_lettered += other.dead_lettered;
    }
}

/// At-least-once delivery loop for one consumer. Reads the log from the
/// consumer's durable cursor, delivers per-user groups concurrently while
/// keeping each user's events in order, and advances the cursor only once
/// the whole batch resolved. Failure in one consumer's runtime never touches
/// another's; each runtime owns its own cursor and connections.
pub struct ConsumerRuntime {
    db_path: String,
    bus: EventBus,
    consumer: Arc<dyn Consumer>,
    policy: RetryPolicy,
    config: RuntimeConfig,
}

/// Controls a spawned consumer runtime.
pub struct RuntimeHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl RuntimeHandle {
    /// Signals the runtime to stop after its current pass. A runtime that
    /// already stopped makes this a no-op.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl ConsumerRuntime {
    pub fn new(
        db_path: impl Into<String>,
        bus: EventBus,
        consumer: Arc<dyn Consumer>,
        policy: RetryPolicy,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            bus,
            consumer,
            policy,
            config,
        }
    }

    /// One pass over everything past the cursor. The loop calls this on each
    /// wake; tests call it directly.
    pub async fn drain(&self) -> Result<DrainPass, BeaconError> {
        let batch = {
            let store = DbStore::open(&self.db_path)?;
            let cursor = store.cursors().get(self.consumer.name())?;
            store.events().list_after(cursor, self.config.batch_limit)?
        };
        let Some(through) = batch.last().map(|envelope| envelope.seq) else {
            return Ok(DrainPass::default());
        };

        // The batch is seq-ordered, so per-user groups inherit that order.
        let mut groups: Vec<(UserId, Vec<Envelope>)> = Vec::new();
        for envelope in batch {
            match groups
                .iter_mut()
                .find(|(user_id, _)| *user_id == envelope.user_id)
            {
                Some((_, events)) => events.push(envelope),
                None => groups.push((envelope.user_id.clone(), vec![envelope])),
            }
        }

        let mut tasks = JoinSet::new();
        for (user_id, events) in groups {
            let delivery = self.delivery();
            tasks.spawn(async move { (user_id, delivery.deliver_group(events).await) });
        }

        let mut pass = DrainPass::default();
        let mut failure: Option<BeaconError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(group))) => pass.absorb(group),
                Ok((user_id, Err(err))) => {
                    error!(
                        consumer = self.consumer.name(),
                        user_id = %user_id,
                        error = %err,
                        "group delivery failed, batch will be re-read"
                    );
                    failure.get_or_insert(err);
                }
                Err(join_err) => {
                    error!(
                        consumer = self.consumer.name(),
                        error = %join_err,
                        "delivery task panicked"
                    );
                    failure.get_or_insert(BeaconError::internal("delivery task panicked"));
                }
            }
        }
        if let Some(err) = failure {
            // Cursor stays put; already-delivered events in the batch are
            // suppressed as duplicates on the re-read.
            return Err(err);
        }

        DbStore::open(&self.db_path)?
            .cursors()
            .advance(self.consumer.name(), through, Utc::now())?;
        Ok(pass)
    }

    fn delivery(&self) -> Delivery {
        Delivery {
            db_path: self.db_path.clone(),
            consumer: Arc::clone(&self.consumer),
            policy: self.policy.clone(),
            handler_timeout: Duration::from_secs(self.config.handler_timeout_secs),
        }
    }

    /// Spawns the delivery loop and returns its control handle.
    pub fn start(self) -> RuntimeHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        RuntimeHandle { shutdown_tx }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(consumer = self.consumer.name(), "consumer runtime started");
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut wake = self.bus.subscribe();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match self.drain().await {
                Ok(pass) if pass.total() > 0 => {
                    debug!(
                        consumer = self.consumer.name(),
                        delivered = pass.delivered,
                        duplicates = pass.duplicates,
                        dead_lettered = pass.dead_lettered,
                        "drain pass"
                    );
                    // More may be waiting past the batch limit.
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    error!(consumer = self.consumer.name(), error = %err, "drain pass failed");
                }
            }

            // A lagged wake receiver is fine: drains read from the log, not
            // the bus, so skipped notifications lose nothing.
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(poll_interval) => {}
                _ = wake.recv() => {}
            }
        }
        info!(consumer = self.consumer.name(), "consumer runtime stopped");
    }
}

enum Outcome {
    Delivered,
    Duplicate,
    DeadLettered,
}

/// The per-group slice of the runtime that rides into spawned tasks. Each
/// task opens its own connections, so groups never contend on one handle.
struct Delivery {
    db_path: String,
    consumer: Arc<dyn Consumer>,
    policy: RetryPolicy,
    handler_timeout: Duration,
}

impl Delivery {
    async fn deliver_group(&self, events: Vec<Envelope>) -> Result<DrainPass, BeaconError> {
        let mut pass = DrainPass::default();
        for envelope in events {
            match self.deliver(&envelope).await? {
                Outcome::Delivered => pass.delivered += 1,
                Outcome::Duplicate => pass.duplicates += 1,
                Outcome::DeadLettered => pass.dead_lettered += 1,
            }
        }
        Ok(pass)
    }

    /// Check the dedup record, apply the effect, record the key, in that
    /// order. Transient failures retry in process with backoff until the
    /// attempt budget runs out; then the event is parked for an operator.
    async fn deliver(&self, envelope: &Envelope) -> Result<Outcome, BeaconError> {
        let name = self.consumer.name();
        {
            let store = DbStore::open(&self.db_path)?;
            if store.idempotency().seen(name, &envelope.event_id)? {
                debug!(consumer = name, event_id = %envelope.event_id, "duplicate suppressed");
                return Ok(Outcome::Duplicate);
            }
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match timeout(self.handler_timeout, self.consumer.handle(envelope)).await
            {
                Ok(result) => result,
                Err(_) => Err(HandlerError::transient(format!(
                    "handler exceeded {}s timeout",
                    self.handler_timeout.as_secs()
                ))),
            };

            match result {
                Ok(()) => {
                    DbStore::open(&self.db_path)?.idempotency().record(
                        name,
                        &envelope.event_id,
                        Utc::now(),
                    )?;
                    return Ok(Outcome::Delivered);
                }
                Err(HandlerError::Transient { message })
                    if attempts < self.policy.max_attempts =>
                {
                    let delay = self.policy.delay_for(attempts - 1);
                    warn!(
                        consumer = name,
                        event_id = %envelope.event_id,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    let letter =
                        DeadLetter::new(name, envelope.clone(), attempts, err.to_string(), Utc::now());
                    DbStore::open(&self.db_path)?.dead_letters().insert(&letter)?;
                    error!(
                        consumer = name,
                        event_id = %envelope.event_id,
                        dead_letter_id = %letter.id,
                        attempts,
                        error = %err,
                        "event dead-lettered"
                    );
                    return Ok(Outcome::DeadLettered);
                }
            }
        }
    }
}

/// What became of a dead letter pushed back through its consumer.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Handled (or already recorded as processed); the letter is gone.
    Replayed,
    /// The handler failed again; the letter stays parked.
    Failed(String),
    NotFound,
}

/// Operator replay of a single dead letter. One attempt, no retry loop; an
/// operator watching the result is the backoff.
pub async fn replay_dead_letter(
    db_path: &str,
    consumer: &dyn Consumer,
    id: &DeadLetterId,
) -> Result<ReplayOutcome, BeaconError> {
    let Some(letter) = DbStore::open(db_path)?.dead_letters().get(id)? else {
        return Ok(ReplayOutcome::NotFound);
    };
    let name = consumer.name();

    {
        let store = DbStore::open(db_path)?;
        if store.idempotency().seen(name, &letter.event_id)? {
            store.dead_letters().remove(id)?;
            return Ok(ReplayOutcome::Replayed);
        }
    }

    match consumer.handle(&letter.envelope).await {
        Ok(()) => {
            let store = DbStore::open(db_path)?;
            store
                .idempotency()
                .record(name, &letter.event_id, Utc::now())?;
            store.dead_letters().remove(id)?;
            info!(consumer = name, event_id = %letter.event_id, "dead letter replayed");
            Ok(ReplayOutcome::Replayed)
        }
        Err(err) => Ok(ReplayOutcome::Failed(err.to_string())),
    }
}
