use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use beacon_consumers::{
    AuditConsumer, Consumer, ConsumerRuntime, HttpTaskStore, NotificationConsumer,
    RecurringTaskConsumer, ReplayOutcome, RetryPolicy, RuntimeConfig, RuntimeHandle,
    replay_dead_letter,
};
use beacon_core::BeaconError;
use beacon_core::dead_letters::DeadLetterRepository;
use beacon_core::events::EventLogRepository;
use beacon_core::idempotency::IdempotencyRepository;
use beacon_core::publisher::Publisher;
use beacon_core::store::Store;
use beacon_db::DbStore;
use beacon_events::EventBus;
use beacon_events::ids::DeadLetterId;
use beacon_scheduler::{FiringConfig, FiringWorker};
use beacon_sync::{ConnectionRegistry, SyncFanoutConsumer};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_PORT: u16 = 4690;
const DEFAULT_RETENTION_HOURS: i64 = 72;
const RETENTION_SWEEP_SECS: u64 = 3_600;
const DLQ_LIST_LIMIT: u32 = 100;
const TAIL_LIMIT: u32 = 1_000;

#[derive(Parser)]
#[command(name = "beacon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Serve,
    #[command(subcommand)]
    Dlq(DlqCommand),
    #[command(subcommand)]
    Events(EventsCommand),
}

#[derive(Subcommand)]
enum DlqCommand {
    List,
    Show { id: String },
    Replay { id: String },
    Discard { id: String },
}

#[derive(Subcommand)]
enum EventsCommand {
    Tail {
        #[arg(long, default_value_t = 0)]
        after: i64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "beacon=info,beacon_scheduler=info,beacon_consumers=info,beacon_sync=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => {
            if let Err(err) = serve().await {
                eprintln!("serve error: {err}");
                std::process::exit(1);
            }
        }
        Command::Dlq(command) => {
            if let Err(err) = dlq(command).await {
                eprintln!("dlq error: {err}");
                std::process::exit(1);
            }
        }
        Command::Events(EventsCommand::Tail { after }) => {
            if let Err(err) = events_tail(&db_path_from_env(), after) {
                eprintln!("events error: {err}");
                std::process::exit(1);
            }
        }
    }
}

fn db_path_from_env() -> String {
    std::env::var("BEACON_DB_PATH").unwrap_or_else(|_| "beacon.db".to_string())
}

/// Migrates, then hands back a fresh connection over the migrated file.
fn open_store(db_path: &str) -> Result<DbStore, BeaconError> {
    beacon_db::open_and_migrate(db_path).map_err(BeaconError::storage)?;
    DbStore::open(db_path)
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = db_path_from_env();
    if let Some(parent) = Path::new(&db_path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let port = std::env::var("BEACON_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

    let bus = EventBus::new(1024);
    let registry = ConnectionRegistry::new();

    let worker = FiringWorker::new(
        Publisher::new(open_store(&db_path)?, bus.clone()),
        FiringConfig::from_env(),
    );
    let scheduler = worker.start();

    let policy = RetryPolicy::from_env();
    let config = RuntimeConfig::from_env();
    let consumers: Vec<Arc<dyn Consumer>> = vec![
        Arc::new(NotificationConsumer::new(db_path.clone(), bus.clone())),
        Arc::new(RecurringTaskConsumer::new(
            db_path.clone(),
            bus.clone(),
            Arc::new(HttpTaskStore::from_env()),
        )),
        Arc::new(AuditConsumer::new(db_path.clone())),
        Arc::new(SyncFanoutConsumer::new(registry.clone())),
    ];
    let runtimes: Vec<RuntimeHandle> = consumers
        .into_iter()
        .map(|consumer| {
            ConsumerRuntime::new(
                db_path.clone(),
                bus.clone(),
                consumer,
                policy.clone(),
                config.clone(),
            )
            .start()
        })
        .collect();

    tokio::spawn(retention_loop(db_path.clone()));

    let state = beacon_sync::AppState {
        db_path: db_path.clone(),
        registry,
    };
    info!(%addr, %db_path, "beacon is up");
    tokio::select! {
        result = beacon_sync::serve(state, addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            scheduler.shutdown().await;
            for runtime in &runtimes {
                runtime.shutdown().await;
            }
        }
    }
    Ok(())
}

/// Hourly sweep: events leave the log after the retention window, dedup
/// markers after twice that, so a redelivery of any still-retained event
/// always finds its marker.
async fn retention_loop(db_path: String) {
    let hours = std::env::var("BEACON_RETENTION_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(DEFAULT_RETENTION_HOURS);
    loop {
        match sweep(&db_path, hours) {
            Ok((events, markers)) if events > 0 || markers > 0 => {
                info!(events, markers, "retention sweep");
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "retention sweep failed"),
        }
        tokio::time::sleep(std::time::Duration::from_secs(RETENTION_SWEEP_SECS)).await;
    }
}

fn sweep(db_path: &str, retention_hours: i64) -> Result<(u64, u64), BeaconError> {
    let store = DbStore::open(db_path)?;
    let now = Utc::now();
    let events = store
        .events()
        .prune_older_than(now - chrono::Duration::hours(retention_hours))?;
    let markers = store
        .idempotency()
        .prune_older_than(now - chrono::Duration::hours(retention_hours * 2))?;
    Ok((events, markers))
}

async fn dlq(command: DlqCommand) -> Result<(), BeaconError> {
    let db_path = db_path_from_env();
    match command {
        DlqCommand::List => dlq_list(&db_path),
        DlqCommand::Show { id } => dlq_show(&db_path, &id),
        DlqCommand::Replay { id } => dlq_replay(&db_path, &id).await,
        DlqCommand::Discard { id } => dlq_discard(&db_path, &id),
    }
}

fn dlq_list(db_path: &str) -> Result<(), BeaconError> {
    let store = open_store(db_path)?;
    let letters = store.dead_letters().list(DLQ_LIST_LIMIT)?;
    if letters.is_empty() {
        println!("dead-letter queue is empty");
        return Ok(());
    }
    for letter in letters {
        println!(
            "{}  {}  {}  {}  attempts={}",
            letter.id.as_str().yellow(),
            letter.failed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            letter.consumer_name.cyan(),
            letter.envelope.body.kind().as_str(),
            letter.attempts,
        );
        println!("        {}", letter.last_error.red());
    }
    Ok(())
}

fn dlq_show(db_path: &str, id: &str) -> Result<(), BeaconError> {
    let id = DeadLetterId::new(id.to_string())?;
    let store = open_store(db_path)?;
    match store.dead_letters().get(&id)? {
        Some(letter) => println!(
            "{}",
            serde_json::to_string_pretty(&letter).unwrap_or_else(|_| "{}".to_string())
        ),
        None => println!("{} not found", id.as_str()),
    }
    Ok(())
}

async fn dlq_replay(db_path: &str, id: &str) -> Result<(), BeaconError> {
    let id = DeadLetterId::new(id.to_string())?;
    let consumer_name = {
        let store = open_store(db_path)?;
        store
            .dead_letters()
            .get(&id)?
            .map(|letter| letter.consumer_name)
    };
    let Some(name) = consumer_name else {
        println!("{} not found", id.as_str());
        return Ok(());
    };

    let consumer = consumer_named(&name, db_path)?;
    match replay_dead_letter(db_path, consumer.as_ref(), &id).await? {
        ReplayOutcome::Replayed => println!("{} {}", "replayed".green(), id.as_str()),
        ReplayOutcome::Failed(message) => {
            println!("{} {}: {message}", "failed".red(), id.as_str());
        }
        ReplayOutcome::NotFound => println!("{} not found", id.as_str()),
    }
    Ok(())
}

/// Rebuilds the consumer a dead letter belongs to. Replays run outside
/// `serve`, so events a replay publishes reach the live consumers through
/// the log rather than this process's bus, and a fan-out replay pushes to
/// the (empty) set of connections registered here.
fn consumer_named(name: &str, db_path: &str) -> Result<Arc<dyn Consumer>, BeaconError> {
    let bus = EventBus::new(16);
    let consumer: Arc<dyn Consumer> = match name {
        "notifications" => Arc::new(NotificationConsumer::new(db_path.to_string(), bus)),
        "recurring_tasks" => Arc::new(RecurringTaskConsumer::new(
            db_path.to_string(),
            bus,
            Arc::new(HttpTaskStore::from_env()),
        )),
        "audit" => Arc::new(AuditConsumer::new(db_path.to_string())),
        "sync_fanout" => Arc::new(SyncFanoutConsumer::new(ConnectionRegistry::new())),
        other => {
            return Err(BeaconError::internal(format!(
                "no consumer named {other}"
            )));
        }
    };
    Ok(consumer)
}

fn dlq_discard(db_path: &str, id: &str) -> Result<(), BeaconError> {
    let id = DeadLetterId::new(id.to_string())?;
    let store = open_store(db_path)?;
    if store.dead_letters().remove(&id)? {
        println!("{} {}", "discarded".green(), id.as_str());
    } else {
        println!("{} not found", id.as_str());
    }
    Ok(())
}

fn events_tail(db_path: &str, after: i64) -> Result<(), BeaconError> {
    let store = open_store(db_path)?;
    for envelope in store.events().list_after(after, TAIL_LIMIT)? {
        println!(
            "{}  {}  {}  {}  {}",
            format!("{:>6}", envelope.seq).yellow(),
            envelope
                .occurred_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            format!("{:<18}", envelope.body.kind().as_str()).cyan(),
            envelope.user_id,
            serde_json::to_string(&envelope.body).unwrap_or_else(|_| "{}".to_string()),
        );
    }
    Ok(())
}
