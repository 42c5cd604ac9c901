use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chatmirror_protocol::ChannelId;
use chatmirror_store::{MemoryStore, SqliteStore, Store};
use chatmirror_sync::{run_sync_loop, SyncConfig, SyncEngine, SyncTotals};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the replay tool.
struct Args {
    events: PathBuf,
    db: Option<PathBuf>,
    channel: Option<String>,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut events = None;
    let mut db = None;
    let mut channel = None;
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--events" => events = args.next().map(PathBuf::from),
            "--db" => db = args.next().map(PathBuf::from),
            "--channel" => channel = args.next(),
            "--config" => config = args.next().map(PathBuf::from),
            other => tracing::warn!(arg = other, "ignoring unknown argument"),
        }
    }

    let Some(events) = events else {
        bail!("usage: chatmirror-replay --events <file.ndjson> [--db <path>] [--channel <cid>] [--config <file.json>]");
    };

    Ok(Args {
        events,
        db,
        channel,
        config,
    })
}

/// One JSON envelope per line. Blank lines are ignored; lines that are not
/// JSON are logged and dropped.
fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read events from {}", path.display()))?;

    let mut envelopes = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(envelope) => envelopes.push(envelope),
            Err(e) => tracing::warn!(line = number + 1, error = %e, "skipping unparseable line"),
        }
    }
    Ok(envelopes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(db) = args.db {
        config.database_path = Some(db);
    }
    if let Some(channel) = args.channel {
        config.default_channel = Some(ChannelId::from(channel));
    }
    config.validate()?;

    let envelopes = read_events(&args.events)?;
    tracing::info!(events = envelopes.len(), "chatmirror-replay starting");

    let totals = match config.database_path.clone() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let store = SqliteStore::open(&path)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            replay(store, config, envelopes).await?
        }
        None => replay(MemoryStore::new(), config, envelopes).await?,
    };

    println!("{}", serde_json::to_string_pretty(&totals)?);
    Ok(())
}

async fn replay<S: Store>(
    store: S,
    config: SyncConfig,
    envelopes: Vec<Value>,
) -> anyhow::Result<SyncTotals> {
    let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
    let (_connectivity_tx, connectivity_rx) = watch::channel(true);
    // Replays end when the input is exhausted; shutdown is never signalled.
    let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    let engine = Arc::new(SyncEngine::new(store, config));
    let listener = tokio::spawn(count_notifications(engine.subscribe()));
    let sync = tokio::spawn(run_sync_loop(engine, events_rx, connectivity_rx, shutdown_rx));

    for envelope in envelopes {
        if events_tx.send(envelope).await.is_err() {
            tracing::warn!("sync loop stopped before all events were sent");
            break;
        }
    }
    drop(events_tx);

    let totals = sync.await.context("sync loop panicked")?;
    let notified = listener.await.context("notification listener panicked")?;
    tracing::info!(notified, "replay finished");
    Ok(totals)
}

/// Drain notifications until the engine goes away.
async fn count_notifications(mut rx: broadcast::Receiver<chatmirror_sync::Notification>) -> usize {
    let mut seen = 0;
    loop {
        match rx.recv().await {
            Ok(notification) => {
                seen += 1;
                tracing::trace!(?notification, "notification");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "notification listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    seen
}
