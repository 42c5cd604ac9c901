use std::sync::Arc;

use chatmirror_store::Store;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::engine::{BatchReport, SyncEngine};
use crate::notification::SyncSignal;

/// Running totals over the life of one sync loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
    pub batches: usize,
    pub applied: usize,
    pub unsupported: usize,
    pub skipped: usize,
    /// Batches abandoned because the store failed.
    pub failed_batches: usize,
}

impl SyncTotals {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.applied += report.applied;
        self.unsupported += report.unsupported.len();
        self.skipped += report.skipped.len();
    }
}

/// Run the sync loop until shutdown or until the event stream closes.
///
/// Envelopes are drained from `events_rx` up to `batch_size` at a time and
/// each batch is applied as one unit of work on the blocking pool. The
/// connectivity flag is reported to subscribers as [`SyncSignal`]s; on
/// reconnect callers are expected to re-run their queries, since events
/// missed while offline are never delivered.
pub async fn run_sync_loop<S: Store>(
    engine: Arc<SyncEngine<S>>,
    mut events_rx: mpsc::Receiver<Value>,
    mut connectivity_rx: watch::Receiver<bool>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> SyncTotals {
    tracing::info!("sync loop started");

    let batch_size = engine.config().batch_size.max(1);
    let mut online = *connectivity_rx.borrow_and_update();
    let mut connectivity_open = true;
    let mut totals = SyncTotals::default();

    loop {
        tokio::select! {
            received = events_rx.recv() => {
                let Some(first) = received else {
                    tracing::info!("event stream closed");
                    break;
                };
                let mut batch = Vec::with_capacity(batch_size);
                batch.push(first);
                while batch.len() < batch_size {
                    match events_rx.try_recv() {
                        Ok(envelope) => batch.push(envelope),
                        Err(_) => break,
                    }
                }

                let size = batch.len();
                match engine.apply_batch_async(batch, None).await {
                    Ok(report) => totals.record(&report),
                    Err(e) => {
                        totals.failed_batches += 1;
                        tracing::warn!(error = %e, size, "batch failed");
                    }
                }
            }
            changed = connectivity_rx.changed(), if connectivity_open => {
                if changed.is_err() {
                    // Sender gone: connectivity is frozen at its last value.
                    connectivity_open = false;
                    continue;
                }
                let now = *connectivity_rx.borrow_and_update();
                if now == online {
                    continue;
                }
                online = now;
                if online {
                    tracing::info!("connection restored, subscribers should re-query");
                    engine.publish_signal(SyncSignal::Reconnected);
                } else {
                    tracing::info!("connection lost");
                    engine.publish_signal(SyncSignal::Offline);
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("sync loop shutting down");
                break;
            }
        }
    }

    tracing::info!(
        batches = totals.batches,
        applied = totals.applied,
        skipped = totals.skipped,
        "sync loop stopped"
    );
    totals
}
