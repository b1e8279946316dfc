//! Background sweep of expired cache entries and stale ledger sources.
//!
//! Runs as a `tokio::spawn` task with graceful shutdown via `watch` channel.

use crate::cache::ResultCache;
use crate::config::MaintenanceConfig;
use crate::ledger::SourceLedger;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Counts removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_entries: usize,
    pub pruned_sources: usize,
}

/// Purge expired cache entries and prune sources past retention.
pub async fn sweep_once(cache: &ResultCache, ledger: &SourceLedger) -> SweepReport {
    let report = SweepReport {
        expired_entries: cache.purge_expired().await,
        pruned_sources: ledger.prune_expired().await,
    };
    if report != SweepReport::default() {
        info!(
            expired_entries = report.expired_entries,
            pruned_sources = report.pruned_sources,
            "Maintenance sweep"
        );
    } else {
        debug!("Maintenance sweep found nothing to remove");
    }
    report
}

/// Periodic maintenance owned by the host process, not by sessions.
pub struct MaintenanceTask {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    sweeps: Arc<AtomicU64>,
    interval: Duration,
}

impl MaintenanceTask {
    /// Spawn the sweep loop on the configured interval.
    pub fn from_config(
        cache: Arc<ResultCache>,
        ledger: Arc<SourceLedger>,
        config: &MaintenanceConfig,
    ) -> Self {
        Self::start(cache, ledger, config.interval())
    }

    /// Spawn the sweep loop. The first sweep runs after one `interval`.
    pub fn start(cache: Arc<ResultCache>, ledger: Arc<SourceLedger>, interval: Duration) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sweeps = Arc::new(AtomicU64::new(0));
        let counter = sweeps.clone();

        let handle = tokio::spawn(async move {
            sweep_loop(cancel_rx, cache, ledger, interval, counter).await;
        });

        info!(interval_ms = interval.as_millis() as u64, "Maintenance task started");
        Self {
            cancel_tx,
            handle,
            sweeps,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Completed sweeps so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    /// Signal the loop to exit and wait for it (at most 10 seconds).
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(10), self.handle).await;
        info!("Maintenance task stopped");
    }
}

async fn sweep_loop(
    mut cancel_rx: watch::Receiver<bool>,
    cache: Arc<ResultCache>,
    ledger: Arc<SourceLedger>,
    interval: Duration,
    sweeps: Arc<AtomicU64>,
) {
    let interval = interval.max(Duration::from_millis(1));
    loop {
        if *cancel_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                sweep_once(&cache, &ledger).await;
                sweeps.fetch_add(1, Ordering::SeqCst);
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Maintenance loop exited");
}
