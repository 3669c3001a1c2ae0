//! Periodic consolidation.
//!
//! Consolidation is never triggered by reads. Hosts that want it to run
//! unattended start a [`ConsolidationScheduler`], which calls
//! [`KnowledgeMemory::consolidate`] on a fixed interval until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use super::engine::KnowledgeMemory;
use super::record::ConsolidationReport;

/// Counters describing what the scheduler has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs: u64,
    pub failures: u64,
    pub promoted: u64,
    pub expired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    failures: AtomicU64,
    promoted: AtomicU64,
    expired: AtomicU64,
}

impl Counters {
    fn record(&self, report: &ConsolidationReport) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.promoted.fetch_add(report.promoted as u64, Ordering::Relaxed);
        self.expired.fetch_add(report.expired as u64, Ordering::Relaxed);
    }
}

/// Background task running consolidation every `period`.
pub struct ConsolidationScheduler {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl ConsolidationScheduler {
    /// Spawn the task. The first pass runs after one full `period`.
    pub fn start(memory: Arc<KnowledgeMemory>, period: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let counters = Arc::new(Counters::default());

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            let wake = Arc::clone(&wake);
            let counters = Arc::clone(&counters);

            tokio::spawn(async move {
                let mut ticker = interval(period.max(Duration::from_millis(1)));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // interval fires immediately; skip that tick
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = wake.notified() => {}
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }

                    match memory.consolidate().await {
                        Ok(report) => counters.record(&report),
                        Err(e) => {
                            counters.failures.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "Scheduled consolidation failed");
                        }
                    }
                }
                info!("Consolidation scheduler stopped");
            })
        };

        info!(period_ms = period.as_millis() as u64, "Consolidation scheduler started");
        Self {
            shutdown,
            wake,
            counters,
            handle: Some(handle),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            promoted: self.counters.promoted.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    /// Signal the task to exit and wait for it.
    pub async fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Consolidation task ended abnormally");
            }
        }
    }
}

impl Drop for ConsolidationScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }
}
