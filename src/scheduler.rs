//! Repeating check timers, one per scheduled monitor entry.
//!
//! Jobs are ephemeral: the scheduler rebuilds them from the monitor store at
//! startup and replaces them cancel-then-register whenever an interval
//! changes, so there is never more than one live timer per record. A job
//! only decides when to fire; the check itself runs through [`CheckRunner`]
//! and must never propagate an error back into the timer task.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics;
use crate::monitor::{MonitorEntry, MonitorKey, MonitorStore};

/// Callback fired by scheduled timers.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Run one scheduled check for `key`. Must be infallible from the
    /// scheduler's point of view.
    async fn run_scheduled_check(&self, key: MonitorKey);
}

struct ScheduledJob {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the per-record repeating timers.
pub struct Scheduler {
    runner: Arc<dyn CheckRunner>,
    warmup: Duration,
    jobs: parking_lot::Mutex<HashMap<MonitorKey, ScheduledJob>>,
}

impl Scheduler {
    /// Build a scheduler firing checks through `runner`. Each new timer
    /// waits `warmup` before its first tick.
    pub fn new(runner: Arc<dyn CheckRunner>, warmup: Duration) -> Self {
        Self {
            runner,
            warmup,
            jobs: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Register timers for every scheduled entry in the store. Called once
    /// at startup.
    pub async fn start(&self, store: &MonitorStore) {
        let entries = store.scheduled().await;
        info!(jobs = entries.len(), "registering scheduled checks");
        for entry in entries {
            self.apply(&entry);
        }
    }

    /// Bring the timer for `entry` in line with its interval: cancel any
    /// existing timer, then register a new one if the interval is nonzero.
    pub fn apply(&self, entry: &MonitorEntry) {
        let mut jobs = self.jobs.lock();

        if let Some(old) = jobs.remove(&entry.key) {
            old.token.cancel();
            old.handle.abort();
            debug!(
                zone_id = %entry.key.zone_id,
                record_id = %entry.key.record_id,
                "cancelled previous timer"
            );
        }

        if entry.scheduled() {
            let token = CancellationToken::new();
            let handle = tokio::spawn(job_loop(
                self.runner.clone(),
                entry.clone(),
                self.warmup,
                token.clone(),
            ));
            info!(
                zone_id = %entry.key.zone_id,
                record_id = %entry.key.record_id,
                interval_secs = entry.interval_secs,
                "registered scheduled check"
            );
            jobs.insert(entry.key.clone(), ScheduledJob { token, handle });
        }

        metrics::record_active_jobs(jobs.len());
    }

    /// Number of live timers.
    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Cancel all timers.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock();
        for (_, job) in jobs.drain() {
            job.token.cancel();
            job.handle.abort();
        }
        metrics::record_active_jobs(0);
        info!("scheduler stopped");
    }
}

async fn job_loop(
    runner: Arc<dyn CheckRunner>,
    entry: MonitorEntry,
    warmup: Duration,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(warmup) => {}
    }

    let mut interval = tokio::time::interval(Duration::from_secs(entry.interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(
                    zone_id = %entry.key.zone_id,
                    record_id = %entry.key.record_id,
                    "scheduled check timer stopped"
                );
                return;
            }

            _ = interval.tick() => {
                runner.run_scheduled_check(entry.key.clone()).await;
            }
        }
    }
}
