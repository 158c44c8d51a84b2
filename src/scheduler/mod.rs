//! Sweep scheduler: reload the site list, probe every site in order, record
//! every outcome, then sleep a fixed delay.

pub mod clock;
pub mod engine;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::probes::{Outcome, Prober, Reachability};
use crate::sites::{SiteList, SiteSource};
use crate::storage::{OutcomeStore, StoreError};

#[cfg(any(test, feature = "test-util"))]
pub use self::clock::ManualClock;
pub use self::clock::{Clock, SystemClock};
pub use self::engine::run_scheduler_loop;

/// Default delay between the end of one sweep and the start of the next.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Sweeping,
}

/// Counters for one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    pub probed: usize,
    pub recorded: usize,
    pub failed_writes: usize,
    pub up: usize,
    pub down: usize,
    pub error: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepReport {
    /// The site list could not be read; the previous snapshot was kept.
    Skipped { reason: String },
    /// The site list had no valid entries.
    Empty,
    Completed(SweepStats),
    /// Cancellation was observed between two sites.
    Interrupted(SweepStats),
}

/// Owns the write path: one sweep at a time, sites probed sequentially.
pub struct Scheduler {
    source: Arc<dyn SiteSource>,
    prober: Arc<dyn Prober>,
    store: Arc<dyn OutcomeStore>,
    sites: SiteList,
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn SiteSource>,
        prober: Arc<dyn Prober>,
        store: Arc<dyn OutcomeStore>,
        sites: SiteList,
    ) -> Self {
        let (state, _rx) = watch::channel(SchedulerState::Idle);
        Self {
            source,
            prober,
            store,
            sites,
            clock: Arc::new(SystemClock),
            interval: DEFAULT_INTERVAL,
            state,
            last_stamp: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// The snapshot handle this scheduler publishes into.
    pub fn sites(&self) -> &SiteList {
        &self.sites
    }

    /// Run one full sweep.
    pub async fn sweep(&self, cancel: &CancellationToken) -> SweepReport {
        self.state.send_replace(SchedulerState::Sweeping);
        let report = self.sweep_sites(cancel).await;
        self.state.send_replace(SchedulerState::Idle);
        report
    }

    async fn sweep_sites(&self, cancel: &CancellationToken) -> SweepReport {
        let reloaded = match self.source.reload() {
            Ok(sites) => sites,
            Err(e) => {
                warn!(error = %e, "Site list unreadable, keeping previous list and skipping sweep");
                return SweepReport::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        self.sites.replace(reloaded);
        let snapshot = self.sites.current();
        if snapshot.is_empty() {
            warn!("No valid sites configured, nothing to probe");
            return SweepReport::Empty;
        }

        let mut stats = SweepStats::default();
        for site in snapshot.iter() {
            if cancel.is_cancelled() {
                debug!(remaining = snapshot.len() - stats.probed, "Sweep interrupted");
                return SweepReport::Interrupted(stats);
            }

            debug!(site = %site, "Checking");
            let mut outcome = self.prober.check(site).await;
            self.keep_monotonic(&mut outcome.observed_at);
            stats.probed += 1;
            match outcome.reachable {
                Reachability::Up => stats.up += 1,
                Reachability::Down => stats.down += 1,
                Reachability::Error => stats.error += 1,
            }

            match self.append(&outcome).await {
                Ok(()) => {
                    stats.recorded += 1;
                    info!(
                        site = %site,
                        reachable = %outcome.reachable,
                        status = ?outcome.status_code,
                        latency_ms = outcome.latency.as_millis() as u64,
                        "Status recorded"
                    );
                }
                Err(e) => {
                    stats.failed_writes += 1;
                    error!(site = %site, error = %e, "Failed to record outcome, dropping it");
                }
            }
        }

        SweepReport::Completed(stats)
    }

    /// Write on the blocking pool; SQLite may wait on a lock for seconds.
    async fn append(&self, outcome: &Outcome) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let outcome = outcome.clone();
        tokio::task::spawn_blocking(move || store.append(&outcome)).await?
    }

    /// Stamps never go backwards in write order, even if the wall clock does.
    fn keep_monotonic(&self, observed_at: &mut DateTime<Utc>) {
        let mut last = self.last_stamp.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if *observed_at < prev => {
                debug!(stamped = %observed_at, previous = %prev, "Clock went backwards, reusing previous stamp");
                *observed_at = prev;
            }
            _ => *last = Some(*observed_at),
        }
    }
}
