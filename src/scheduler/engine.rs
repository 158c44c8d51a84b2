use crate::scheduler::{Scheduler, SweepReport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main scheduler execution loop.
///
/// Fixed delay: the interval is measured from the end of one sweep to the
/// start of the next, however long the sweep took. Stops when `cancel` fires,
/// either during the sleep or between two sites.
pub async fn run_scheduler_loop(scheduler: Scheduler, cancel: CancellationToken) {
    let interval = scheduler.interval();
    info!(interval_secs = interval.as_secs(), "Scheduler engine started");

    loop {
        let started = scheduler.clock.now();
        let report = scheduler.sweep(&cancel).await;
        let elapsed = scheduler.clock.now() - started;

        match &report {
            SweepReport::Completed(stats) => info!(
                probed = stats.probed,
                up = stats.up,
                down = stats.down,
                error = stats.error,
                failed_writes = stats.failed_writes,
                elapsed_ms = elapsed.num_milliseconds(),
                "Sweep complete"
            ),
            SweepReport::Interrupted(stats) => {
                info!(probed = stats.probed, "Sweep interrupted by shutdown")
            }
            SweepReport::Skipped { reason } => warn!(%reason, "Sweep skipped"),
            SweepReport::Empty => warn!("Sweep skipped, site list is empty"),
        }

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = scheduler.clock.sleep(interval) => {}
        }
    }

    info!("Scheduler engine stopped");
}
