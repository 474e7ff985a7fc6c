use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::Dispatcher;

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Drives [`Dispatcher`] ticks on a fixed interval until shutdown.
pub struct ReconcileWorker {
    dispatcher: Dispatcher,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ReconcileWorker {
    pub fn new(dispatcher: Dispatcher, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            interval: interval.max(MIN_INTERVAL),
            shutdown,
        }
    }

    pub async fn run(self) {
        let config = self.dispatcher.config();
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = config.batch_size,
            workers = config.workers,
            max_retries = config.max_retries,
            "reconcile worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("reconcile worker received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let report = match self.dispatcher.process_pending_orders(&self.shutdown).await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "failed to fetch pending orders");
                    continue;
                }
            };

            if let Some(wait) = report.retry_after {
                info!(wait_secs = wait.as_secs(), "accrual system asked to back off");
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("reconcile worker received shutdown signal");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => ticker.reset(),
                }
            }
        }
    }
}
