use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ReconcileConfig, ReconcileError};
use crate::Amount;
use crate::accrual::{AccrualError, AccrualService};
use crate::model::{OrderStatus, OutboxEntry, OutboxStatus};
use crate::repository::{
    OrderRepository, OutboxRepository, Repositories, StorageError, UnitOfWork,
};

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    /// Reached a final verdict; outbox entry marked `PROCESSED`.
    pub completed: usize,
    /// Oracle still working on it; entry stays `PENDING` without a retry spent.
    pub deferred: usize,
    pub retried: usize,
    /// Retry ceiling reached; entry marked `FAILED`.
    pub failed: usize,
    /// Left untouched because of shutdown.
    pub skipped: usize,
    /// Longest back-off the oracle asked for during the tick.
    pub retry_after: Option<Duration>,
}

impl TickReport {
    fn record(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Completed => self.completed += 1,
            Settlement::Deferred => self.deferred += 1,
            Settlement::Retried { retry_after } => {
                self.retried += 1;
                self.retry_after = self.retry_after.max(retry_after);
            }
            Settlement::Failed => self.failed += 1,
            Settlement::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Completed,
    Deferred,
    Retried { retry_after: Option<Duration> },
    Failed,
    Skipped,
}

/// Stateless between ticks; clones share repositories and the oracle client.
#[derive(Clone)]
pub struct Dispatcher {
    orders: Arc<dyn OrderRepository>,
    outbox: Arc<dyn OutboxRepository>,
    uow: Arc<dyn UnitOfWork>,
    accrual: Arc<dyn AccrualService>,
    config: ReconcileConfig,
}

impl Dispatcher {
    pub fn new(
        repos: &Repositories,
        accrual: Arc<dyn AccrualService>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            orders: repos.orders.clone(),
            outbox: repos.outbox.clone(),
            uow: repos.uow.clone(),
            accrual,
            config,
        }
    }

    pub fn config(&self) -> ReconcileConfig {
        self.config
    }

    /// Run one reconciliation tick.
    ///
    /// Only a failure to fetch the batch is returned as an error; per-entry
    /// failures are settled through the retry policy and counted in the report.
    pub async fn process_pending_orders(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TickReport, StorageError> {
        let batch = self.outbox.find_pending(self.config.batch_size).await?;

        let mut report = TickReport {
            fetched: batch.len(),
            ..TickReport::default()
        };
        if batch.is_empty() {
            debug!("no pending orders");
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending = batch.into_iter();

        while let Some(entry) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.skipped += 1;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let dispatcher = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                dispatcher.reconcile_entry(entry, &cancel).await
            });
        }
        report.skipped += pending.len();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(settlement) => report.record(settlement),
                Err(e) => error!(error = %e, "reconciliation task aborted"),
            }
        }

        info!(
            fetched = report.fetched,
            completed = report.completed,
            deferred = report.deferred,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "reconciliation tick finished"
        );
        Ok(report)
    }

    /// Reconcile one entry and apply the outbox policy to the outcome.
    async fn reconcile_entry(&self, entry: OutboxEntry, cancel: &CancellationToken) -> Settlement {
        if cancel.is_cancelled() {
            return Settlement::Skipped;
        }

        // a panic while reconciling is settled like any other failure
        let outcome = {
            let dispatcher = self.clone();
            let target = entry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.process_order(&target, &cancel).await }).await
        };
        let outcome = outcome.unwrap_or_else(|e| Err(ReconcileError::Panicked(e.to_string())));

        match outcome {
            Ok(status) if status.is_final() => {
                let result = self
                    .outbox
                    .update_status(entry.id, OutboxStatus::Processed)
                    .await;
                log_bookkeeping(&entry, "mark processed", result);
                Settlement::Completed
            }
            Ok(status) => {
                debug!(
                    outbox_id = entry.id,
                    order_id = entry.order_id,
                    status = %status,
                    "order not final yet, deferring"
                );
                let result = self.outbox.defer(entry.id).await;
                log_bookkeeping(&entry, "defer", result);
                Settlement::Deferred
            }
            Err(ReconcileError::Cancelled) => Settlement::Skipped,
            Err(e) if entry.retries_exhausted(self.config.max_retries) => {
                error!(
                    outbox_id = entry.id,
                    order_id = entry.order_id,
                    retries = entry.retries,
                    reason = %e,
                    "reconciliation failed permanently"
                );
                let result = self
                    .outbox
                    .update_status(entry.id, OutboxStatus::Failed)
                    .await;
                log_bookkeeping(&entry, "mark failed", result);
                Settlement::Failed
            }
            Err(e) => {
                warn!(
                    outbox_id = entry.id,
                    order_id = entry.order_id,
                    retries = entry.retries,
                    reason = %e,
                    "reconciliation failed, will retry"
                );
                let retry_after = match e {
                    ReconcileError::Accrual(AccrualError::RateLimited { retry_after }) => {
                        retry_after
                    }
                    _ => None,
                };
                let result = self.outbox.increment_retries(entry.id).await;
                log_bookkeeping(&entry, "increment retries", result);
                Settlement::Retried { retry_after }
            }
        }
    }

    /// Ask the oracle about the entry's order and persist the verdict.
    ///
    /// The balance credit and the status write share one transaction.
    /// Returns the status the order now has.
    async fn process_order(
        &self,
        entry: &OutboxEntry,
        cancel: &CancellationToken,
    ) -> Result<OrderStatus, ReconcileError> {
        let mut order = self
            .orders
            .find_by_id(entry.order_id)
            .await?
            .ok_or(ReconcileError::OrderNotFound(entry.order_id))?;

        // a previous attempt committed but could not settle the outbox entry
        if order.is_processed() {
            debug!(order_id = order.id(), "order already processed");
            return Ok(OrderStatus::Processed);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            response = self.accrual.order_info(order.number()) => response,
        };

        let (status, accrual) = match response {
            Ok(response) => {
                let status = map_status(&response.status)?;
                let accrual = if status.is_final() {
                    response.accrual
                } else {
                    None
                };
                (status, accrual)
            }
            Err(AccrualError::NotFound) => (OrderStatus::Invalid, None),
            Err(e) => return Err(e.into()),
        };

        order.update_status(status, accrual)?;

        let tx = self.uow.begin().await?;
        if let Some(amount) = credit(status, accrual) {
            tx.balances().accrue(order.user_id(), amount).await?;
        }
        match tx.orders().update_status(order.id(), status, accrual).await {
            // settled by another dispatcher since the read above; dropping the
            // transaction discards the credit
            Err(StorageError::AlreadyProcessed(_)) => {
                debug!(order_id = order.id(), "order processed concurrently");
                return Ok(OrderStatus::Processed);
            }
            other => other?,
        }
        tx.commit().await?;

        info!(
            order_id = order.id(),
            user_id = order.user_id(),
            status = %status,
            accrual = ?accrual.map(|a| a.to_string()),
            "order reconciled"
        );
        Ok(status)
    }
}

/// Oracle status names to order statuses.
fn map_status(raw: &str) -> Result<OrderStatus, ReconcileError> {
    match raw {
        "REGISTERED" => Ok(OrderStatus::New),
        "PROCESSING" => Ok(OrderStatus::Processing),
        "INVALID" => Ok(OrderStatus::Invalid),
        "PROCESSED" => Ok(OrderStatus::Processed),
        other => Err(ReconcileError::UnknownAccrualStatus(other.to_string())),
    }
}

/// Amount to credit for a verdict, if any. Zero accruals credit nothing.
fn credit(status: OrderStatus, accrual: Option<Amount>) -> Option<Amount> {
    match (status, accrual) {
        (OrderStatus::Processed, Some(amount)) if amount.is_positive() => Some(amount),
        _ => None,
    }
}

fn log_bookkeeping(entry: &OutboxEntry, action: &str, result: Result<(), StorageError>) {
    if let Err(e) = result {
        error!(
            outbox_id = entry.id,
            order_id = entry.order_id,
            action,
            error = %e,
            "outbox bookkeeping failed"
        );
    }
}
