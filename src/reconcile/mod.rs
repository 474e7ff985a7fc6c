//! Outbox-driven reconciliation of uploaded orders against the accrual oracle.
//!
//! [`Dispatcher`] runs one tick: it fetches a batch of pending outbox entries,
//! reconciles them with bounded concurrency and settles each entry's
//! bookkeeping. [`ReconcileWorker`] repeats ticks on a timer until shutdown.

mod dispatcher;
mod error;
mod worker;

pub use dispatcher::{Dispatcher, TickReport};
pub use error::ReconcileError;
pub use worker::ReconcileWorker;

/// Tuning knobs for one reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Outbox entries fetched per tick.
    pub batch_size: usize,
    /// Reconciliations in flight at once.
    pub workers: usize,
    /// Failures tolerated before an entry is marked `FAILED`.
    pub max_retries: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            workers: 5,
            max_retries: 3,
        }
    }
}
