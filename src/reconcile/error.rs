use thiserror::Error;

use crate::accrual::AccrualError;
use crate::model::{OrderError, OrderId};
use crate::repository::StorageError;

/// Why a single outbox entry could not be reconciled.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("accrual lookup failed: {0}")]
    Accrual(#[from] AccrualError),

    #[error("unknown accrual status '{0}'")]
    UnknownAccrualStatus(String),

    #[error("order transition rejected: {0}")]
    Transition(#[from] OrderError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("reconciliation task panicked: {0}")]
    Panicked(String),

    #[error("shutdown requested")]
    Cancelled,
}
