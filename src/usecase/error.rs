//! Errors returned synchronously to callers of the use cases.

use thiserror::Error;

use crate::Amount;
use crate::model::{OrderError, UserId, WithdrawalError};
use crate::repository::StorageError;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("order number '{0}' fails the checksum")]
    InvalidFormat(String),

    #[error("order number {0} was already uploaded by another user")]
    NumberConflict(String),

    #[error("invalid order: {0}")]
    Order(#[from] OrderError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("order number '{0}' fails the checksum")]
    InvalidFormat(String),

    #[error("insufficient funds for user {0}: current {1}, requested {2}")]
    InsufficientFunds(UserId, Amount, Amount),

    #[error("invalid withdrawal: {0}")]
    Withdrawal(#[from] WithdrawalError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}
