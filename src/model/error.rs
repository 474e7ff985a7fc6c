//! Invariant violations raised by the ledger entities.

use thiserror::Error;

use super::{OrderStatus, UserId};
use crate::Amount;

/// Error constructing or transitioning an [`Order`](super::Order).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("invalid user id {0}")]
    InvalidUserId(UserId),

    #[error("order number is missing")]
    MissingNumber,

    #[error("order is already {current}, cannot move to {requested}")]
    TerminalState {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("accrual must not be negative, got {0}")]
    NegativeAccrual(Amount),

    #[error("an INVALID order cannot carry an accrual ({0})")]
    InvalidCarriesAccrual(Amount),
}

/// Error applying an operation to a [`Balance`](super::Balance).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("accrual amount must be positive, got {0}")]
    NonPositiveAccrual(Amount),

    #[error("withdrawal amount must be positive, got {0}")]
    NonPositiveWithdrawal(Amount),

    #[error("insufficient funds for user {user}: current {current}, requested {requested}")]
    InsufficientFunds {
        user: UserId,
        current: Amount,
        requested: Amount,
    },

    #[error("balance of user {user} would overflow: current {current}, adding {amount}")]
    Overflow {
        user: UserId,
        current: Amount,
        amount: Amount,
    },
}

/// Error constructing a [`Withdrawal`](super::Withdrawal).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WithdrawalError {
    #[error("invalid user id {0}")]
    InvalidUserId(UserId),

    #[error("order number is missing")]
    MissingOrderNumber,

    #[error("withdrawal sum must be positive, got {0}")]
    NonPositiveSum(Amount),
}
