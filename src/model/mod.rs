//! Ledger entities and the invariants they enforce in memory.

mod balance;
mod error;
mod order;
mod outbox;
mod withdrawal;

pub use balance::Balance;
pub use error::{BalanceError, OrderError, WithdrawalError};
pub use order::{Order, OrderStatus};
pub use outbox::{OutboxEntry, OutboxStatus};
pub use withdrawal::Withdrawal;

pub type UserId = i64;
pub type OrderId = i64;
pub type OutboxId = i64;
pub type WithdrawalId = i64;
