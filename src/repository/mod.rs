//! Persistence contracts for the ledger and the unit of work spanning them.
//!
//! Implementations:
//! - [`SqliteStore`]: sqlx-backed storage with embedded migrations
//! - [`MemoryStore`]: in-process store for tests and benchmarks

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::Amount;
use crate::model::{
    Balance, BalanceError, Order, OrderId, OrderStatus, OutboxEntry, OutboxId, OutboxStatus,
    UserId, Withdrawal, WithdrawalId,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors surfaced by repository implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("order number {0} already exists")]
    DuplicateNumber(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("order {0} is already processed")]
    AlreadyProcessed(OrderId),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order and return its assigned id.
    async fn create(&self, order: &Order) -> Result<OrderId>;

    async fn find_by_number(&self, number: &str) -> Result<Option<Order>>;

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// All orders of a user, newest upload first.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Amount>,
    ) -> Result<()>;

    /// Orders still awaiting a final verdict (`NEW`, `PROCESSING`), oldest upload first.
    async fn find_pending(&self, limit: usize) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn create(&self, entry: &OutboxEntry) -> Result<OutboxId>;

    /// `PENDING` entries, oldest first. Retries keep an entry's place; deferral
    /// moves it behind the rest.
    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    async fn update_status(&self, id: OutboxId, status: OutboxStatus) -> Result<()>;

    async fn increment_retries(&self, id: OutboxId) -> Result<()>;

    /// Move the entry's queue position (`available_at`) to now.
    async fn defer(&self, id: OutboxId) -> Result<()>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Zero-valued when the user has no balance row yet.
    async fn get_by_user(&self, user_id: UserId) -> Result<Balance>;

    async fn accrue(&self, user_id: UserId, amount: Amount) -> Result<()>;

    /// Fails with [`BalanceError::InsufficientFunds`] instead of going negative.
    async fn withdraw(&self, user_id: UserId, amount: Amount) -> Result<()>;
}

#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    async fn create(&self, withdrawal: &Withdrawal) -> Result<WithdrawalId>;

    /// All withdrawals of a user, newest first.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>>;
}

/// Repository handles bound to one atomic transaction.
///
/// Dropping a transaction without calling [`commit`](Transaction::commit)
/// rolls it back.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn orders(&self) -> &dyn OrderRepository;
    fn outbox(&self) -> &dyn OutboxRepository;
    fn balances(&self) -> &dyn BalanceRepository;
    fn withdrawals(&self) -> &dyn WithdrawalRepository;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Autocommit repository handles plus the unit of work, as wired at startup.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub balances: Arc<dyn BalanceRepository>,
    pub withdrawals: Arc<dyn WithdrawalRepository>,
    pub uow: Arc<dyn UnitOfWork>,
}
