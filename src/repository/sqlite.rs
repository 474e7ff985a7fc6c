//! SQLite implementation of the repository contracts.
//!
//! One repository type per aggregate works against either the pool
//! (autocommit) or a shared transaction handle, so the same queries back both
//! plain reads and [`UnitOfWork`] scopes.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    BalanceRepository, OrderRepository, OutboxRepository, Repositories, Result, StorageError,
    Transaction, UnitOfWork, WithdrawalRepository,
};
use crate::Amount;
use crate::model::{
    Balance, BalanceError, Order, OrderId, OrderStatus, OutboxEntry, OutboxId, OutboxStatus,
    UserId, Withdrawal, WithdrawalId,
};

type SharedTx = Arc<Mutex<Option<sqlx::Transaction<'static, Sqlite>>>>;

/// Pool-backed store. Cheap to clone.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `uri` and apply migrations.
    pub async fn connect(uri: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(uri)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database, alive as long as the store is.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // every connection would otherwise get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("sqlite migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn orders(&self) -> SqliteOrders {
        SqliteOrders {
            handle: Handle::Pool(self.pool.clone()),
        }
    }

    pub fn outbox(&self) -> SqliteOutbox {
        SqliteOutbox {
            handle: Handle::Pool(self.pool.clone()),
        }
    }

    pub fn balances(&self) -> SqliteBalances {
        SqliteBalances {
            handle: Handle::Pool(self.pool.clone()),
        }
    }

    pub fn withdrawals(&self) -> SqliteWithdrawals {
        SqliteWithdrawals {
            handle: Handle::Pool(self.pool.clone()),
        }
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            orders: Arc::new(self.orders()),
            outbox: Arc::new(self.outbox()),
            balances: Arc::new(self.balances()),
            withdrawals: Arc::new(self.withdrawals()),
            uow: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl UnitOfWork for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx: SharedTx = Arc::new(Mutex::new(Some(self.pool.begin().await?)));
        let handle = Handle::Tx(tx.clone());

        Ok(Box::new(SqliteTransaction {
            tx,
            orders: SqliteOrders {
                handle: handle.clone(),
            },
            outbox: SqliteOutbox {
                handle: handle.clone(),
            },
            balances: SqliteBalances {
                handle: handle.clone(),
            },
            withdrawals: SqliteWithdrawals { handle },
        }))
    }
}

/// Transaction scope. The underlying sqlx transaction rolls back on drop.
pub struct SqliteTransaction {
    tx: SharedTx,
    orders: SqliteOrders,
    outbox: SqliteOutbox,
    balances: SqliteBalances,
    withdrawals: SqliteWithdrawals,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    fn orders(&self) -> &dyn OrderRepository {
        &self.orders
    }

    fn outbox(&self) -> &dyn OutboxRepository {
        &self.outbox
    }

    fn balances(&self) -> &dyn BalanceRepository {
        &self.balances
    }

    fn withdrawals(&self) -> &dyn WithdrawalRepository {
        &self.withdrawals
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(StorageError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(StorageError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}

#[derive(Clone)]
enum Handle {
    Pool(SqlitePool),
    Tx(SharedTx),
}

impl Handle {
    async fn conn(&self) -> Result<Conn<'_>> {
        match self {
            Handle::Pool(pool) => Ok(Conn::Pooled(pool.acquire().await?)),
            Handle::Tx(tx) => Ok(Conn::Tx(tx.lock().await)),
        }
    }
}

enum Conn<'a> {
    Pooled(PoolConnection<Sqlite>),
    Tx(MutexGuard<'a, Option<sqlx::Transaction<'static, Sqlite>>>),
}

impl Conn<'_> {
    fn get(&mut self) -> Result<&mut SqliteConnection> {
        match self {
            Conn::Pooled(conn) => Ok(&mut **conn),
            Conn::Tx(guard) => guard
                .as_deref_mut()
                .ok_or(StorageError::TransactionClosed),
        }
    }
}

fn duplicate_number(err: sqlx::Error, number: &str) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::DuplicateNumber(number.to_string())
        }
        _ => StorageError::Database(err),
    }
}

fn parse_status<T: FromStr<Err = String>>(row: &SqliteRow) -> Result<T> {
    let raw: String = row.try_get("status")?;
    raw.parse().map_err(StorageError::Corrupt)
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    Ok(Order::restore(
        row.try_get("id")?,
        row.try_get("user_id")?,
        row.try_get("number")?,
        parse_status::<OrderStatus>(row)?,
        row.try_get::<Option<i64>, _>("accrual")?
            .map(Amount::from_scaled),
        row.try_get("uploaded_at")?,
    ))
}

fn outbox_from_row(row: &SqliteRow) -> Result<OutboxEntry> {
    let id: OutboxId = row.try_get("id")?;
    let retries: i64 = row.try_get("retries")?;
    let retries = u32::try_from(retries)
        .map_err(|_| StorageError::Corrupt(format!("outbox {id} has retries {retries}")))?;

    Ok(OutboxEntry {
        id,
        order_id: row.try_get("order_id")?,
        status: parse_status::<OutboxStatus>(row)?,
        retries,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        available_at: row.try_get("available_at")?,
    })
}

fn withdrawal_from_row(row: &SqliteRow) -> Result<Withdrawal> {
    Ok(Withdrawal::restore(
        row.try_get("id")?,
        row.try_get("user_id")?,
        row.try_get("order_number")?,
        Amount::from_scaled(row.try_get("sum")?),
        row.try_get("processed_at")?,
    ))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// Orders

pub struct SqliteOrders {
    handle: Handle,
}

const ORDER_COLUMNS: &str = "id, user_id, number, status, accrual, uploaded_at";

#[async_trait]
impl OrderRepository for SqliteOrders {
    async fn create(&self, order: &Order) -> Result<OrderId> {
        let mut conn = self.handle.conn().await?;
        let row = sqlx::query(
            "INSERT INTO orders (user_id, number, status, accrual, uploaded_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(order.user_id())
        .bind(order.number())
        .bind(order.status().as_str())
        .bind(order.accrual().map(Amount::scaled))
        .bind(order.uploaded_at())
        .fetch_one(conn.get()?)
        .await
        .map_err(|e| duplicate_number(e, order.number()))?;

        Ok(row.try_get("id")?)
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<Order>> {
        let mut conn = self.handle.conn().await?;
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE number = ?"
        ))
        .bind(number)
        .fetch_optional(conn.get()?)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.handle.conn().await?;
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn.get()?)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.handle.conn().await?;
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?
             ORDER BY uploaded_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(conn.get()?)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Amount>,
    ) -> Result<()> {
        let mut conn = self.handle.conn().await?;
        let result = sqlx::query(
            "UPDATE orders SET status = ?, accrual = ? WHERE id = ? AND status <> 'PROCESSED'",
        )
        .bind(status.as_str())
        .bind(accrual.map(Amount::scaled))
        .bind(id)
        .execute(conn.get()?)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = ?)")
                .bind(id)
                .fetch_one(conn.get()?)
                .await?;
            return Err(if exists {
                StorageError::AlreadyProcessed(id)
            } else {
                StorageError::NotFound { entity: "order", id }
            });
        }
        Ok(())
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let mut conn = self.handle.conn().await?;
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status IN ('NEW', 'PROCESSING')
             ORDER BY uploaded_at, id LIMIT ?"
        ))
        .bind(limit_param(limit))
        .fetch_all(conn.get()?)
        .await?;

        rows.iter().map(order_from_row).collect()
    }
}

// Outbox

pub struct SqliteOutbox {
    handle: Handle,
}

impl SqliteOutbox {
    /// Run `UPDATE outbox SET {set}updated_at = now`, binding `status` first if given.
    async fn touch(&self, id: OutboxId, set: &str, status: Option<OutboxStatus>) -> Result<()> {
        let mut conn = self.handle.conn().await?;
        let sql = format!("UPDATE outbox SET {set}updated_at = ? WHERE id = ?");
        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let result = query
            .bind(Utc::now())
            .bind(id)
            .execute(conn.get()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound { entity: "outbox", id });
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutbox {
    async fn create(&self, entry: &OutboxEntry) -> Result<OutboxId> {
        let mut conn = self.handle.conn().await?;
        let row = sqlx::query(
            "INSERT INTO outbox (order_id, status, retries, created_at, updated_at, available_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(entry.order_id)
        .bind(entry.status.as_str())
        .bind(i64::from(entry.retries))
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.available_at)
        .fetch_one(conn.get()?)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let mut conn = self.handle.conn().await?;
        let rows = sqlx::query(
            "SELECT id, order_id, status, retries, created_at, updated_at, available_at
             FROM outbox WHERE status = 'PENDING'
             ORDER BY available_at, id LIMIT ?",
        )
        .bind(limit_param(limit))
        .fetch_all(conn.get()?)
        .await?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn update_status(&self, id: OutboxId, status: OutboxStatus) -> Result<()> {
        self.touch(id, "status = ?, ", Some(status)).await
    }

    async fn increment_retries(&self, id: OutboxId) -> Result<()> {
        self.touch(id, "retries = retries + 1, ", None).await
    }

    async fn defer(&self, id: OutboxId) -> Result<()> {
        let mut conn = self.handle.conn().await?;
        let now = Utc::now();
        let result = sqlx::query("UPDATE outbox SET available_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(conn.get()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound { entity: "outbox", id });
        }
        Ok(())
    }
}

// Balances

pub struct SqliteBalances {
    handle: Handle,
}

#[async_trait]
impl BalanceRepository for SqliteBalances {
    async fn get_by_user(&self, user_id: UserId) -> Result<Balance> {
        let mut conn = self.handle.conn().await?;
        let row = sqlx::query("SELECT current, withdrawn FROM balances WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(conn.get()?)
            .await?;

        match row {
            Some(row) => Ok(Balance::restore(
                user_id,
                Amount::from_scaled(row.try_get("current")?),
                Amount::from_scaled(row.try_get("withdrawn")?),
            )),
            None => Ok(Balance::new(user_id)),
        }
    }

    async fn accrue(&self, user_id: UserId, amount: Amount) -> Result<()> {
        if !amount.is_positive() {
            return Err(BalanceError::NonPositiveAccrual(amount).into());
        }

        let mut conn = self.handle.conn().await?;
        let result = sqlx::query(
            "INSERT INTO balances (user_id, current, withdrawn) VALUES (?, ?, 0)
             ON CONFLICT (user_id) DO UPDATE SET current = current + excluded.current
             WHERE balances.current <= ? - excluded.current",
        )
        .bind(user_id)
        .bind(amount.scaled())
        .bind(i64::MAX)
        .execute(conn.get()?)
        .await?;

        if result.rows_affected() == 0 {
            let current: i64 = sqlx::query_scalar("SELECT current FROM balances WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(conn.get()?)
                .await?;
            return Err(BalanceError::Overflow {
                user: user_id,
                current: Amount::from_scaled(current),
                amount,
            }
            .into());
        }
        Ok(())
    }

    async fn withdraw(&self, user_id: UserId, amount: Amount) -> Result<()> {
        if !amount.is_positive() {
            return Err(BalanceError::NonPositiveWithdrawal(amount).into());
        }

        let mut conn = self.handle.conn().await?;
        let result = sqlx::query(
            "UPDATE balances SET current = current - ?, withdrawn = withdrawn + ?
             WHERE user_id = ? AND current >= ? AND withdrawn <= ?",
        )
        .bind(amount.scaled())
        .bind(amount.scaled())
        .bind(user_id)
        .bind(amount.scaled())
        .bind(i64::MAX - amount.scaled())
        .execute(conn.get()?)
        .await?;

        if result.rows_affected() == 0 {
            let row = sqlx::query("SELECT current, withdrawn FROM balances WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(conn.get()?)
                .await?;
            let (current, withdrawn) = match row {
                Some(row) => (row.try_get("current")?, row.try_get("withdrawn")?),
                None => (0, 0),
            };
            let current = Amount::from_scaled(current);
            if current >= amount {
                return Err(BalanceError::Overflow {
                    user: user_id,
                    current: Amount::from_scaled(withdrawn),
                    amount,
                }
                .into());
            }
            return Err(BalanceError::InsufficientFunds {
                user: user_id,
                current,
                requested: amount,
            }
            .into());
        }
        Ok(())
    }
}

// Withdrawals

pub struct SqliteWithdrawals {
    handle: Handle,
}

#[async_trait]
impl WithdrawalRepository for SqliteWithdrawals {
    async fn create(&self, withdrawal: &Withdrawal) -> Result<WithdrawalId> {
        let mut conn = self.handle.conn().await?;
        let row = sqlx::query(
            "INSERT INTO withdrawals (user_id, order_number, sum, processed_at)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(withdrawal.user_id())
        .bind(withdrawal.order_number())
        .bind(withdrawal.sum().scaled())
        .bind(withdrawal.processed_at())
        .fetch_one(conn.get()?)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let mut conn = self.handle.conn().await?;
        let rows = sqlx::query(
            "SELECT id, user_id, order_number, sum, processed_at
             FROM withdrawals WHERE user_id = ?
             ORDER BY processed_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(conn.get()?)
        .await?;

        rows.iter().map(withdrawal_from_row).collect()
    }
}
