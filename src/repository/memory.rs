//! In-memory implementation of the repository contracts.
//!
//! Transactions lock the shared state, work on a copy, and publish it on
//! commit. Fault switches and call counters let tests drive failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    BalanceRepository, OrderRepository, OutboxRepository, Repositories, Result, StorageError,
    Transaction, UnitOfWork, WithdrawalRepository,
};
use crate::Amount;
use crate::model::{
    Balance, Order, OrderId, OrderStatus, OutboxEntry, OutboxId, OutboxStatus, UserId,
    Withdrawal, WithdrawalId,
};

#[derive(Debug, Clone, Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    outbox: BTreeMap<OutboxId, OutboxEntry>,
    balances: HashMap<UserId, Balance>,
    withdrawals: BTreeMap<WithdrawalId, Withdrawal>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_outbox_fetch: AtomicBool,
    fail_outbox_create: AtomicBool,
    fail_outbox_update: AtomicBool,
    fail_accrue: AtomicBool,
    fail_withdrawal_create: AtomicBool,
    accrue_calls: AtomicUsize,
    order_status_updates: AtomicUsize,
}

impl Faults {
    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{what} disabled")));
        }
        Ok(())
    }
}

/// Shared in-process store. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn repo(&self) -> MemoryRepo {
        MemoryRepo {
            state: self.state.clone(),
            faults: self.faults.clone(),
        }
    }

    pub fn repositories(&self) -> Repositories {
        let repo = Arc::new(self.repo());
        Repositories {
            orders: repo.clone(),
            outbox: repo.clone(),
            balances: repo.clone(),
            withdrawals: repo,
            uow: Arc::new(self.clone()),
        }
    }

    pub fn set_fail_on_outbox_fetch(&self, fail: bool) {
        self.faults.fail_outbox_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_outbox_create(&self, fail: bool) {
        self.faults.fail_outbox_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_outbox_update(&self, fail: bool) {
        self.faults.fail_outbox_update.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_accrue(&self, fail: bool) {
        self.faults.fail_accrue.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_on_withdrawal_create(&self, fail: bool) {
        self.faults.fail_withdrawal_create.store(fail, Ordering::SeqCst);
    }

    /// Number of balance credits attempted, committed or not.
    pub fn accrue_calls(&self) -> usize {
        self.faults.accrue_calls.load(Ordering::SeqCst)
    }

    /// Number of order status writes attempted, committed or not.
    pub fn order_status_updates(&self) -> usize {
        self.faults.order_status_updates.load(Ordering::SeqCst)
    }

    /// Committed outbox entry by id, including terminal ones.
    pub async fn outbox_entry(&self, id: OutboxId) -> Option<OutboxEntry> {
        self.state.lock().await.outbox.get(&id).cloned()
    }

    /// Committed outbox entry paired with `order_id`.
    pub async fn outbox_for_order(&self, order_id: OrderId) -> Option<OutboxEntry> {
        self.state
            .lock()
            .await
            .outbox
            .values()
            .find(|e| e.order_id == order_id)
            .cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn outbox_count(&self) -> usize {
        self.state.lock().await.outbox.len()
    }
}

#[async_trait]
impl UnitOfWork for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let committed = self.state.clone().lock_owned().await;
        let working = Arc::new(Mutex::new(committed.clone()));

        Ok(Box::new(MemoryTransaction {
            committed,
            working: working.clone(),
            repo: MemoryRepo {
                state: working,
                faults: self.faults.clone(),
            },
        }))
    }
}

/// Holds the store lock for its whole lifetime; dropping it discards the copy.
pub struct MemoryTransaction {
    committed: OwnedMutexGuard<State>,
    working: Arc<Mutex<State>>,
    repo: MemoryRepo,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn orders(&self) -> &dyn OrderRepository {
        &self.repo
    }

    fn outbox(&self) -> &dyn OutboxRepository {
        &self.repo
    }

    fn balances(&self) -> &dyn BalanceRepository {
        &self.repo
    }

    fn withdrawals(&self) -> &dyn WithdrawalRepository {
        &self.repo
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        let working = this.working.lock().await.clone();
        *this.committed = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct MemoryRepo {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

#[async_trait]
impl OrderRepository for MemoryRepo {
    async fn create(&self, order: &Order) -> Result<OrderId> {
        let mut state = self.state.lock().await;
        if state.orders.values().any(|o| o.number() == order.number()) {
            return Err(StorageError::DuplicateNumber(order.number().to_string()));
        }

        let id = state.next_id();
        let mut order = order.clone();
        order.assign_id(id);
        state.orders.insert(id, order);
        Ok(id)
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.number() == number).cloned())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.belongs_to(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| (b.uploaded_at(), b.id()).cmp(&(a.uploaded_at(), a.id())));
        Ok(orders)
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Amount>,
    ) -> Result<()> {
        self.faults.order_status_updates.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(StorageError::NotFound { entity: "order", id })?;
        if order.is_processed() {
            return Err(StorageError::AlreadyProcessed(id));
        }
        *order = Order::restore(
            order.id(),
            order.user_id(),
            order.number().to_string(),
            status,
            accrual,
            order.uploaded_at(),
        );
        Ok(())
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| matches!(o.status(), OrderStatus::New | OrderStatus::Processing))
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.uploaded_at(), o.id()));
        orders.truncate(limit);
        Ok(orders)
    }
}

impl MemoryRepo {
    async fn with_outbox(&self, id: OutboxId, f: impl FnOnce(&mut OutboxEntry) + Send) -> Result<()> {
        Faults::check(&self.faults.fail_outbox_update, "outbox update")?;

        let mut state = self.state.lock().await;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or(StorageError::NotFound { entity: "outbox", id })?;
        f(entry);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for MemoryRepo {
    async fn create(&self, entry: &OutboxEntry) -> Result<OutboxId> {
        Faults::check(&self.faults.fail_outbox_create, "outbox create")?;

        let mut state = self.state.lock().await;
        if state.outbox.values().any(|e| e.order_id == entry.order_id) {
            return Err(StorageError::Constraint(format!(
                "outbox entry for order {} already exists",
                entry.order_id
            )));
        }

        let id = state.next_id();
        state.outbox.insert(
            id,
            OutboxEntry {
                id,
                ..entry.clone()
            },
        );
        Ok(id)
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        Faults::check(&self.faults.fail_outbox_fetch, "outbox fetch")?;

        let state = self.state.lock().await;
        let mut pending: Vec<_> = state
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| (e.available_at, e.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_status(&self, id: OutboxId, status: OutboxStatus) -> Result<()> {
        self.with_outbox(id, |e| e.status = status).await
    }

    async fn increment_retries(&self, id: OutboxId) -> Result<()> {
        self.with_outbox(id, |e| e.retries += 1).await
    }

    async fn defer(&self, id: OutboxId) -> Result<()> {
        self.with_outbox(id, |e| e.available_at = Utc::now()).await
    }
}

#[async_trait]
impl BalanceRepository for MemoryRepo {
    async fn get_by_user(&self, user_id: UserId) -> Result<Balance> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Balance::new(user_id)))
    }

    async fn accrue(&self, user_id: UserId, amount: Amount) -> Result<()> {
        self.faults.accrue_calls.fetch_add(1, Ordering::SeqCst);
        Faults::check(&self.faults.fail_accrue, "accrue")?;

        let mut state = self.state.lock().await;
        state
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::new(user_id))
            .accrue(amount)?;
        Ok(())
    }

    async fn withdraw(&self, user_id: UserId, amount: Amount) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut balance = state
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Balance::new(user_id));
        balance.withdraw(amount)?;
        state.balances.insert(user_id, balance);
        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryRepo {
    async fn create(&self, withdrawal: &Withdrawal) -> Result<WithdrawalId> {
        Faults::check(&self.faults.fail_withdrawal_create, "withdrawal create")?;

        let mut state = self.state.lock().await;
        let id = state.next_id();
        let mut withdrawal = withdrawal.clone();
        withdrawal.assign_id(id);
        state.withdrawals.insert(id, withdrawal);
        Ok(id)
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let state = self.state.lock().await;
        let mut withdrawals: Vec<_> = state
            .withdrawals
            .values()
            .filter(|w| w.user_id() == user_id)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| (b.processed_at(), b.id()).cmp(&(a.processed_at(), a.id())));
        Ok(withdrawals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BalanceError;

    fn points(value: f64) -> Amount {
        Amount::from_float(value).unwrap()
    }

    #[tokio::test]
    async fn orders_round_trip() {
        let store = MemoryStore::new();
        let repos = store.repositories();

        let id = repos
            .orders
            .create(&Order::new(1, "79927398713").unwrap())
            .await
            .unwrap();
        let order = repos.orders.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.id(), id);
        assert_eq!(order.number(), "79927398713");

        let err = repos
            .orders
            .create(&Order::new(2, "79927398713").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateNumber(_)));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn pending_outbox_skips_terminal_and_rotates_deferred() {
        let store = MemoryStore::new();
        let repos = store.repositories();

        let mut ids = Vec::new();
        for number in ["79927398713", "12345678903", "4532015112830366"] {
            let order_id = repos
                .orders
                .create(&Order::new(1, number).unwrap())
                .await
                .unwrap();
            ids.push(
                repos
                    .outbox
                    .create(&OutboxEntry::pending(order_id))
                    .await
                    .unwrap(),
            );
        }

        repos
            .outbox
            .update_status(ids[1], OutboxStatus::Failed)
            .await
            .unwrap();
        repos.outbox.defer(ids[0]).await.unwrap();

        let pending: Vec<_> = repos
            .outbox
            .find_pending(10)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(pending, vec![ids[2], ids[0]]);
        assert_eq!(repos.outbox.find_pending(1).await.unwrap().len(), 1);

        // spending a retry does not move an entry back in the queue
        repos.outbox.increment_retries(ids[2]).await.unwrap();
        assert_eq!(repos.outbox.find_pending(1).await.unwrap()[0].id, ids[2]);
    }

    #[tokio::test]
    async fn withdraw_guards_funds() {
        let store = MemoryStore::new();
        let repos = store.repositories();

        repos.balances.accrue(1, points(100.0)).await.unwrap();
        let err = repos.balances.withdraw(1, points(150.0)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Balance(BalanceError::InsufficientFunds { .. })
        ));

        repos.balances.withdraw(1, points(100.0)).await.unwrap();
        let balance = repos.balances.get_by_user(1).await.unwrap();
        assert_eq!(balance.current(), Amount::ZERO);
        assert_eq!(balance.withdrawn(), points(100.0));
    }

    #[tokio::test]
    async fn transaction_commit_and_drop() {
        let store = MemoryStore::new();
        let repos = store.repositories();

        let tx = store.begin().await.unwrap();
        let order_id = tx
            .orders()
            .create(&Order::new(1, "79927398713").unwrap())
            .await
            .unwrap();
        tx.outbox()
            .create(&OutboxEntry::pending(order_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.order_count().await, 1);
        assert!(store.outbox_for_order(order_id).await.is_some());

        {
            let tx = store.begin().await.unwrap();
            tx.orders()
                .create(&Order::new(1, "12345678903").unwrap())
                .await
                .unwrap();
            tx.balances().accrue(1, points(5.0)).await.unwrap();
        }
        assert_eq!(store.order_count().await, 1);
        assert_eq!(
            repos.balances.get_by_user(1).await.unwrap(),
            Balance::new(1)
        );
    }

    #[tokio::test]
    async fn fault_switches() {
        let store = MemoryStore::new();
        let repos = store.repositories();

        store.set_fail_on_outbox_fetch(true);
        assert!(matches!(
            repos.outbox.find_pending(10).await,
            Err(StorageError::Unavailable(_))
        ));
        store.set_fail_on_outbox_fetch(false);
        assert!(repos.outbox.find_pending(10).await.unwrap().is_empty());

        store.set_fail_on_accrue(true);
        assert!(repos.balances.accrue(1, points(1.0)).await.is_err());
        assert_eq!(store.accrue_calls(), 1);
    }
}
