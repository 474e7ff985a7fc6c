use std::sync::Arc;

use crate::model::{Balance, Order, UserId, Withdrawal};
use crate::repository::{
    BalanceRepository, OrderRepository, Repositories, Result, WithdrawalRepository,
};

/// Read side of a user's account.
pub struct AccountQueries {
    orders: Arc<dyn OrderRepository>,
    balances: Arc<dyn BalanceRepository>,
    withdrawals: Arc<dyn WithdrawalRepository>,
}

impl AccountQueries {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            orders: repos.orders.clone(),
            balances: repos.balances.clone(),
            withdrawals: repos.withdrawals.clone(),
        }
    }

    /// Uploaded orders, newest first.
    pub async fn orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.orders.find_by_user(user_id).await
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Balance> {
        self.balances.get_by_user(user_id).await
    }

    /// Withdrawals, newest first.
    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        self.withdrawals.find_by_user(user_id).await
    }
}
