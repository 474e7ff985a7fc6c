use std::sync::Arc;

use tracing::info;

use super::WithdrawError;
use crate::Amount;
use crate::luhn;
use crate::model::{BalanceError, UserId, Withdrawal};
use crate::repository::{BalanceRepository, Repositories, StorageError, UnitOfWork};

/// Spends points against an order number, recording the withdrawal and
/// debiting the balance atomically.
pub struct Withdraw {
    balances: Arc<dyn BalanceRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl Withdraw {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            balances: repos.balances.clone(),
            uow: repos.uow.clone(),
        }
    }

    pub async fn execute(
        &self,
        user_id: UserId,
        order_number: &str,
        sum: Amount,
    ) -> Result<Withdrawal, WithdrawError> {
        if !luhn::validate(order_number) {
            return Err(WithdrawError::InvalidFormat(order_number.to_string()));
        }

        let balance = self.balances.get_by_user(user_id).await?;
        // non-positive sums are rejected when the withdrawal is built
        if sum.is_positive() && !balance.can_withdraw(sum) {
            return Err(WithdrawError::InsufficientFunds(
                user_id,
                balance.current(),
                sum,
            ));
        }

        let tx = self.uow.begin().await?;

        let mut withdrawal = Withdrawal::new(user_id, order_number, sum)?;
        let id = tx.withdrawals().create(&withdrawal).await?;
        withdrawal.assign_id(id);

        // the balance may have moved since it was read
        match tx.balances().withdraw(user_id, sum).await {
            Err(StorageError::Balance(BalanceError::InsufficientFunds {
                user,
                current,
                requested,
            })) => return Err(WithdrawError::InsufficientFunds(user, current, requested)),
            other => other?,
        }

        tx.commit().await?;

        info!(user_id, order = order_number, sum = %sum, "withdrawal recorded");
        Ok(withdrawal)
    }
}
