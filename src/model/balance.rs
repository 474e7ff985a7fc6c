use super::{BalanceError, UserId};
use crate::Amount;

/// A user's point ledger: what can still be spent and what was spent so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    user_id: UserId,
    current: Amount,
    withdrawn: Amount,
}

impl Balance {
    /// A zero-valued balance, as seen for users that never earned points.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            current: Amount::ZERO,
            withdrawn: Amount::ZERO,
        }
    }

    pub fn restore(user_id: UserId, current: Amount, withdrawn: Amount) -> Self {
        Self {
            user_id,
            current,
            withdrawn,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn current(&self) -> Amount {
        self.current
    }

    pub fn withdrawn(&self) -> Amount {
        self.withdrawn
    }

    /// Whether a positive `amount` is covered by the spendable balance.
    pub fn can_withdraw(&self, amount: Amount) -> bool {
        amount.is_positive() && self.current >= amount
    }

    /// Credit `amount` to the spendable balance.
    pub fn accrue(&mut self, amount: Amount) -> Result<(), BalanceError> {
        if !amount.is_positive() {
            return Err(BalanceError::NonPositiveAccrual(amount));
        }
        self.current = self
            .current
            .checked_add(amount)
            .ok_or(BalanceError::Overflow {
                user: self.user_id,
                current: self.current,
                amount,
            })?;
        Ok(())
    }

    /// Move `amount` from the spendable balance to the withdrawn total.
    pub fn withdraw(&mut self, amount: Amount) -> Result<(), BalanceError> {
        if !amount.is_positive() {
            return Err(BalanceError::NonPositiveWithdrawal(amount));
        }
        if !self.can_withdraw(amount) {
            return Err(BalanceError::InsufficientFunds {
                user: self.user_id,
                current: self.current,
                requested: amount,
            });
        }
        let withdrawn = self
            .withdrawn
            .checked_add(amount)
            .ok_or(BalanceError::Overflow {
                user: self.user_id,
                current: self.withdrawn,
                amount,
            })?;
        self.current = self
            .current
            .checked_sub(amount)
            .ok_or(BalanceError::InsufficientFunds {
                user: self.user_id,
                current: self.current,
                requested: amount,
            })?;
        self.withdrawn = withdrawn;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(value: f64) -> Amount {
        Amount::from_float(value).unwrap()
    }

    #[test]
    fn new_balance_is_zero() {
        let balance = Balance::new(123);
        assert_eq!(balance.user_id(), 123);
        assert_eq!(balance.current(), Amount::ZERO);
        assert_eq!(balance.withdrawn(), Amount::ZERO);
    }

    #[test]
    fn accrue_accumulates() {
        let mut balance = Balance::new(1);
        balance.accrue(points(100.0)).unwrap();
        balance.accrue(points(50.5)).unwrap();
        assert_eq!(balance.current(), points(150.5));
    }

    #[test]
    fn accrue_rejects_non_positive() {
        let mut balance = Balance::restore(1, points(150.5), Amount::ZERO);
        assert_eq!(
            balance.accrue(Amount::ZERO),
            Err(BalanceError::NonPositiveAccrual(Amount::ZERO))
        );
        assert!(balance.accrue(points(-10.0)).is_err());
        assert_eq!(balance.current(), points(150.5));
    }

    #[test]
    fn accrue_refuses_to_overflow() {
        let near_max = Amount::from_scaled(i64::MAX - 10);
        let mut balance = Balance::restore(1, near_max, Amount::ZERO);
        let err = balance.accrue(Amount::from_scaled(11)).unwrap_err();
        assert!(matches!(err, BalanceError::Overflow { user: 1, .. }));
        assert_eq!(balance.current(), near_max);

        balance.accrue(Amount::from_scaled(10)).unwrap();
        assert_eq!(balance.current(), Amount::from_scaled(i64::MAX));
    }

    #[test]
    fn withdraw_moves_points() {
        let mut balance = Balance::restore(1, points(100.0), Amount::ZERO);
        balance.withdraw(points(100.0)).unwrap();
        assert_eq!(balance.current(), Amount::ZERO);
        assert_eq!(balance.withdrawn(), points(100.0));
    }

    #[test]
    fn withdraw_insufficient_funds_leaves_balance_unchanged() {
        let mut balance = Balance::restore(1, points(100.0), points(5.0));
        let err = balance.withdraw(points(150.0)).unwrap_err();
        assert_eq!(
            err,
            BalanceError::InsufficientFunds {
                user: 1,
                current: points(100.0),
                requested: points(150.0),
            }
        );
        assert_eq!(balance.current(), points(100.0));
        assert_eq!(balance.withdrawn(), points(5.0));
    }

    #[test]
    fn withdraw_rejects_non_positive() {
        let mut balance = Balance::restore(1, points(100.0), Amount::ZERO);
        assert!(balance.withdraw(Amount::ZERO).is_err());
        assert!(balance.withdraw(points(-10.0)).is_err());
        assert_eq!(balance.current(), points(100.0));
    }

    #[test]
    fn can_withdraw() {
        let balance = Balance::restore(1, points(100.0), Amount::ZERO);
        assert!(balance.can_withdraw(points(50.0)));
        assert!(balance.can_withdraw(points(100.0)));
        assert!(!balance.can_withdraw(points(100.0001)));
        assert!(!balance.can_withdraw(Amount::ZERO));
        assert!(!balance.can_withdraw(points(-10.0)));
    }
}
