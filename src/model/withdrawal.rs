use chrono::{DateTime, Utc};

use super::{UserId, WithdrawalError, WithdrawalId};
use crate::Amount;

/// Points spent against an order number (which may live outside this system).
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    id: WithdrawalId,
    user_id: UserId,
    order_number: String,
    sum: Amount,
    processed_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn new(
        user_id: UserId,
        order_number: impl Into<String>,
        sum: Amount,
    ) -> Result<Self, WithdrawalError> {
        if user_id <= 0 {
            return Err(WithdrawalError::InvalidUserId(user_id));
        }
        let order_number = order_number.into();
        if order_number.is_empty() {
            return Err(WithdrawalError::MissingOrderNumber);
        }
        if !sum.is_positive() {
            return Err(WithdrawalError::NonPositiveSum(sum));
        }

        Ok(Self {
            id: 0,
            user_id,
            order_number,
            sum,
            processed_at: Utc::now(),
        })
    }

    pub fn restore(
        id: WithdrawalId,
        user_id: UserId,
        order_number: String,
        sum: Amount,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            order_number,
            sum,
            processed_at,
        }
    }

    pub fn id(&self) -> WithdrawalId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn sum(&self) -> Amount {
        self.sum
    }

    pub fn processed_at(&self) -> DateTime<Utc> {
        self.processed_at
    }

    pub fn assign_id(&mut self, id: WithdrawalId) {
        self.id = id;
    }
}
