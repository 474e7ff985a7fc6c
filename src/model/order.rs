use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{OrderError, OrderId, UserId};
use crate::Amount;

/// Lifecycle of a submitted order. `Processed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Whether the oracle has given its final word on the order.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// A purchase receipt submitted for accrual.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    number: String,
    status: OrderStatus,
    accrual: Option<Amount>,
    uploaded_at: DateTime<Utc>,
}

impl Order {
    /// Create a fresh `NEW` order. The id stays 0 until storage assigns one.
    pub fn new(user_id: UserId, number: impl Into<String>) -> Result<Self, OrderError> {
        if user_id <= 0 {
            return Err(OrderError::InvalidUserId(user_id));
        }
        let number = number.into();
        if number.is_empty() {
            return Err(OrderError::MissingNumber);
        }

        Ok(Self {
            id: 0,
            user_id,
            number,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        })
    }

    /// Rebuild an order from persisted fields, without validation.
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        number: String,
        status: OrderStatus,
        accrual: Option<Amount>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            number,
            status,
            accrual,
            uploaded_at,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn accrual(&self) -> Option<Amount> {
        self.accrual
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.uploaded_at
    }

    pub fn assign_id(&mut self, id: OrderId) {
        self.id = id;
    }

    pub fn is_processed(&self) -> bool {
        self.status == OrderStatus::Processed
    }

    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Move the order to `status`, validating the transition first.
    ///
    /// On error the order is left untouched.
    pub fn update_status(
        &mut self,
        status: OrderStatus,
        accrual: Option<Amount>,
    ) -> Result<(), OrderError> {
        if self.is_processed() {
            return Err(OrderError::TerminalState {
                current: self.status,
                requested: status,
            });
        }

        match (status, accrual) {
            (OrderStatus::Processed, Some(amount)) if amount.is_negative() => {
                return Err(OrderError::NegativeAccrual(amount));
            }
            (OrderStatus::Invalid, Some(amount)) => {
                return Err(OrderError::InvalidCarriesAccrual(amount));
            }
            _ => {}
        }

        self.status = status;
        self.accrual = accrual;
        Ok(())
    }
}
