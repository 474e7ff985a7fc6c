use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::{OrderId, OutboxId};

/// State of a reconciliation work item. `Processed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSED" => Ok(OutboxStatus::Processed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status '{other}'")),
        }
    }
}

/// Work-queue row paired 1:1 with an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub order_id: OrderId,
    pub status: OutboxStatus,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Queue position. Starts at `created_at`; only a deferral moves it.
    pub available_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// A fresh `PENDING` entry for `order_id` with no retries spent.
    pub fn pending(order_id: OrderId) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            order_id,
            status: OutboxStatus::Pending,
            retries: 0,
            created_at: now,
            updated_at: now,
            available_at: now,
        }
    }

    /// Whether one more failure should mark this entry `FAILED`.
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }
}
