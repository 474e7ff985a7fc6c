use std::sync::Arc;

use tracing::{debug, info};

use super::UploadError;
use crate::luhn;
use crate::model::{Order, OrderId, OutboxEntry, UserId};
use crate::repository::{OrderRepository, Repositories, StorageError, UnitOfWork};

/// Outcome of a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// New order queued for reconciliation.
    Accepted,
    /// The same user already uploaded this number.
    AlreadyUploaded,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Accepted => "accepted",
            UploadStatus::AlreadyUploaded => "already_uploaded",
        }
    }
}

/// Validates an order number and stores the order together with its outbox
/// entry in one transaction.
pub struct UploadOrder {
    orders: Arc<dyn OrderRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl UploadOrder {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            orders: repos.orders.clone(),
            uow: repos.uow.clone(),
        }
    }

    pub async fn execute(&self, user_id: UserId, number: &str) -> Result<UploadStatus, UploadError> {
        if !luhn::validate(number) {
            return Err(UploadError::InvalidFormat(number.to_string()));
        }

        if let Some(existing) = self.orders.find_by_number(number).await? {
            return classify(&existing, user_id);
        }

        match self.create(user_id, number).await {
            Ok(order_id) => {
                info!(user_id, order_id, number, "order accepted");
                Ok(UploadStatus::Accepted)
            }
            Err(UploadError::Storage(StorageError::DuplicateNumber(_))) => {
                // lost a race against a concurrent upload of the same number
                debug!(user_id, number, "order created concurrently");
                match self.orders.find_by_number(number).await? {
                    Some(existing) => classify(&existing, user_id),
                    None => Err(StorageError::DuplicateNumber(number.to_string()).into()),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn create(&self, user_id: UserId, number: &str) -> Result<OrderId, UploadError> {
        let tx = self.uow.begin().await?;

        let order = Order::new(user_id, number)?;
        let order_id = tx.orders().create(&order).await?;
        tx.outbox().create(&OutboxEntry::pending(order_id)).await?;

        tx.commit().await?;
        Ok(order_id)
    }
}

fn classify(existing: &Order, user_id: UserId) -> Result<UploadStatus, UploadError> {
    if existing.belongs_to(user_id) {
        Ok(UploadStatus::AlreadyUploaded)
    } else {
        Err(UploadError::NumberConflict(existing.number().to_string()))
    }
}
