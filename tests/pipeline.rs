use std::sync::Arc;

use httpmock::prelude::*;
use loyalty_points::Amount;
use loyalty_points::accrual::{AccrualClientConfig, HttpAccrualClient};
use loyalty_points::model::OrderStatus;
use loyalty_points::reconcile::{Dispatcher, ReconcileConfig};
use loyalty_points::repository::{OutboxRepository, SqliteStore};
use loyalty_points::usecase::{AccountQueries, UploadOrder, UploadStatus, Withdraw, WithdrawError};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn dispatcher_for(store: &SqliteStore, server: &MockServer) -> Dispatcher {
    let client = HttpAccrualClient::new(AccrualClientConfig::new(server.base_url())).unwrap();
    Dispatcher::new(
        &store.repositories(),
        Arc::new(client),
        ReconcileConfig::default(),
    )
}

#[tokio::test]
async fn upload_reconcile_withdraw() {
    let store = SqliteStore::in_memory().await.unwrap();
    let repos = store.repositories();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/79927398713");
            then.status(200).json_body(json!({
                "order": "79927398713",
                "status": "PROCESSED",
                "accrual": 100.5
            }));
        })
        .await;

    let status = UploadOrder::new(&repos)
        .execute(1, "79927398713")
        .await
        .unwrap();
    assert_eq!(status, UploadStatus::Accepted);

    let report = dispatcher_for(&store, &server)
        .process_pending_orders(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.completed, 1);
    mock.assert_async().await;

    let queries = AccountQueries::new(&repos);
    let balance = queries.balance(1).await.unwrap();
    assert_eq!(balance.current(), Amount::from_float(100.5).unwrap());
    assert_eq!(balance.withdrawn(), Amount::ZERO);

    let orders = queries.orders(1).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status(), OrderStatus::Processed);
    assert_eq!(orders[0].accrual(), Some(Amount::from_float(100.5).unwrap()));

    Withdraw::new(&repos)
        .execute(1, "12345678903", Amount::from_float(50.0).unwrap())
        .await
        .unwrap();

    let balance = queries.balance(1).await.unwrap();
    assert_eq!(balance.current(), Amount::from_float(50.5).unwrap());
    assert_eq!(balance.withdrawn(), Amount::from_float(50.0).unwrap());

    let withdrawals = queries.withdrawals(1).await.unwrap();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].order_number(), "12345678903");

    let err = Withdraw::new(&repos)
        .execute(1, "12345678903", Amount::from_float(60.0).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawError::InsufficientFunds(1, _, _)));

    // a second tick finds nothing left to do
    let report = dispatcher_for(&store, &server)
        .process_pending_orders(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.fetched, 0);
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn processing_defers_then_invalid_completes_without_credit() {
    let store = SqliteStore::in_memory().await.unwrap();
    let repos = store.repositories();
    let server = MockServer::start_async().await;

    UploadOrder::new(&repos)
        .execute(7, "79927398713")
        .await
        .unwrap();

    let mut processing = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/79927398713");
            then.status(200).json_body(json!({
                "order": "79927398713",
                "status": "PROCESSING"
            }));
        })
        .await;

    let report = dispatcher_for(&store, &server)
        .process_pending_orders(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.deferred, 1);

    let pending = store.outbox().find_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retries, 0);
    processing.delete_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/79927398713");
            then.status(200).json_body(json!({
                "order": "79927398713",
                "status": "INVALID"
            }));
        })
        .await;

    let report = dispatcher_for(&store, &server)
        .process_pending_orders(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.completed, 1);

    let queries = AccountQueries::new(&repos);
    let orders = queries.orders(7).await.unwrap();
    assert_eq!(orders[0].status(), OrderStatus::Invalid);
    assert_eq!(queries.balance(7).await.unwrap().current(), Amount::ZERO);
    assert!(store.outbox().find_pending(10).await.unwrap().is_empty());
}
