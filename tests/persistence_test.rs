#![cfg(feature = "storage-rocksdb")]

mod common;

use common::*;
use gatewaypay::application::requests::FollowOnRequest;
use gatewaypay::domain::transaction::{TransactionId, TransactionStatus};
use gatewaypay::infrastructure::rocksdb::RocksDBStore;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn harness_at(path: &Path) -> Harness {
    let store = RocksDBStore::open(path).unwrap();
    Harness::with_stores(Arc::new(store.clone()), Arc::new(store))
}

#[tokio::test]
async fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // First run: a saved card and an open authorization.
    let (first_sale, method_id) = {
        let h = harness_at(&db_path);
        let mut request = card("sale-1", dec!(25));
        request.save_method = true;
        let outcome = h.engine.sale(&customer(), request).await.unwrap();
        h.engine.authorize(&merchant(), card("auth-1", dec!(100))).await.unwrap();
        let id = outcome.receipt().payment_method_id.clone().unwrap();
        (outcome, id)
    };

    // Second run against the same path.
    let h = harness_at(&db_path);

    let mut replay_request = card("sale-1", dec!(25));
    replay_request.save_method = true;
    let replay = h.engine.sale(&customer(), replay_request).await.unwrap();
    assert_eq!(replay, first_sale);
    assert_eq!(h.gateway.call_count(), 0);

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].id, method_id);
    assert!(methods[0].is_default);

    let capture = h
        .engine
        .capture(&merchant(), FollowOnRequest::new("cap-1", "auth-1").with_amount(amount(dec!(60))))
        .await
        .unwrap();
    assert_eq!(capture.status, TransactionStatus::Approved);

    let chain = h.ledger.group(&TransactionId::new("auth-1")).await.unwrap();
    assert_eq!(chain.len(), 2);
}

#[tokio::test]
async fn test_rocksdb_callback_lookup_after_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let number = {
        let h = harness_at(&db_path);
        h.engine.authorize(&merchant(), hosted("auth-1", dec!(40))).await.unwrap();
        h.txn_number("auth-1").await
    };

    let h = harness_at(&db_path);
    let receipt = h
        .engine
        .handle_redirect_callback(&approval_callback(&number))
        .await
        .unwrap();
    assert_eq!(receipt.status, TransactionStatus::Approved);
}
