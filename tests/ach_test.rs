mod common;

use chrono::Duration;
use common::*;
use gatewaypay::application::ach::NOTIFICATION_VERIFIED;
use gatewaypay::application::requests::{AchNotificationOutcome, PreNoteRequest};
use gatewaypay::domain::ach::ReturnOutcome;
use gatewaypay::domain::events::DomainEvent;
use gatewaypay::domain::money::{Currency, Money};
use gatewaypay::domain::payment_method::{MethodKind, PaymentMethodId, VerificationStatus};
use gatewaypay::domain::transaction::{TransactionId, TransactionStatus};
use gatewaypay::error::{PaymentError, ValidationError};
use gatewaypay::gateway::browser_redirect::CallbackError;
use gatewaypay::gateway::codec::fields;
use gatewaypay::infrastructure::in_memory::InMemoryLedger;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn pre_note_request(id: &str) -> PreNoteRequest {
    PreNoteRequest {
        id: TransactionId::new(id),
        account_token: "ot_bank".into(),
        currency: Currency::usd(),
    }
}

async fn saved_bank_account(h: &Harness) -> PaymentMethodId {
    let receipt = h.engine.pre_note(&customer(), pre_note_request("pn-1")).await.unwrap();
    assert_eq!(receipt.status, TransactionStatus::Approved);
    assert_eq!(receipt.amount, Money::ZERO);
    receipt.payment_method_id.expect("pre-note saves the account")
}

#[tokio::test]
async fn test_pre_note_saves_pending_ach_method() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;

    assert_eq!(h.gateway.categories(), vec!["PNOT", "TOKN"]);
    let pre_note = h.gateway.calls()[0].clone();
    assert_eq!(pre_note.get(fields::AMOUNT), Some("0.00"));
    assert_eq!(pre_note.get(fields::ACCOUNT_TOKEN), Some("ot_bank"));

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert_eq!(methods.len(), 1);
    let method = &methods[0];
    assert_eq!(method.id, id);
    assert_eq!(method.kind, MethodKind::Ach);
    assert_eq!(method.verification_status, Some(VerificationStatus::Pending));
    assert_eq!(method.display.bank_name.as_deref(), Some("First Test Bank"));
    assert!(method.is_default);
    assert!(!method.is_verified);
}

#[tokio::test]
async fn test_pre_note_requires_customer() {
    let h = Harness::new();
    let err = h
        .engine
        .pre_note(&merchant(), pre_note_request("pn-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Validation(ValidationError::MissingCustomer)
    ));
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_debit_allowed_within_grace_period() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;

    h.clock.advance(Duration::days(1));
    let outcome = h.engine.sale(&customer(), saved("debit-1", dec!(25), &id)).await.unwrap();
    assert_eq!(outcome.receipt().status, TransactionStatus::Approved);
    assert_eq!(outcome.receipt().payment_method_id, Some(id.clone()));
    assert!(
        h.gateway
            .last_call()
            .get(fields::TOKEN)
            .is_some_and(|t| t.starts_with("sto_"))
    );
}

#[tokio::test]
async fn test_ach_method_cannot_authorize() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;

    let err = h
        .engine
        .authorize(&customer(), saved("auth-1", dec!(25), &id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Validation(ValidationError::UnsupportedForMethod { .. })
    ));
}

#[tokio::test]
async fn test_sweep_verifies_after_grace_period() {
    let h = Harness::new();
    let mut events = h.events.subscribe();
    let id = saved_bank_account(&h).await;

    let early = h.engine.sweep_ach_verifications().await.unwrap();
    assert_eq!(early.examined, 1);
    assert_eq!(early.changed, 0);

    h.clock.advance(Duration::days(3) + Duration::seconds(1));
    let report = h.engine.sweep_ach_verifications().await.unwrap();
    assert_eq!(report.changed, 1);

    // Running again finds nothing left to do.
    let again = h.engine.sweep_ach_verifications().await.unwrap();
    assert_eq!(again.examined, 0);

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert_eq!(methods[0].verification_status, Some(VerificationStatus::Verified));

    let mut verified = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::PaymentMethodVerified { payment_method_id, .. } = event {
            assert_eq!(payment_method_id, id);
            verified = true;
        }
    }
    assert!(verified);
}

#[tokio::test]
async fn test_second_return_deactivates_method() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;

    h.engine.sale(&customer(), saved("debit-1", dec!(25), &id)).await.unwrap();
    h.engine.sale(&customer(), saved("debit-2", dec!(30), &id)).await.unwrap();

    let first = h
        .engine
        .handle_ach_notification(&return_notification(&h.txn_number("debit-1").await, "R01"))
        .await
        .unwrap();
    assert!(matches!(
        first,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Recorded { return_count: 1 },
            ..
        }
    ));

    let second = h
        .engine
        .handle_ach_notification(&return_notification(&h.txn_number("debit-2").await, "R01"))
        .await
        .unwrap();
    assert!(matches!(
        second,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Deactivated { return_count: 2, .. },
            ..
        }
    ));

    let err = h
        .engine
        .sale(&customer(), saved("debit-3", dec!(10), &id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Validation(ValidationError::InactivePaymentMethod { .. })
    ));
}

#[tokio::test]
async fn test_fatal_return_deactivates_immediately() {
    let h = Harness::new();
    let mut events = h.events.subscribe();
    let id = saved_bank_account(&h).await;
    h.engine.sale(&customer(), saved("debit-1", dec!(25), &id)).await.unwrap();

    let outcome = h
        .engine
        .handle_ach_notification(&return_notification(&h.txn_number("debit-1").await, "R02"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Deactivated { return_count: 1, .. },
            ..
        }
    ));

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert!(!methods[0].is_active);
    assert!(!methods[0].is_default);
    assert_eq!(methods[0].verification_status, Some(VerificationStatus::Failed));

    let mut deactivated = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DomainEvent::PaymentMethodDeactivated { .. }) {
            deactivated = true;
        }
    }
    assert!(deactivated);
}

#[tokio::test]
async fn test_duplicate_return_counted_once() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;
    h.engine.sale(&customer(), saved("debit-1", dec!(25), &id)).await.unwrap();

    let body = return_notification(&h.txn_number("debit-1").await, "R01");
    h.engine.handle_ach_notification(&body).await.unwrap();
    let duplicate = h.engine.handle_ach_notification(&body).await.unwrap();
    assert!(matches!(
        duplicate,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Duplicate,
            ..
        }
    ));

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert_eq!(methods[0].return_count, 1);
    assert!(methods[0].is_active);
}

#[tokio::test]
async fn test_gateway_verification_notice() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;
    let body = signed_notification(
        MERCHANT,
        SECRET,
        &h.txn_number("pn-1").await,
        &[(fields::NOTIFICATION_TYPE, NOTIFICATION_VERIFIED)],
    );

    let outcome = h.engine.handle_ach_notification(&body).await.unwrap();
    assert_eq!(
        outcome,
        AchNotificationOutcome::Verified {
            payment_method_id: id.clone(),
            changed: true
        }
    );
    let again = h.engine.handle_ach_notification(&body).await.unwrap();
    assert_eq!(
        again,
        AchNotificationOutcome::Verified {
            payment_method_id: id,
            changed: false
        }
    );
}

#[tokio::test]
async fn test_unsigned_return_rejected() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;
    h.engine.sale(&customer(), saved("debit-1", dec!(25), &id)).await.unwrap();

    let forged = signed_notification(
        MERCHANT,
        "wrong-secret",
        &h.txn_number("debit-1").await,
        &[(fields::RETURN_CODE, "R02")],
    );
    let err = h.engine.handle_ach_notification(&forged).await.unwrap_err();
    assert!(matches!(err, PaymentError::Callback(_)));

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert!(methods[0].is_active);
}

#[tokio::test]
async fn test_returned_account_is_not_verified_by_sweep() {
    let h = Harness::new();
    let id = saved_bank_account(&h).await;

    let outcome = h
        .engine
        .handle_ach_notification(&return_notification(&h.txn_number("pn-1").await, "R01"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Recorded { return_count: 1 },
            ..
        }
    ));

    h.clock.advance(Duration::days(4));
    let report = h.engine.sweep_ach_verifications().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.changed, 0);

    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert_eq!(methods[0].verification_status, Some(VerificationStatus::Pending));
    assert!(!methods[0].is_verified);

    // Past grace with a return on file, debits wait for the gateway.
    let err = h
        .engine
        .sale(&customer(), saved("debit-1", dec!(25), &id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Validation(ValidationError::AwaitingVerification(_))
    ));

    let notice = signed_notification(
        MERCHANT,
        SECRET,
        &h.txn_number("pn-1").await,
        &[(fields::NOTIFICATION_TYPE, NOTIFICATION_VERIFIED)],
    );
    h.engine.handle_ach_notification(&notice).await.unwrap();
    let methods = h.engine.list_payment_methods(&customer()).await.unwrap();
    assert_eq!(methods[0].verification_status, Some(VerificationStatus::Verified));
}

#[tokio::test]
async fn test_redelivered_return_counts_after_failed_method_write() {
    let store = Arc::new(FlakyMethodStore::default());
    let h = Harness::with_stores(Arc::new(InMemoryLedger::new()), store.clone());
    let id = saved_bank_account(&h).await;
    h.engine.sale(&customer(), saved("debit-1", dec!(25), &id)).await.unwrap();
    h.engine.sale(&customer(), saved("debit-2", dec!(30), &id)).await.unwrap();

    let body = return_notification(&h.txn_number("debit-1").await, "R01");
    store.fail_next_store();
    let err = h.engine.handle_ach_notification(&body).await.unwrap_err();
    assert!(matches!(err, PaymentError::StoreTimeout));

    // The annotation landed but the count did not; redelivery completes it.
    let stored = h.ledger.get(&TransactionId::new("debit-1")).await.unwrap().unwrap();
    assert!(stored.ach_return.is_some());
    let redelivered = h.engine.handle_ach_notification(&body).await.unwrap();
    assert!(matches!(
        redelivered,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Recorded { return_count: 1 },
            ..
        }
    ));
    let again = h.engine.handle_ach_notification(&body).await.unwrap();
    assert!(matches!(
        again,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Duplicate,
            ..
        }
    ));

    let second = h
        .engine
        .handle_ach_notification(&return_notification(&h.txn_number("debit-2").await, "R01"))
        .await
        .unwrap();
    assert!(matches!(
        second,
        AchNotificationOutcome::Return {
            result: ReturnOutcome::Deactivated { return_count: 2, .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_return_for_card_transaction_rejected() {
    let h = Harness::new();
    let mut request = card("sale-1", dec!(10));
    request.save_method = true;
    h.engine.sale(&customer(), request).await.unwrap();
    h.engine.sale(&merchant(), card("sale-2", dec!(10))).await.unwrap();

    for id in ["sale-1", "sale-2"] {
        let body = return_notification(&h.txn_number(id).await, "R01");
        let err = h.engine.handle_ach_notification(&body).await.unwrap_err();
        assert!(matches!(err, PaymentError::Callback(CallbackError::NotAch(_))));

        let stored = h.ledger.get(&TransactionId::new(id)).await.unwrap().unwrap();
        assert!(stored.ach_return.is_none());
    }
}
