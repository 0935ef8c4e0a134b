mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::*;
use gatewaypay::error::PaymentError;
use gatewaypay::gateway::browser_redirect::CallbackError;
use gatewaypay::gateway::codec::fields;
use gatewaypay::interfaces::http::router;
use rand::Rng;
use rust_decimal_macros::dec;
use tower::ServiceExt;

fn garbage(rng: &mut impl Rng) -> String {
    const ALPHABET: &[u8] = b"abc=&%+_-0123456789signaturemerchant_id";
    let len = rng.gen_range(0..64);
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[tokio::test]
async fn test_random_notifications_never_change_state() {
    let h = Harness::new();
    h.engine.authorize(&merchant(), hosted("auth-1", dec!(10))).await.unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..500 {
        let body = garbage(&mut rng);
        assert!(h.engine.handle_redirect_callback(&body).await.is_err());
        assert!(h.engine.handle_ach_notification(&body).await.is_err());
    }

    let receipt = h
        .engine
        .get_transaction(&merchant(), &gatewaypay::domain::transaction::TransactionId::new("auth-1"))
        .await
        .unwrap();
    assert_eq!(
        receipt.status,
        gatewaypay::domain::transaction::TransactionStatus::Pending
    );
}

#[tokio::test]
async fn test_unsigned_callback_rejected() {
    let h = Harness::new();
    h.engine.authorize(&merchant(), hosted("auth-1", dec!(10))).await.unwrap();
    let number = h.txn_number("auth-1").await;

    let body = format!(
        "{}={MERCHANT}&{}={number}&{}=00",
        fields::MERCHANT_ID,
        fields::TXN_NUMBER,
        fields::RESPONSE_CODE
    );
    let err = h.engine.handle_redirect_callback(&body).await.unwrap_err();
    assert!(matches!(err, PaymentError::Callback(CallbackError::Signature(_))));
}

#[tokio::test]
async fn test_callback_from_unknown_merchant() {
    let h = Harness::new();
    let body = signed_notification("initech", "initech-secret", "n-1", &[]);
    let err = h.engine.handle_redirect_callback(&body).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Callback(CallbackError::UnknownMerchant(_))
    ));
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let h = Harness::new();
    let request = Request::post("/v1/sales")
        .header("x-merchant-id", MERCHANT)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"id\": \"sale-1\", \"amount\": "))
        .unwrap();
    let response = router(h.engine.clone()).oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_amounts_rejected_at_the_edge() {
    let h = Harness::new();
    for amount in ["-1.00", "0", "1.001"] {
        let body = serde_json::json!({
            "id": "sale-1",
            "amount": amount,
            "source": { "kind": "one_time", "value": "ot_card" }
        });
        let request = Request::post("/v1/sales")
            .header("x-merchant-id", MERCHANT)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(h.engine.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "amount {amount}");
    }
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_merchant_header() {
    let h = Harness::new();
    let err = h
        .engine
        .sale(
            &gatewaypay::domain::identity::CallerIdentity::merchant("initech"),
            card("sale-1", dec!(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::UnknownMerchant(_)));
    assert_eq!(h.gateway.call_count(), 0);
}
