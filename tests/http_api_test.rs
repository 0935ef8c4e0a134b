mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::*;
use gatewaypay::interfaces::http::router;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(h.engine.clone())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("x-merchant-id", MERCHANT)
        .header("x-customer-id", CUSTOMER)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn sale_body(id: &str, amount: &str) -> Value {
    json!({
        "id": id,
        "amount": amount,
        "currency": "USD",
        "source": { "kind": "one_time", "value": "ot_card" }
    })
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_sale_over_http() {
    let h = Harness::new();
    let (status, body) = send(app(&h), post_json("/v1/sales", sale_body("sale-1", "42.00"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "completed");
    assert_eq!(body["receipt"]["status"], "approved");
    assert_eq!(body["receipt"]["transaction_id"], "sale-1");

    let request = Request::get("/v1/transactions/sale-1")
        .header("x-merchant-id", MERCHANT)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
}

#[tokio::test]
async fn test_missing_merchant_header_is_unauthorized() {
    let h = Harness::new();
    let request = Request::post("/v1/sales")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(sale_body("sale-1", "1.00").to_string()))
        .unwrap();
    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_replay_mismatch_is_conflict() {
    let h = Harness::new();
    send(app(&h), post_json("/v1/sales", sale_body("sale-1", "42.00"))).await;
    let (status, body) = send(app(&h), post_json("/v1/sales", sale_body("sale-1", "43.00"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "replay_mismatch");
}

#[tokio::test]
async fn test_validation_failure_is_unprocessable() {
    let h = Harness::new();
    let capture = json!({ "id": "cap-1", "group_id": "nope" });
    let (status, body) = send(app(&h), post_json("/v1/captures", capture)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");
}

#[tokio::test]
async fn test_hosted_entry_renders_form_for_browsers() {
    let h = Harness::new();
    let body = json!({
        "id": "auth-1",
        "amount": "20.00",
        "source": { "kind": "hosted_entry" }
    });
    let request = Request::post("/v1/authorizations")
        .header("x-merchant-id", MERCHANT)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "text/html")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("<form"));
    assert!(html.contains("https://gateway.test/hosted"));
}

#[tokio::test]
async fn test_gateway_callback_endpoint() {
    let h = Harness::new();
    let hosted = json!({
        "id": "auth-1",
        "amount": "20.00",
        "source": { "kind": "hosted_entry" }
    });
    let (_, body) = send(app(&h), post_json("/v1/authorizations", hosted)).await;
    assert_eq!(body["outcome"], "redirect_required");

    let number = h.txn_number("auth-1").await;
    let request = Request::post("/gateway/callback")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(approval_callback(&number)))
        .unwrap();
    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let forged = Request::post("/gateway/callback")
        .body(Body::from(signed_notification(MERCHANT, "wrong", &number, &[])))
        .unwrap();
    let (status, body) = send(app(&h), forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "callback_rejected");
}

#[tokio::test]
async fn test_token_sweep_endpoint() {
    let h = Harness::new();
    let request = Request::post("/internal/sweeps/tokens").body(Body::empty()).unwrap();
    let (status, body) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["examined"], 0);
}

#[tokio::test]
async fn test_narrowed_scopes_are_enforced() {
    let h = Harness::new();
    let list = |scopes: &'static str| {
        Request::get("/v1/payment-methods")
            .header("x-merchant-id", MERCHANT)
            .header("x-customer-id", CUSTOMER)
            .header("x-scopes", scopes)
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(app(&h), list("payments")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = send(app(&h), list("payments, methods")).await;
    assert_eq!(status, StatusCode::OK);
}
