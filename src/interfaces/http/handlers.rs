//! Axum route handlers. Each one is a thin translation onto a
//! [`PaymentEngine`] operation.

use super::error::ApiError;
use super::identity::Caller;
use crate::application::SweepReport;
use crate::application::engine::PaymentEngine;
use crate::application::requests::{
    AchNotificationOutcome, FollowOnRequest, OriginationRequest, PaymentMethodSummary,
    PaymentOutcome, PreNoteRequest,
};
use crate::domain::identity::{SCOPE_METHODS, SCOPE_PAYMENTS};
use crate::domain::payment_method::PaymentMethodId;
use crate::domain::transaction::{Receipt, TransactionId};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{Html, IntoResponse, Response};
use std::sync::Arc;

pub type AppState = Arc<PaymentEngine>;

type ApiResult<T> = Result<T, ApiError>;

/// Browsers get the auto-submitting form for a hosted entry; API clients
/// get JSON.
fn respond_outcome(headers: &HeaderMap, outcome: PaymentOutcome) -> Response {
    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    match outcome {
        PaymentOutcome::RedirectRequired { redirect, .. } if wants_html => {
            Html(redirect.to_html_form()).into_response()
        }
        outcome => Json(outcome).into_response(),
    }
}

/// `POST /v1/authorizations`
pub async fn post_authorization(
    State(engine): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(request): Json<OriginationRequest>,
) -> ApiResult<Response> {
    let identity = caller.scoped(SCOPE_PAYMENTS)?;
    let outcome = engine.authorize(&identity, request).await?;
    Ok(respond_outcome(&headers, outcome))
}

/// `POST /v1/sales`
pub async fn post_sale(
    State(engine): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(request): Json<OriginationRequest>,
) -> ApiResult<Response> {
    let identity = caller.scoped(SCOPE_PAYMENTS)?;
    let outcome = engine.sale(&identity, request).await?;
    Ok(respond_outcome(&headers, outcome))
}

/// `POST /v1/captures`
pub async fn post_capture(
    State(engine): State<AppState>,
    caller: Caller,
    Json(request): Json<FollowOnRequest>,
) -> ApiResult<Json<Receipt>> {
    let identity = caller.scoped(SCOPE_PAYMENTS)?;
    Ok(Json(engine.capture(&identity, request).await?))
}

/// `POST /v1/voids`
pub async fn post_void(
    State(engine): State<AppState>,
    caller: Caller,
    Json(request): Json<FollowOnRequest>,
) -> ApiResult<Json<Receipt>> {
    let identity = caller.scoped(SCOPE_PAYMENTS)?;
    Ok(Json(engine.void(&identity, request).await?))
}

/// `POST /v1/refunds`
pub async fn post_refund(
    State(engine): State<AppState>,
    caller: Caller,
    Json(request): Json<FollowOnRequest>,
) -> ApiResult<Json<Receipt>> {
    let identity = caller.scoped(SCOPE_PAYMENTS)?;
    Ok(Json(engine.refund(&identity, request).await?))
}

/// `POST /v1/pre-notes`
pub async fn post_pre_note(
    State(engine): State<AppState>,
    caller: Caller,
    Json(request): Json<PreNoteRequest>,
) -> ApiResult<Json<Receipt>> {
    let identity = caller.scoped(SCOPE_METHODS)?;
    Ok(Json(engine.pre_note(&identity, request).await?))
}

/// `GET /v1/transactions/{id}`
pub async fn get_transaction(
    State(engine): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Receipt>> {
    let identity = caller.scoped(SCOPE_PAYMENTS)?;
    let receipt = engine
        .get_transaction(&identity, &TransactionId::new(id))
        .await?;
    Ok(Json(receipt))
}

/// `GET /v1/payment-methods`
pub async fn list_payment_methods(
    State(engine): State<AppState>,
    caller: Caller,
) -> ApiResult<Json<Vec<PaymentMethodSummary>>> {
    let identity = caller.scoped(SCOPE_METHODS)?;
    Ok(Json(engine.list_payment_methods(&identity).await?))
}

/// `POST /v1/payment-methods/{id}/default`
pub async fn post_default_payment_method(
    State(engine): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<PaymentMethodSummary>> {
    let identity = caller.scoped(SCOPE_METHODS)?;
    let summary = engine
        .set_default_payment_method(&identity, &PaymentMethodId::new(id))
        .await?;
    Ok(Json(summary))
}

/// `DELETE /v1/payment-methods/{id}`
pub async fn delete_payment_method(
    State(engine): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<PaymentMethodSummary>> {
    let identity = caller.scoped(SCOPE_METHODS)?;
    let summary = engine
        .remove_payment_method(&identity, &PaymentMethodId::new(id))
        .await?;
    Ok(Json(summary))
}

/// `POST /gateway/callback`: form-encoded, signed by the gateway.
pub async fn post_gateway_callback(State(engine): State<AppState>, body: String) -> ApiResult<Json<Receipt>> {
    Ok(Json(engine.handle_redirect_callback(&body).await?))
}

/// `POST /gateway/ach-notifications`
pub async fn post_ach_notification(
    State(engine): State<AppState>,
    body: String,
) -> ApiResult<Json<AchNotificationOutcome>> {
    Ok(Json(engine.handle_ach_notification(&body).await?))
}

/// `POST /internal/sweeps/ach`
pub async fn post_ach_sweep(State(engine): State<AppState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(engine.sweep_ach_verifications().await?))
}

/// `POST /internal/sweeps/tokens`
pub async fn post_token_sweep(State(engine): State<AppState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(engine.sweep_token_housekeeping().await?))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
