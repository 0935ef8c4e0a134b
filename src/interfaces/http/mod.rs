//! HTTP surface of the engine.
//!
//! Endpoints:
//! - `POST /v1/authorizations`, `POST /v1/sales`: originate a chain
//! - `POST /v1/captures`, `POST /v1/voids`, `POST /v1/refunds`: extend one
//! - `POST /v1/pre-notes`: verify and save a bank account
//! - `GET /v1/transactions/{id}`
//! - `GET /v1/payment-methods`, `POST /v1/payment-methods/{id}/default`,
//!   `DELETE /v1/payment-methods/{id}`
//! - `POST /gateway/callback`, `POST /gateway/ach-notifications`: signed
//!   gateway notifications
//! - `POST /internal/sweeps/ach`, `POST /internal/sweeps/tokens`
//! - `GET /health`

pub mod error;
pub mod handlers;
pub mod identity;

use axum::Router;
use axum::routing::{delete, get, post};
use handlers::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/authorizations", post(handlers::post_authorization))
        .route("/v1/sales", post(handlers::post_sale))
        .route("/v1/captures", post(handlers::post_capture))
        .route("/v1/voids", post(handlers::post_void))
        .route("/v1/refunds", post(handlers::post_refund))
        .route("/v1/pre-notes", post(handlers::post_pre_note))
        .route("/v1/transactions/{id}", get(handlers::get_transaction))
        .route("/v1/payment-methods", get(handlers::list_payment_methods))
        .route(
            "/v1/payment-methods/{id}/default",
            post(handlers::post_default_payment_method),
        )
        .route("/v1/payment-methods/{id}", delete(handlers::delete_payment_method))
        .route("/gateway/callback", post(handlers::post_gateway_callback))
        .route("/gateway/ach-notifications", post(handlers::post_ach_notification))
        .route("/internal/sweeps/ach", post(handlers::post_ach_sweep))
        .route("/internal/sweeps/tokens", post(handlers::post_token_sweep))
        .route("/health", get(handlers::health))
        .with_state(state)
}
