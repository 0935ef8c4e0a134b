//! Maps engine errors onto HTTP responses.

use crate::error::PaymentError;
use crate::gateway::browser_redirect::CallbackError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid {0} header")]
    Unauthenticated(&'static str),

    #[error("caller lacks the {0} scope")]
    Forbidden(&'static str),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        let payment = match self {
            Self::Unauthenticated(_) => return (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Self::Forbidden(_) => return (StatusCode::FORBIDDEN, "forbidden"),
            Self::Payment(e) => e,
        };
        match payment {
            PaymentError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            PaymentError::ReplayMismatch { .. } => (StatusCode::CONFLICT, "replay_mismatch"),
            // The row exists and will be reconciled; the caller should poll.
            PaymentError::UnknownOutcome { .. } => (StatusCode::ACCEPTED, "outcome_unknown"),
            PaymentError::Transport(_) => (StatusCode::BAD_GATEWAY, "gateway_unavailable"),
            PaymentError::Callback(e) => match e {
                CallbackError::Codec(_) => (StatusCode::BAD_REQUEST, "malformed_callback"),
                CallbackError::UnknownTransaction(_) => (StatusCode::NOT_FOUND, "unknown_transaction"),
                CallbackError::NotAch(_) => (StatusCode::UNPROCESSABLE_ENTITY, "not_ach"),
                CallbackError::UnknownMerchant(_)
                | CallbackError::Signature(_)
                | CallbackError::MerchantMismatch(_) => (StatusCode::UNAUTHORIZED, "callback_rejected"),
            },
            PaymentError::Signature(_) => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            PaymentError::Codec(_) => (StatusCode::BAD_REQUEST, "malformed_request"),
            PaymentError::UnknownMerchant(_) => (StatusCode::UNAUTHORIZED, "unknown_merchant"),
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            PaymentError::StoreTimeout => (StatusCode::SERVICE_UNAVAILABLE, "store_timeout"),
            PaymentError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let mut body = serde_json::json!({
            "error": code,
            "message": self.to_string(),
        });
        if let Self::Payment(PaymentError::UnknownOutcome { id }) = &self {
            body["transaction_id"] = serde_json::json!(id);
        }
        (status, Json(body)).into_response()
    }
}
