//! Caller identity extractor.
//!
//! Authentication happens in front of this service; the authenticating
//! proxy forwards the result as headers and they are trusted as given.

use super::error::ApiError;
use crate::domain::identity::CallerIdentity;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

pub const MERCHANT_HEADER: &str = "x-merchant-id";
pub const CUSTOMER_HEADER: &str = "x-customer-id";
pub const SCOPES_HEADER: &str = "x-scopes";

#[derive(Debug, Clone)]
pub struct Caller(pub CallerIdentity);

impl Caller {
    /// The identity, if its scopes allow `scope`.
    pub fn scoped(self, scope: &'static str) -> Result<CallerIdentity, ApiError> {
        if self.0.permits(scope) {
            Ok(self.0)
        } else {
            tracing::warn!(merchant_id = %self.0.merchant_id, scope, "Caller lacks required scope");
            Err(ApiError::Forbidden(scope))
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).map(Caller)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()).filter(|v| !v.is_empty()))
            .map_err(|_| ApiError::Unauthenticated(name)),
    }
}

pub fn identity_from_headers(headers: &HeaderMap) -> Result<CallerIdentity, ApiError> {
    let merchant = header(headers, MERCHANT_HEADER)?.ok_or(ApiError::Unauthenticated(MERCHANT_HEADER))?;
    let mut identity = CallerIdentity::merchant(merchant);
    if let Some(customer) = header(headers, CUSTOMER_HEADER)? {
        identity = identity.with_customer(customer);
    }
    if let Some(scopes) = header(headers, SCOPES_HEADER)? {
        identity = identity.with_scopes(scopes.split(',').map(str::trim).filter(|s| !s.is_empty()));
    }
    Ok(identity)
}
