//! Hosted-page flow: the customer's browser posts account data straight to
//! the gateway, and the gateway reports back with a signed callback.

use super::codec::{CodecError, FieldSet, fields};
use super::protocol::{GatewayRequest, parse_response};
use super::retry::RetryPolicy;
use super::signature::{self, SignatureError};
use super::{Endpoint, SharedTransport, TransportError};
use crate::domain::ach::AchReturn;
use crate::domain::identity::{MerchantCredentials, MerchantId};
use crate::domain::ports::{MerchantDirectory, SharedClock};
use crate::domain::transaction::{APPROVED_CODE, GatewayResponse};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;
use url::Url;

/// Access-code lifetime assumed when the exchange does not state one.
pub const DEFAULT_ACCESS_CODE_TTL_SECS: i64 = 900;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("malformed callback: {0}")]
    Codec(#[from] CodecError),
    #[error("callback names unknown merchant {0}")]
    UnknownMerchant(String),
    #[error("callback signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("no transaction with number {0}")]
    UnknownTransaction(String),
    #[error("transaction number {0} belongs to another merchant")]
    MerchantMismatch(String),
    #[error("transaction number {0} is not an ACH debit")]
    NotAch(String),
}

/// Everything the caller's front end needs to send the customer to the
/// hosted page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectPackage {
    pub action_url: Url,
    pub access_code: String,
    pub expires_at: DateTime<Utc>,
    pub fields: FieldSet,
}

impl RedirectPackage {
    /// Auto-submitting HTML form carrying the signed hidden fields.
    pub fn to_html_form(&self) -> String {
        let mut html = String::new();
        let _ = writeln!(
            html,
            r#"<form id="gateway-redirect" method="post" action="{}">"#,
            escape_html(self.action_url.as_str())
        );
        for (name, value) in self.fields.iter() {
            let _ = writeln!(
                html,
                r#"  <input type="hidden" name="{}" value="{}">"#,
                escape_html(name),
                escape_html(value)
            );
        }
        html.push_str("</form>\n");
        html.push_str(r#"<script>document.getElementById("gateway-redirect").submit();</script>"#);
        html
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

pub struct BrowserRedirectAdapter {
    transport: SharedTransport,
    retry: RetryPolicy,
    hosted_page_url: Url,
    callback_url: Url,
    clock: SharedClock,
}

impl BrowserRedirectAdapter {
    pub fn new(
        transport: SharedTransport,
        retry: RetryPolicy,
        hosted_page_url: Url,
        callback_url: Url,
        clock: SharedClock,
    ) -> Self {
        Self {
            transport,
            retry,
            hosted_page_url,
            callback_url,
            clock,
        }
    }

    /// Exchanges the signed request for a single-use access code and builds
    /// the hidden form. The exchange moves no money, so it is always retried.
    pub async fn prepare(
        &self,
        creds: &MerchantCredentials,
        request: &GatewayRequest,
    ) -> Result<RedirectPackage, TransportError> {
        let request = request.clone().with_callback(self.callback_url.clone());
        let mut outbound = request.to_fields(creds);
        signature::sign_in_place(creds.secret(), &mut outbound)
            .map_err(|e| TransportError::NotDelivered(format!("could not sign request: {e}")))?;

        let transport = &self.transport;
        let exchange = &outbound;
        let inbound = self
            .retry
            .run(true, move |_| transport.post(Endpoint::CodeExchange, exchange))
            .await?;

        if inbound.contains(fields::SIGNATURE) {
            signature::verify(creds.secret(), &inbound)
                .map_err(|e| TransportError::MalformedResponse(format!("code exchange signature: {e}")))?;
        }
        if let Some(code) = inbound.get(fields::RESPONSE_CODE)
            && code != APPROVED_CODE
        {
            return Err(TransportError::Rejected {
                code: code.to_string(),
                message: inbound.get(fields::MESSAGE).unwrap_or_default().to_string(),
            });
        }
        let access_code = inbound
            .require(fields::ACCESS_CODE)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?
            .to_string();
        let ttl = inbound
            .get(fields::EXPIRES_IN)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(DEFAULT_ACCESS_CODE_TTL_SECS);

        let mut hidden = request.to_fields(creds);
        hidden.insert(fields::ACCESS_CODE, access_code.as_str());
        signature::sign_in_place(creds.secret(), &mut hidden)
            .map_err(|e| TransportError::NotDelivered(format!("could not sign form: {e}")))?;

        Ok(RedirectPackage {
            action_url: self.hosted_page_url.clone(),
            access_code,
            expires_at: self.clock.now() + Duration::seconds(ttl),
            fields: hidden,
        })
    }
}

/// A gateway notification whose signature checked out against the secret of
/// the merchant it names.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedCallback {
    pub merchant_id: MerchantId,
    pub transaction_number: String,
    pub fields: FieldSet,
}

impl AuthenticatedCallback {
    pub fn response(&self, received_at: DateTime<Utc>) -> Result<GatewayResponse, CallbackError> {
        Ok(parse_response(&self.fields, received_at)?)
    }

    pub fn ach_return(&self, received_at: DateTime<Utc>) -> Result<AchReturn, CallbackError> {
        let code = self.fields.require(fields::RETURN_CODE)?;
        let description = self.fields.get(fields::RETURN_DESCRIPTION).unwrap_or_default();
        Ok(AchReturn::new(code, description, received_at))
    }
}

/// Decodes an inbound body and verifies it in constant time with the secret
/// of the merchant named in its `merchant_id` field.
pub fn authenticate(
    merchants: &dyn MerchantDirectory,
    body: &str,
) -> Result<AuthenticatedCallback, CallbackError> {
    let fields = FieldSet::decode(body)?;
    let merchant_id = MerchantId::new(fields.require(fields::MERCHANT_ID)?);
    let creds = merchants
        .credentials(&merchant_id)
        .ok_or_else(|| CallbackError::UnknownMerchant(merchant_id.to_string()))?;
    signature::verify(creds.secret(), &fields)?;
    let transaction_number = fields.require(fields::TXN_NUMBER)?.to_string();
    Ok(AuthenticatedCallback {
        merchant_id,
        transaction_number,
        fields,
    })
}
