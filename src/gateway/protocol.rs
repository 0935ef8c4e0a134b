//! Mapping between engine requests/responses and gateway field sets.

use super::codec::{CodecError, FieldSet, fields};
use crate::domain::identity::MerchantCredentials;
use crate::domain::money::{Currency, Money};
use crate::domain::payment_method::DisplayDetails;
use crate::domain::token::GatewayToken;
use crate::domain::transaction::{GatewayResponse, TransactionType};
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

/// Gateway operation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Authorize,
    Sale,
    Capture,
    Void,
    Refund,
    PreNote,
    /// Promotion of a financial token into a storage token.
    Tokenize,
}

impl Category {
    pub fn code(self) -> &'static str {
        match self {
            Self::Authorize => "AUTH",
            Self::Sale => "SALE",
            Self::Capture => "CAPT",
            Self::Void => "VOID",
            Self::Refund => "RFND",
            Self::PreNote => "PNOT",
            Self::Tokenize => "TOKN",
        }
    }

    /// Retrying a category that moves money risks a double charge.
    pub fn moves_money(self) -> bool {
        !matches!(self, Self::Tokenize)
    }
}

impl From<TransactionType> for Category {
    fn from(kind: TransactionType) -> Self {
        match kind {
            TransactionType::Authorize => Self::Authorize,
            TransactionType::Sale => Self::Sale,
            TransactionType::Capture => Self::Capture,
            TransactionType::Refund => Self::Refund,
            TransactionType::Void => Self::Void,
            TransactionType::PreNote => Self::PreNote,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Transport-independent description of one gateway request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub category: Category,
    pub transaction_number: String,
    pub amount: Option<Money>,
    pub currency: Option<Currency>,
    pub token: Option<GatewayToken>,
    pub account_token: Option<String>,
    pub callback_url: Option<Url>,
}

impl GatewayRequest {
    pub fn new(category: Category, transaction_number: impl Into<String>) -> Self {
        Self {
            category,
            transaction_number: transaction_number.into(),
            amount: None,
            currency: None,
            token: None,
            account_token: None,
            callback_url: None,
        }
    }

    pub fn with_amount(mut self, amount: Money, currency: Currency) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency);
        self
    }

    pub fn with_token(mut self, token: GatewayToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_account_token(mut self, account_token: impl Into<String>) -> Self {
        self.account_token = Some(account_token.into());
        self
    }

    pub fn with_callback(mut self, callback_url: Url) -> Self {
        self.callback_url = Some(callback_url);
        self
    }

    /// Unsigned field set for this request.
    pub fn to_fields(&self, creds: &MerchantCredentials) -> FieldSet {
        let mut set = FieldSet::new();
        set.insert(fields::MERCHANT_ID, creds.merchant_id.as_str())
            .insert(fields::SITE_ID, creds.site_id.as_str())
            .insert(fields::TXN_NUMBER, self.transaction_number.as_str())
            .insert(fields::CATEGORY, self.category.code())
            .insert_opt(fields::AMOUNT, self.amount.map(|a| a.to_wire()))
            .insert_opt(fields::CURRENCY, self.currency.as_ref().map(Currency::as_str))
            .insert_opt(fields::TOKEN, self.token.as_ref().map(GatewayToken::value))
            .insert_opt(fields::ACCOUNT_TOKEN, self.account_token.as_deref())
            .insert_opt(fields::CALLBACK_URL, self.callback_url.as_ref().map(Url::as_str));
        set
    }
}

/// Parses a server-direct response or a redirect callback.
pub fn parse_response(set: &FieldSet, received_at: DateTime<Utc>) -> Result<GatewayResponse, CodecError> {
    let response_code = set.require(fields::RESPONSE_CODE)?.to_string();
    let token_expires_at = set
        .get(fields::TOKEN_EXPIRES_AT)
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| CodecError::InvalidField {
                    field: fields::TOKEN_EXPIRES_AT,
                    reason: e.to_string(),
                })
        })
        .transpose()?;

    Ok(GatewayResponse {
        response_code,
        auth_code: set.get(fields::AUTH_CODE).map(str::to_string),
        message: set.get(fields::MESSAGE).unwrap_or_default().to_string(),
        token: set.get(fields::TOKEN).map(str::to_string),
        token_expires_at,
        display: DisplayDetails {
            last_four: set.get(fields::LAST_FOUR).map(str::to_string),
            brand: set.get(fields::BRAND).map(str::to_string),
            bank_name: set.get(fields::BANK_NAME).map(str::to_string),
            expiry: set.get(fields::EXPIRY).map(str::to_string),
        },
        received_at,
    })
}
