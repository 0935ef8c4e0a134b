use super::ach::AchReturn;
use super::identity::{CustomerId, MerchantId};
use super::money::{Currency, Money};
use super::payment_method::{DisplayDetails, PaymentMethodId};
use super::token::FinancialToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response code the gateway uses for approvals.
pub const APPROVED_CODE: &str = "00";
/// Engine-local code: the request provably never reached the gateway.
pub const NOT_DELIVERED_CODE: &str = "L1";

/// Caller-supplied transaction id, doubling as the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Authorize,
    Sale,
    Capture,
    Refund,
    Void,
    PreNote,
}

impl TransactionType {
    pub fn is_origination(self) -> bool {
        matches!(self, Self::Authorize | Self::Sale | Self::PreNote)
    }

    /// Operations whose approval mints a financial token.
    pub fn mints_token(self) -> bool {
        matches!(
            self,
            Self::Authorize | Self::Sale | Self::Capture | Self::PreNote
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authorize => "authorize",
            Self::Sale => "sale",
            Self::Capture => "capture",
            Self::Refund => "refund",
            Self::Void => "void",
            Self::PreNote => "pre_note",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    ServerDirect,
    BrowserRedirect,
}

/// Where an originating operation draws funds from. The variants are
/// mutually exclusive by construction.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PaymentSource {
    /// A saved payment method; charged with its storage token.
    Saved(PaymentMethodId),
    /// A one-time token from client-side tokenization.
    OneTime(String),
    /// Account data is entered on the gateway's hosted page.
    HostedEntry,
}

/// Verbatim result of one gateway exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub response_code: String,
    pub auth_code: Option<String>,
    pub message: String,
    pub token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub display: DisplayDetails,
    pub received_at: DateTime<Utc>,
}

impl GatewayResponse {
    /// Local record for a request that never left the engine.
    pub fn not_delivered(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            response_code: NOT_DELIVERED_CODE.to_string(),
            auth_code: None,
            message: reason.into(),
            token: None,
            token_expires_at: None,
            display: DisplayDetails::default(),
            received_at: at,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.response_code == APPROVED_CODE
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
    Failed,
}

impl TransactionStatus {
    /// The only way a status comes into existence.
    pub fn from_response(response: Option<&GatewayResponse>) -> Self {
        match response.map(|r| r.response_code.as_str()) {
            None => Self::Pending,
            Some(APPROVED_CODE) => Self::Approved,
            Some(NOT_DELIVERED_CODE) => Self::Failed,
            Some(_) => Self::Declined,
        }
    }
}

/// One attempted money-movement operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub group_id: TransactionId,
    pub parent_id: Option<TransactionId>,
    pub merchant_id: MerchantId,
    pub customer_id: Option<CustomerId>,
    pub r#type: TransactionType,
    pub amount: Money,
    pub currency: Currency,
    pub source: Option<PaymentSource>,
    pub payment_method_id: Option<PaymentMethodId>,
    pub transport: Transport,
    pub transaction_number: String,
    pub save_method: bool,
    pub response: Option<GatewayResponse>,
    pub financial_token: Option<FinancialToken>,
    pub ach_return: Option<AchReturn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// A new row awaiting its gateway response, with a fresh gateway
    /// transaction number. Callers fill in the source-specific fields.
    pub fn pending(
        id: TransactionId,
        group_id: TransactionId,
        r#type: TransactionType,
        merchant_id: MerchantId,
        amount: Money,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id,
            parent_id: None,
            merchant_id,
            customer_id: None,
            r#type,
            amount,
            currency,
            source: None,
            payment_method_id: None,
            transport: Transport::ServerDirect,
            transaction_number: uuid::Uuid::new_v4().simple().to_string(),
            save_method: false,
            response: None,
            financial_token: None,
            ach_return: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_response(self.response.as_ref())
    }

    pub fn is_approved(&self) -> bool {
        self.status() == TransactionStatus::Approved
    }

    /// Approved, or still awaiting a result and therefore holding its
    /// amount against the chain.
    pub fn counts_toward_totals(&self) -> bool {
        matches!(
            self.status(),
            TransactionStatus::Approved | TransactionStatus::Pending
        )
    }

    pub fn is_resolved(&self) -> bool {
        self.response.is_some()
    }

    pub fn receipt(&self) -> Receipt {
        Receipt::from(self)
    }
}

/// Result returned to callers. Identical for a request and its replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_id: TransactionId,
    pub group_id: TransactionId,
    pub r#type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Money,
    pub currency: Currency,
    pub response_code: Option<String>,
    pub auth_code: Option<String>,
    pub message: Option<String>,
    pub display: DisplayDetails,
    pub payment_method_id: Option<PaymentMethodId>,
}

impl From<&Transaction> for Receipt {
    fn from(tx: &Transaction) -> Self {
        let response = tx.response.as_ref();
        Self {
            transaction_id: tx.id.clone(),
            group_id: tx.group_id.clone(),
            r#type: tx.r#type,
            status: tx.status(),
            amount: tx.amount,
            currency: tx.currency.clone(),
            response_code: response.map(|r| r.response_code.clone()),
            auth_code: response.and_then(|r| r.auth_code.clone()),
            message: response.map(|r| r.message.clone()),
            display: response.map(|r| r.display.clone()).unwrap_or_default(),
            payment_method_id: tx.payment_method_id.clone(),
        }
    }
}
