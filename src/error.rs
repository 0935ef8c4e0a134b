use crate::domain::transaction::{TransactionId, TransactionType};
use crate::gateway::browser_redirect::CallbackError;
use crate::gateway::codec::CodecError;
use crate::gateway::signature::SignatureError;
use crate::gateway::TransportError;
use miette::Diagnostic;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Diagnostic, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(gatewaypay::validation))]
    Validation(#[from] ValidationError),

    #[error("Transaction {id} was already submitted with a different {field}")]
    #[diagnostic(
        code(gatewaypay::replay_mismatch),
        help("reuse an id only to retry the exact same request")
    )]
    ReplayMismatch {
        id: TransactionId,
        field: &'static str,
    },

    #[error("Gateway outcome unknown for transaction {id}; reconciliation required")]
    #[diagnostic(code(gatewaypay::unknown_outcome))]
    UnknownOutcome { id: TransactionId },

    #[error("Gateway transport error: {0}")]
    #[diagnostic(code(gatewaypay::transport))]
    Transport(#[from] TransportError),

    #[error("Callback rejected: {0}")]
    #[diagnostic(code(gatewaypay::callback))]
    Callback(#[from] CallbackError),

    #[error("Signature error: {0}")]
    #[diagnostic(code(gatewaypay::signature))]
    Signature(#[from] SignatureError),

    #[error("Wire codec error: {0}")]
    #[diagnostic(code(gatewaypay::codec))]
    Codec(#[from] CodecError),

    #[error("Unknown merchant {0}")]
    #[diagnostic(code(gatewaypay::unknown_merchant))]
    UnknownMerchant(String),

    #[error("{0} not found")]
    #[diagnostic(code(gatewaypay::not_found))]
    NotFound(String),

    #[error("Store operation timed out")]
    #[diagnostic(code(gatewaypay::store_timeout))]
    StoreTimeout,

    #[error("Internal error: {0}")]
    #[diagnostic(code(gatewaypay::internal))]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

/// Local rejections raised before any gateway call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("amount {0} has more than two decimal places")]
    AmountPrecision(Decimal),
    #[error("invalid currency code {0:?}")]
    InvalidCurrency(String),
    #[error("currency {requested} does not match chain currency {chain}")]
    CurrencyMismatch { requested: String, chain: String },
    #[error("predecessor {0} not found")]
    PredecessorNotFound(TransactionId),
    #[error("predecessor {id} is not approved")]
    PredecessorNotApproved { id: TransactionId },
    #[error("cannot {to} a chain originated by {from}")]
    IllegalTransition {
        from: TransactionType,
        to: TransactionType,
    },
    #[error("authorization {0} has been voided")]
    ChainVoided(TransactionId),
    #[error("authorization {0} already has captures and cannot be voided")]
    ChainCaptured(TransactionId),
    #[error("capture of {requested} exceeds remaining authorization {remaining}")]
    OverCapture { requested: Decimal, remaining: Decimal },
    #[error("refund of {requested} exceeds refundable balance {remaining}")]
    OverRefund { requested: Decimal, remaining: Decimal },
    #[error("financial token for chain {0} has expired")]
    TokenExpired(TransactionId),
    #[error("payment method {0} not found")]
    PaymentMethodNotFound(String),
    #[error("payment method {id} is inactive ({reason})")]
    InactivePaymentMethod { id: String, reason: String },
    #[error("ACH payment method {0} failed verification")]
    VerificationFailed(String),
    #[error("ACH payment method {0} had a return and awaits gateway verification")]
    AwaitingVerification(String),
    #[error("{kind} payment methods do not support {operation}")]
    UnsupportedForMethod {
        kind: &'static str,
        operation: TransactionType,
    },
    #[error("saving a payment method requires a customer id")]
    MissingCustomer,
    #[error("group {0} is a pre-note chain")]
    PreNoteChain(TransactionId),
}
