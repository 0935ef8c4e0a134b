//! Inputs and outputs of the engine operations.

use crate::domain::money::{Amount, Currency};
use crate::domain::payment_method::{
    DisplayDetails, MethodKind, PaymentMethod, PaymentMethodId, VerificationStatus,
};
use crate::domain::ach::ReturnOutcome;
use crate::domain::transaction::{PaymentSource, Receipt, TransactionId};
use crate::gateway::browser_redirect::RedirectPackage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorize or sale.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OriginationRequest {
    pub id: TransactionId,
    pub amount: Amount,
    #[serde(default = "Currency::usd")]
    pub currency: Currency,
    pub source: PaymentSource,
    #[serde(default)]
    pub save_method: bool,
}

/// Capture, void or refund on an existing chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FollowOnRequest {
    pub id: TransactionId,
    pub group_id: TransactionId,
    /// Defaults to everything still available: the uncaptured remainder
    /// for a capture, the refundable balance for a refund.
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub currency: Option<Currency>,
    /// Refunds only: the sale or capture being refunded.
    #[serde(default)]
    pub parent_id: Option<TransactionId>,
}

impl FollowOnRequest {
    pub fn new(id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            id: TransactionId::new(id),
            group_id: TransactionId::new(group_id),
            amount: None,
            currency: None,
            parent_id: None,
        }
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(TransactionId::new(parent_id));
        self
    }
}

/// Zero-value verification probe for a bank account.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreNoteRequest {
    pub id: TransactionId,
    /// One-time token for the bank account from client-side tokenization.
    pub account_token: String,
    #[serde(default = "Currency::usd")]
    pub currency: Currency,
}

/// Result of an authorize or sale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Completed {
        receipt: Receipt,
    },
    /// Hosted entry: the customer must be sent to the gateway's page; the
    /// receipt stays pending until the callback arrives.
    RedirectRequired {
        receipt: Receipt,
        redirect: RedirectPackage,
    },
}

impl PaymentOutcome {
    pub fn receipt(&self) -> &Receipt {
        match self {
            Self::Completed { receipt } | Self::RedirectRequired { receipt, .. } => receipt,
        }
    }

    pub fn into_receipt(self) -> Receipt {
        match self {
            Self::Completed { receipt } | Self::RedirectRequired { receipt, .. } => receipt,
        }
    }
}

/// Caller-facing view of a saved method. The storage token never leaves
/// the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentMethodSummary {
    pub id: PaymentMethodId,
    pub kind: MethodKind,
    pub display: DisplayDetails,
    pub is_active: bool,
    pub is_default: bool,
    pub is_verified: bool,
    pub verification_status: Option<VerificationStatus>,
    pub return_count: u32,
    pub deactivation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&PaymentMethod> for PaymentMethodSummary {
    fn from(method: &PaymentMethod) -> Self {
        Self {
            id: method.id.clone(),
            kind: method.kind,
            display: method.display.clone(),
            is_active: method.is_active,
            is_default: method.is_default,
            is_verified: method.is_verified(),
            verification_status: method.verification_status(),
            return_count: method.return_count(),
            deactivation_reason: method.deactivation_reason.clone(),
            created_at: method.created_at,
            last_used_at: method.last_used_at,
        }
    }
}

/// What an inbound ACH notification did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum AchNotificationOutcome {
    Return {
        transaction_id: TransactionId,
        payment_method_id: Option<PaymentMethodId>,
        result: ReturnOutcome,
    },
    Verified {
        payment_method_id: PaymentMethodId,
        changed: bool,
    },
}
