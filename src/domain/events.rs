use super::identity::MerchantId;
use super::payment_method::{MethodKind, PaymentMethodId};
use super::transaction::{Receipt, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payloads handed to the webhook fan-out. Publishing is the engine's last
/// obligation; delivery is someone else's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TransactionApproved {
        merchant_id: MerchantId,
        receipt: Receipt,
    },
    TransactionDeclined {
        merchant_id: MerchantId,
        receipt: Receipt,
    },
    OutcomeUnknown {
        merchant_id: MerchantId,
        transaction_id: TransactionId,
    },
    PaymentMethodSaved {
        merchant_id: MerchantId,
        payment_method_id: PaymentMethodId,
        kind: MethodKind,
    },
    PaymentMethodVerified {
        merchant_id: MerchantId,
        payment_method_id: PaymentMethodId,
    },
    PaymentMethodDeactivated {
        merchant_id: MerchantId,
        payment_method_id: PaymentMethodId,
        reason: String,
        return_count: u32,
    },
    AuthorizationExpiring {
        merchant_id: MerchantId,
        transaction_id: TransactionId,
        expires_at: DateTime<Utc>,
    },
    ReconciliationRequired {
        merchant_id: MerchantId,
        transaction_id: TransactionId,
        pending_since: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransactionApproved { .. } => "transaction_approved",
            Self::TransactionDeclined { .. } => "transaction_declined",
            Self::OutcomeUnknown { .. } => "outcome_unknown",
            Self::PaymentMethodSaved { .. } => "payment_method_saved",
            Self::PaymentMethodVerified { .. } => "payment_method_verified",
            Self::PaymentMethodDeactivated { .. } => "payment_method_deactivated",
            Self::AuthorizationExpiring { .. } => "authorization_expiring",
            Self::ReconciliationRequired { .. } => "reconciliation_required",
        }
    }

    pub fn merchant_id(&self) -> &MerchantId {
        match self {
            Self::TransactionApproved { merchant_id, .. }
            | Self::TransactionDeclined { merchant_id, .. }
            | Self::OutcomeUnknown { merchant_id, .. }
            | Self::PaymentMethodSaved { merchant_id, .. }
            | Self::PaymentMethodVerified { merchant_id, .. }
            | Self::PaymentMethodDeactivated { merchant_id, .. }
            | Self::AuthorizationExpiring { merchant_id, .. }
            | Self::ReconciliationRequired { merchant_id, .. } => merchant_id,
        }
    }
}
