//! Replay detection. A request whose id already exists is compared with the
//! stored row; only the parameters the caller actually supplied take part.

use crate::domain::identity::MerchantId;
use crate::domain::money::{Currency, Money};
use crate::domain::transaction::{PaymentSource, Transaction, TransactionId, TransactionType};

#[derive(Debug, Clone, PartialEq)]
pub struct RequestFingerprint {
    pub kind: TransactionType,
    pub merchant_id: MerchantId,
    pub group_id: TransactionId,
    pub parent_id: Option<TransactionId>,
    pub amount: Option<Money>,
    pub currency: Option<Currency>,
    pub source: Option<PaymentSource>,
}

impl RequestFingerprint {
    /// Name of the first parameter that differs from `existing`.
    pub fn first_mismatch(&self, existing: &Transaction) -> Option<&'static str> {
        if self.merchant_id != existing.merchant_id {
            return Some("merchant");
        }
        if self.kind != existing.r#type {
            return Some("type");
        }
        if self.group_id != existing.group_id {
            return Some("group_id");
        }
        if let Some(parent_id) = &self.parent_id
            && existing.parent_id.as_ref() != Some(parent_id)
        {
            return Some("parent_id");
        }
        if let Some(amount) = self.amount
            && amount != existing.amount
        {
            return Some("amount");
        }
        if let Some(currency) = &self.currency
            && currency != &existing.currency
        {
            return Some("currency");
        }
        if self.source.is_some() && self.source != existing.source {
            return Some("source");
        }
        None
    }
}
