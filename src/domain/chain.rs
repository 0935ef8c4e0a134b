//! Chain linkage and the legal-transition rules.
//!
//! A chain is every transaction sharing one `group_id`. It is rebuilt from
//! ledger rows as an arena of nodes with parent indices; chains only grow
//! forward so nothing here mutates history.

use super::identity::MerchantId;
use super::money::{Currency, Money};
use super::payment_method::PaymentMethodId;
use super::token::FinancialToken;
use super::transaction::{Transaction, TransactionId, TransactionType};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ChainNode {
    pub tx: Transaction,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Chain {
    group_id: TransactionId,
    nodes: Vec<ChainNode>,
    index: HashMap<TransactionId, usize>,
}

/// Everything a validated follow-on needs to reach the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowOnPlan {
    pub parent_id: TransactionId,
    pub token: FinancialToken,
    pub amount: Money,
    pub currency: Currency,
    pub payment_method_id: Option<PaymentMethodId>,
}

impl Chain {
    /// Builds the arena from the group's rows. Rows may arrive in any
    /// order; parents are linked once every row is indexed. Soft-deleted
    /// rows are not part of the chain.
    pub fn from_rows(group_id: TransactionId, rows: Vec<Transaction>) -> Self {
        let mut nodes: Vec<ChainNode> = rows
            .into_iter()
            .filter(|tx| tx.deleted_at.is_none())
            .map(|tx| ChainNode { tx, parent: None })
            .collect();
        let index: HashMap<TransactionId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.tx.id.clone(), i))
            .collect();
        for node in &mut nodes {
            node.parent = node.tx.parent_id.as_ref().and_then(|p| index.get(p).copied());
        }
        Self {
            group_id,
            nodes,
            index,
        }
    }

    pub fn origin(&self) -> Option<&Transaction> {
        self.get(&self.group_id)
    }

    pub fn get(&self, id: &TransactionId) -> Option<&Transaction> {
        self.index.get(id).map(|&i| &self.nodes[i].tx)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.nodes.iter().map(|n| &n.tx)
    }

    /// Transactions whose immediate predecessor is `id`.
    pub fn children_of<'a>(&'a self, id: &TransactionId) -> impl Iterator<Item = &'a Transaction> + 'a {
        let parent = self.index.get(id).copied();
        self.nodes
            .iter()
            .filter(move |n| parent.is_some() && n.parent == parent)
            .map(|n| &n.tx)
    }

    /// Sum of `kind` rows that are approved or still in flight.
    pub fn reserved_total(&self, kind: TransactionType) -> Money {
        self.transactions()
            .filter(|tx| tx.r#type == kind && tx.counts_toward_totals())
            .map(|tx| tx.amount)
            .sum()
    }

    pub fn approved_total(&self, kind: TransactionType) -> Money {
        self.transactions()
            .filter(|tx| tx.r#type == kind && tx.is_approved())
            .map(|tx| tx.amount)
            .sum()
    }

    fn reserved_refunds_against(&self, parent: &TransactionId) -> Money {
        self.children_of(parent)
            .filter(|tx| tx.r#type == TransactionType::Refund && tx.counts_toward_totals())
            .map(|tx| tx.amount)
            .sum()
    }

    fn has_live(&self, kind: TransactionType) -> bool {
        self.transactions()
            .any(|tx| tx.r#type == kind && tx.counts_toward_totals())
    }

    pub fn is_voided(&self) -> bool {
        self.has_live(TransactionType::Void)
    }

    /// Validates a follow-on operation against the current chain state.
    pub fn plan_follow_on(
        &self,
        kind: TransactionType,
        amount: Option<Money>,
        parent_id: Option<&TransactionId>,
        merchant_id: &MerchantId,
        currency: Option<&Currency>,
        now: DateTime<Utc>,
    ) -> Result<FollowOnPlan, ValidationError> {
        let origin = self
            .origin()
            .filter(|o| &o.merchant_id == merchant_id)
            .ok_or_else(|| ValidationError::PredecessorNotFound(self.group_id.clone()))?;

        if origin.r#type == TransactionType::PreNote {
            return Err(ValidationError::PreNoteChain(self.group_id.clone()));
        }
        if let Some(currency) = currency
            && currency != &origin.currency
        {
            return Err(ValidationError::CurrencyMismatch {
                requested: currency.to_string(),
                chain: origin.currency.to_string(),
            });
        }
        if !origin.is_approved() {
            return Err(ValidationError::PredecessorNotApproved {
                id: origin.id.clone(),
            });
        }

        let (parent, amount) = match kind {
            TransactionType::Capture => self.check_capture(origin, amount)?,
            TransactionType::Void => self.check_void(origin)?,
            TransactionType::Refund => self.check_refund(origin, amount, parent_id)?,
            other => {
                return Err(ValidationError::IllegalTransition {
                    from: origin.r#type,
                    to: other,
                });
            }
        };

        let token = parent
            .financial_token
            .as_ref()
            .filter(|t| t.extends(&self.group_id, now))
            .cloned()
            .ok_or_else(|| ValidationError::TokenExpired(self.group_id.clone()))?;

        Ok(FollowOnPlan {
            parent_id: parent.id.clone(),
            token,
            amount,
            currency: origin.currency.clone(),
            payment_method_id: origin.payment_method_id.clone(),
        })
    }

    fn check_capture<'a>(
        &'a self,
        origin: &'a Transaction,
        amount: Option<Money>,
    ) -> Result<(&'a Transaction, Money), ValidationError> {
        if origin.r#type != TransactionType::Authorize {
            return Err(ValidationError::IllegalTransition {
                from: origin.r#type,
                to: TransactionType::Capture,
            });
        }
        if self.is_voided() {
            return Err(ValidationError::ChainVoided(origin.id.clone()));
        }
        let remaining = origin
            .amount
            .saturating_sub(self.reserved_total(TransactionType::Capture));
        let requested = amount.unwrap_or(remaining);
        if requested == Money::ZERO || requested > remaining {
            return Err(ValidationError::OverCapture {
                requested: requested.value(),
                remaining: remaining.value(),
            });
        }
        Ok((origin, requested))
    }

    fn check_void<'a>(
        &'a self,
        origin: &'a Transaction,
    ) -> Result<(&'a Transaction, Money), ValidationError> {
        if origin.r#type != TransactionType::Authorize {
            return Err(ValidationError::IllegalTransition {
                from: origin.r#type,
                to: TransactionType::Void,
            });
        }
        if self.is_voided() {
            return Err(ValidationError::ChainVoided(origin.id.clone()));
        }
        if self.has_live(TransactionType::Capture) {
            return Err(ValidationError::ChainCaptured(origin.id.clone()));
        }
        Ok((origin, origin.amount))
    }

    fn check_refund<'a>(
        &'a self,
        origin: &'a Transaction,
        amount: Option<Money>,
        parent_id: Option<&TransactionId>,
    ) -> Result<(&'a Transaction, Money), ValidationError> {
        let group_ceiling = match origin.r#type {
            TransactionType::Sale => origin.amount,
            TransactionType::Authorize => self.approved_total(TransactionType::Capture),
            from => {
                return Err(ValidationError::IllegalTransition {
                    from,
                    to: TransactionType::Refund,
                });
            }
        };
        let group_remaining =
            group_ceiling.saturating_sub(self.reserved_total(TransactionType::Refund));

        let parent = match parent_id {
            Some(id) => {
                let parent = self
                    .get(id)
                    .ok_or_else(|| ValidationError::PredecessorNotFound(id.clone()))?;
                if !matches!(
                    parent.r#type,
                    TransactionType::Sale | TransactionType::Capture
                ) {
                    return Err(ValidationError::IllegalTransition {
                        from: parent.r#type,
                        to: TransactionType::Refund,
                    });
                }
                if !parent.is_approved() {
                    return Err(ValidationError::PredecessorNotApproved {
                        id: parent.id.clone(),
                    });
                }
                parent
            }
            None if origin.r#type == TransactionType::Sale => origin,
            None => {
                let wanted = amount.unwrap_or(group_remaining);
                self.nodes
                    .iter()
                    .rev()
                    .map(|n| &n.tx)
                    .filter(|tx| tx.r#type == TransactionType::Capture && tx.is_approved())
                    .find(|tx| self.parent_remaining(tx) >= wanted)
                    .ok_or(ValidationError::OverRefund {
                        requested: wanted.value(),
                        remaining: group_remaining.value(),
                    })?
            }
        };

        let remaining = group_remaining.min(self.parent_remaining(parent));
        let requested = amount.unwrap_or(remaining);
        if requested == Money::ZERO || requested > remaining {
            return Err(ValidationError::OverRefund {
                requested: requested.value(),
                remaining: remaining.value(),
            });
        }
        Ok((parent, requested))
    }

    fn parent_remaining(&self, parent: &Transaction) -> Money {
        parent
            .amount
            .saturating_sub(self.reserved_refunds_against(&parent.id))
    }
}
