use super::ach::{AchReturn, RETURN_DEACTIVATION_THRESHOLD, ReturnOutcome};
use super::identity::{CustomerId, MerchantId};
use super::token::StorageToken;
use super::transaction::{TransactionId, TransactionType};
use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const REASON_REMOVED: &str = "removed by owner";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethodId(String);

impl PaymentMethodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("pm_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentMethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Card,
    Ach,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Ach => "ach",
        }
    }
}

/// Masked, display-only account details. Never holds raw account data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayDetails {
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub bank_name: Option<String>,
    pub expiry: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

/// ACH-only verification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchVerification {
    pub status: VerificationStatus,
    pub started_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub return_count: u32,
    /// Debits whose return has been counted.
    #[serde(default)]
    pub counted_returns: Vec<TransactionId>,
}

/// Why a debit against a method is allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chargeability {
    Ready,
    /// Unverified ACH inside its grace window.
    WithinGrace { ends_at: DateTime<Utc> },
    /// Grace elapsed without returns; the sweep has not promoted it yet.
    AwaitingSweep,
}

/// A saved, reusable payment instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub merchant_id: MerchantId,
    pub owner: CustomerId,
    pub kind: MethodKind,
    pub token: StorageToken,
    pub display: DisplayDetails,
    pub is_active: bool,
    pub is_default: bool,
    pub deactivation_reason: Option<String>,
    pub verification: Option<AchVerification>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PaymentMethod {
    pub fn card(
        merchant_id: MerchantId,
        owner: CustomerId,
        token: StorageToken,
        display: DisplayDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(merchant_id, owner, MethodKind::Card, token, display, None, now)
    }

    /// A bank account whose pre-note just succeeded; verification starts now.
    pub fn ach(
        merchant_id: MerchantId,
        owner: CustomerId,
        token: StorageToken,
        display: DisplayDetails,
        now: DateTime<Utc>,
    ) -> Self {
        let verification = AchVerification {
            status: VerificationStatus::Pending,
            started_at: now,
            verified_at: None,
            return_count: 0,
            counted_returns: Vec::new(),
        };
        Self::new(merchant_id, owner, MethodKind::Ach, token, display, Some(verification), now)
    }

    fn new(
        merchant_id: MerchantId,
        owner: CustomerId,
        kind: MethodKind,
        token: StorageToken,
        display: DisplayDetails,
        verification: Option<AchVerification>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentMethodId::generate(),
            merchant_id,
            owner,
            kind,
            token,
            display,
            is_active: true,
            is_default: false,
            deactivation_reason: None,
            verification,
            created_at: now,
            last_used_at: None,
            deleted_at: None,
        }
    }

    /// Cards are verified by tokenization; ACH accounts by the workflow.
    pub fn is_verified(&self) -> bool {
        self.verification
            .as_ref()
            .is_none_or(|v| v.status == VerificationStatus::Verified)
    }

    pub fn verification_status(&self) -> Option<VerificationStatus> {
        self.verification.as_ref().map(|v| v.status)
    }

    pub fn return_count(&self) -> u32 {
        self.verification.as_ref().map_or(0, |v| v.return_count)
    }

    pub fn grace_ends_at(&self, grace: Duration) -> Option<DateTime<Utc>> {
        self.verification.as_ref().map(|v| v.started_at + grace)
    }

    /// Checks whether `operation` may be charged to this method.
    pub fn check_chargeable(
        &self,
        operation: TransactionType,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Chargeability, ValidationError> {
        if !self.is_active || self.deleted_at.is_some() {
            return Err(ValidationError::InactivePaymentMethod {
                id: self.id.to_string(),
                reason: self
                    .deactivation_reason
                    .clone()
                    .unwrap_or_else(|| "deactivated".to_string()),
            });
        }
        if self.kind == MethodKind::Ach && operation != TransactionType::Sale {
            return Err(ValidationError::UnsupportedForMethod {
                kind: self.kind.as_str(),
                operation,
            });
        }
        let Some(verification) = &self.verification else {
            return Ok(Chargeability::Ready);
        };
        match verification.status {
            VerificationStatus::Verified => Ok(Chargeability::Ready),
            VerificationStatus::Failed => {
                Err(ValidationError::VerificationFailed(self.id.to_string()))
            }
            VerificationStatus::Pending => {
                let ends_at = verification.started_at + grace;
                if now < ends_at {
                    Ok(Chargeability::WithinGrace { ends_at })
                } else if verification.return_count == 0 {
                    Ok(Chargeability::AwaitingSweep)
                } else {
                    Err(ValidationError::AwaitingVerification(self.id.to_string()))
                }
            }
        }
    }

    /// Promotes a pending ACH method whose grace period elapsed with no
    /// return. A returned account waits for an explicit gateway notice.
    /// Returns `true` only when the state changed.
    pub fn verify_if_elapsed(&mut self, now: DateTime<Utc>, grace: Duration) -> bool {
        if !self.is_active {
            return false;
        }
        match &mut self.verification {
            Some(v)
                if v.status == VerificationStatus::Pending
                    && v.return_count == 0
                    && v.started_at + grace <= now =>
            {
                v.status = VerificationStatus::Verified;
                v.verified_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Explicit verification reported by the gateway.
    pub fn mark_verified(&mut self, now: DateTime<Utc>) -> bool {
        let active = self.is_active;
        match &mut self.verification {
            Some(v) if v.status == VerificationStatus::Pending && active => {
                v.status = VerificationStatus::Verified;
                v.verified_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Counts the return on debit `charged` once and applies the
    /// deactivation policy.
    pub fn apply_return(&mut self, charged: &TransactionId, ach_return: &AchReturn) -> ReturnOutcome {
        let Some(verification) = self.verification.as_mut() else {
            return ReturnOutcome::NotApplicable;
        };
        if verification.counted_returns.contains(charged) {
            return ReturnOutcome::Duplicate;
        }
        verification.counted_returns.push(charged.clone());
        verification.return_count += 1;
        let return_count = verification.return_count;

        if !self.is_active {
            return ReturnOutcome::AlreadyInactive { return_count };
        }

        let reason = if ach_return.is_fatal() {
            Some(format!(
                "fatal return {}: {}",
                ach_return.code, ach_return.description
            ))
        } else if return_count >= RETURN_DEACTIVATION_THRESHOLD {
            Some(format!(
                "{return_count} returns, last {}: {}",
                ach_return.code, ach_return.description
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.deactivate(reason.clone());
                ReturnOutcome::Deactivated {
                    return_count,
                    reason,
                }
            }
            None => ReturnOutcome::Recorded { return_count },
        }
    }

    pub fn deactivate(&mut self, reason: impl Into<String>) {
        self.is_active = false;
        self.is_default = false;
        self.deactivation_reason = Some(reason.into());
        if let Some(v) = self.verification.as_mut()
            && v.status == VerificationStatus::Pending
        {
            v.status = VerificationStatus::Failed;
        }
    }

    /// Soft-delete on the owner's request.
    pub fn remove(&mut self, now: DateTime<Utc>) {
        self.deactivate(REASON_REMOVED);
        self.deleted_at = Some(now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used_at = Some(now);
    }
}
