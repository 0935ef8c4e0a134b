//! Two-tier gateway tokens.
//!
//! A [`FinancialToken`] is minted by an approving operation and only extends
//! that operation's chain until it expires. A [`StorageToken`] is produced by
//! one-way promotion of a financial token and is the only kind a saved
//! payment method can hold. There is no conversion from storage back to
//! financial.

use super::transaction::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialToken {
    value: String,
    chain_id: TransactionId,
    expires_at: DateTime<Utc>,
}

impl FinancialToken {
    pub fn new(value: impl Into<String>, chain_id: TransactionId, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            chain_id,
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn chain_id(&self) -> &TransactionId {
        &self.chain_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this token may be presented for an operation on `group_id`.
    pub fn extends(&self, group_id: &TransactionId, now: DateTime<Utc>) -> bool {
        &self.chain_id == group_id && !self.is_expired(now)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageToken(String);

impl StorageToken {
    /// Only the token lifecycle manager creates storage tokens, from a
    /// promotion response.
    pub(crate) fn from_promotion(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

/// Either tier, for code that handles tokens generically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", content = "token", rename_all = "snake_case")]
pub enum GatewayToken {
    Financial(FinancialToken),
    Storage(StorageToken),
}

impl GatewayToken {
    pub fn value(&self) -> &str {
        match self {
            Self::Financial(t) => t.value(),
            Self::Storage(t) => t.value(),
        }
    }
}

// Token values are credentials; keep them out of logs.
impl fmt::Debug for FinancialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinancialToken")
            .field("value", &mask(&self.value))
            .field("chain_id", &self.chain_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Debug for StorageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StorageToken").field(&mask(&self.0)).finish()
    }
}

fn mask(value: &str) -> String {
    let tail: String = value.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{tail}")
}
