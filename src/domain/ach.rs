use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returns after which a non-fatal code deactivates the account.
pub const RETURN_DEACTIVATION_THRESHOLD: u32 = 2;

/// Codes that deactivate on first sight: closed, missing/invalid account,
/// and the unauthorized-debit family.
const FATAL_RETURN_CODES: &[&str] = &["R02", "R03", "R04", "R05", "R07", "R10", "R29"];

/// An asynchronous ACH return notification, recorded once on the
/// transaction it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchReturn {
    pub code: String,
    pub description: String,
    pub received_at: DateTime<Utc>,
}

impl AchReturn {
    pub fn new(code: &str, description: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            code: code.trim().to_ascii_uppercase(),
            description: description.into(),
            received_at,
        }
    }

    pub fn is_fatal(&self) -> bool {
        is_fatal_code(&self.code)
    }
}

pub fn is_fatal_code(code: &str) -> bool {
    FATAL_RETURN_CODES
        .iter()
        .any(|fatal| fatal.eq_ignore_ascii_case(code.trim()))
}

/// What a return did to the payment method it was charged against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReturnOutcome {
    /// Counted, method stays active.
    Recorded { return_count: u32 },
    /// Counted and the method was deactivated by this return.
    Deactivated { return_count: u32, reason: String },
    /// The method was already inactive; only the count moved.
    AlreadyInactive { return_count: u32 },
    /// The notification had already been applied.
    Duplicate,
    /// The charged method is not a bank account, or no saved method exists.
    NotApplicable,
}
