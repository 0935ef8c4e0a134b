//! Application layer orchestrating the domain rules against the ports.
//!
//! [`engine::PaymentEngine`] is the entry point for every operation. It
//! serializes work per chain and per payment method with keyed async
//! locks, and delegates token handling and the ACH workflow to
//! [`tokens::TokenLifecycleManager`] and [`ach::AchVerifier`].

pub mod ach;
pub mod engine;
pub mod idempotency;
pub mod locks;
pub mod requests;
pub mod tokens;

use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Bounds a store operation so a stuck backend cannot hold locks forever.
pub(crate) async fn bounded<T>(limit: Duration, op: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| PaymentError::StoreTimeout)?
}

/// Counters returned by the housekeeping sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn merge(self, other: Self) -> Self {
        Self {
            examined: self.examined + other.examined,
            changed: self.changed + other.changed,
            failed: self.failed + other.failed,
        }
    }
}
