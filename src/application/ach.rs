use super::locks::KeyedLocks;
use super::requests::AchNotificationOutcome;
use super::{SweepReport, bounded};
use crate::domain::ach::{AchReturn, ReturnOutcome};
use crate::domain::events::DomainEvent;
use crate::domain::payment_method::{MethodKind, PaymentMethod, PaymentMethodId};
use crate::domain::ports::{RecordOutcome, SharedClock, SharedEvents, SharedLedger, SharedMethodStore};
use crate::domain::transaction::{Transaction, TransactionType};
use crate::error::{PaymentError, Result};
use crate::gateway::browser_redirect::CallbackError;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Notification type for an explicit verification sent by the gateway.
pub const NOTIFICATION_VERIFIED: &str = "verified";

/// Drives bank accounts from pending to verified or failed.
///
/// Every change to a method happens under that method's lock, the same
/// lock debits take while validating, so a deactivation is visible to any
/// debit validated after it.
pub struct AchVerifier {
    ledger: SharedLedger,
    methods: SharedMethodStore,
    events: SharedEvents,
    clock: SharedClock,
    locks: Arc<KeyedLocks>,
    grace_period: Duration,
    store_timeout: std::time::Duration,
}

impl AchVerifier {
    pub fn new(
        ledger: SharedLedger,
        methods: SharedMethodStore,
        events: SharedEvents,
        clock: SharedClock,
        locks: Arc<KeyedLocks>,
        grace_period: Duration,
        store_timeout: std::time::Duration,
    ) -> Self {
        Self {
            ledger,
            methods,
            events,
            clock,
            locks,
            grace_period,
            store_timeout,
        }
    }

    /// Verifies every pending method whose grace period has elapsed.
    /// Safe to run repeatedly and concurrently; failures are logged per
    /// method and picked up by the next run.
    pub async fn sweep_verifications(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let pending = bounded(self.store_timeout, self.methods.list_pending_verification()).await?;
        let mut report = SweepReport::default();

        for candidate in pending {
            report.examined += 1;
            match self.verify_one(&candidate.id, now).await {
                Ok(true) => report.changed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(payment_method_id = %candidate.id, error = %e, "Verification sweep failed for method");
                    report.failed += 1;
                }
            }
        }
        self.locks.prune();

        tracing::info!(
            examined = report.examined,
            verified = report.changed,
            failed = report.failed,
            "ACH verification sweep finished"
        );
        Ok(report)
    }

    async fn verify_one(&self, id: &PaymentMethodId, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.locks.lock(id.as_str()).await;
        let Some(mut method) = bounded(self.store_timeout, self.methods.get(id)).await? else {
            return Ok(false);
        };
        if !method.verify_if_elapsed(now, self.grace_period) {
            return Ok(false);
        }
        bounded(self.store_timeout, self.methods.store(method.clone())).await?;
        tracing::info!(payment_method_id = %method.id, "ACH payment method verified after grace period");
        self.publish_verified(&method).await;
        Ok(true)
    }

    /// Explicit verification notice from the gateway for the method created
    /// by `pre_note`.
    pub async fn confirm(&self, pre_note: &Transaction) -> Result<AchNotificationOutcome> {
        if pre_note.r#type != TransactionType::PreNote {
            return Err(CallbackError::NotAch(pre_note.transaction_number.clone()).into());
        }
        let Some(id) = pre_note.payment_method_id.clone() else {
            return Err(PaymentError::NotFound(format!(
                "payment method for transaction {}",
                pre_note.id
            )));
        };
        let _guard = self.locks.lock(id.as_str()).await;
        let mut method = bounded(self.store_timeout, self.methods.get(&id))
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment method {id}")))?;
        let changed = method.mark_verified(self.clock.now());
        if changed {
            bounded(self.store_timeout, self.methods.store(method.clone())).await?;
            tracing::info!(payment_method_id = %id, "ACH payment method verified by gateway");
            self.publish_verified(&method).await;
        }
        Ok(AchNotificationOutcome::Verified {
            payment_method_id: id,
            changed,
        })
    }

    /// Applies a return notification to the debit it names and to the
    /// method that debit charged.
    ///
    /// The annotation is written first and the method counts each debit at
    /// most once, so a redelivery after a failed method write still lands
    /// the count.
    pub async fn handle_return(&self, tx: &Transaction, ach_return: AchReturn) -> Result<AchNotificationOutcome> {
        let method_id = tx.payment_method_id.clone();
        let _guard = match &method_id {
            Some(id) => Some(self.locks.lock(id.as_str()).await),
            None => None,
        };
        let method = match &method_id {
            Some(id) => bounded(self.store_timeout, self.methods.get(id)).await?,
            None => None,
        };
        let is_ach = tx.r#type == TransactionType::PreNote
            || method.as_ref().is_some_and(|m| m.kind == MethodKind::Ach);
        if !is_ach {
            tracing::warn!(transaction_id = %tx.id, return_code = %ach_return.code, "Return notice for a non-ACH transaction rejected");
            return Err(CallbackError::NotAch(tx.transaction_number.clone()).into());
        }

        let recorded = bounded(self.store_timeout, self.ledger.record_return(&tx.id, ach_return.clone())).await?;
        let redelivered = matches!(recorded, RecordOutcome::AlreadyRecorded(_));
        let annotation = recorded.transaction().ach_return.clone().unwrap_or(ach_return);

        let result = match method {
            Some(method) => self.apply_to_method(tx, method, &annotation).await?,
            None if redelivered => ReturnOutcome::Duplicate,
            None => {
                tracing::info!(transaction_id = %tx.id, return_code = %annotation.code, "Return recorded; no saved method charged");
                ReturnOutcome::NotApplicable
            }
        };
        if result == ReturnOutcome::Duplicate {
            tracing::info!(transaction_id = %tx.id, return_code = %annotation.code, "Duplicate return notification ignored");
        }

        Ok(AchNotificationOutcome::Return {
            transaction_id: tx.id.clone(),
            payment_method_id: method_id,
            result,
        })
    }

    async fn apply_to_method(
        &self,
        tx: &Transaction,
        mut method: PaymentMethod,
        ach_return: &AchReturn,
    ) -> Result<ReturnOutcome> {
        let outcome = method.apply_return(&tx.id, ach_return);
        if matches!(outcome, ReturnOutcome::Duplicate | ReturnOutcome::NotApplicable) {
            return Ok(outcome);
        }
        bounded(self.store_timeout, self.methods.store(method.clone())).await?;

        let id = &method.id;
        match &outcome {
            ReturnOutcome::Deactivated { return_count, reason } => {
                tracing::warn!(
                    payment_method_id = %id,
                    return_code = %ach_return.code,
                    return_count,
                    reason = %reason,
                    "ACH payment method deactivated"
                );
                self.events
                    .publish(DomainEvent::PaymentMethodDeactivated {
                        merchant_id: method.merchant_id.clone(),
                        payment_method_id: method.id.clone(),
                        reason: reason.clone(),
                        return_count: *return_count,
                    })
                    .await;
            }
            ReturnOutcome::Recorded { return_count } | ReturnOutcome::AlreadyInactive { return_count } => {
                tracing::warn!(
                    payment_method_id = %id,
                    return_code = %ach_return.code,
                    return_count,
                    "ACH return recorded"
                );
            }
            ReturnOutcome::Duplicate | ReturnOutcome::NotApplicable => {}
        }
        Ok(outcome)
    }

    async fn publish_verified(&self, method: &PaymentMethod) {
        self.events
            .publish(DomainEvent::PaymentMethodVerified {
                merchant_id: method.merchant_id.clone(),
                payment_method_id: method.id.clone(),
            })
            .await;
    }
}
