use super::{SweepReport, bounded};
use crate::domain::events::DomainEvent;
use crate::domain::identity::MerchantCredentials;
use crate::domain::ports::{SharedClock, SharedEvents, SharedLedger};
use crate::domain::token::{FinancialToken, GatewayToken, StorageToken};
use crate::domain::transaction::{GatewayResponse, Transaction, TransactionType};
use crate::error::{PaymentError, Result, ValidationError};
use crate::gateway::TransportError;
use crate::gateway::protocol::{Category, GatewayRequest};
use crate::gateway::server_direct::ServerDirectAdapter;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Owns the two-tier token model: mints financial tokens from approvals,
/// promotes them into storage tokens, and watches for expiring ones.
pub struct TokenLifecycleManager {
    server_direct: Arc<ServerDirectAdapter>,
    ledger: SharedLedger,
    events: SharedEvents,
    clock: SharedClock,
    lifetime: Duration,
    warning_window: Duration,
    reconciliation_after: Duration,
    store_timeout: std::time::Duration,
}

impl TokenLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_direct: Arc<ServerDirectAdapter>,
        ledger: SharedLedger,
        events: SharedEvents,
        clock: SharedClock,
        lifetime: Duration,
        warning_window: Duration,
        reconciliation_after: Duration,
        store_timeout: std::time::Duration,
    ) -> Self {
        Self {
            server_direct,
            ledger,
            events,
            clock,
            lifetime,
            warning_window,
            reconciliation_after,
            store_timeout,
        }
    }

    /// Financial token for an approving response, scoped to the chain of
    /// `tx`. The gateway's expiry wins over the configured lifetime.
    pub fn mint(&self, tx: &Transaction, response: &GatewayResponse) -> Option<FinancialToken> {
        if !response.is_approved() || !tx.r#type.mints_token() {
            return None;
        }
        let Some(value) = response.token.as_deref() else {
            tracing::warn!(transaction_id = %tx.id, "Approval carried no token; chain cannot be extended");
            return None;
        };
        let expires_at = response
            .token_expires_at
            .unwrap_or(response.received_at + self.lifetime);
        Some(FinancialToken::new(value, tx.group_id.clone(), expires_at))
    }

    /// One-way conversion of `tx`'s financial token into a storage token.
    /// Moves no money, so the adapter may retry it freely.
    pub async fn promote(&self, creds: &MerchantCredentials, tx: &Transaction) -> Result<StorageToken> {
        let token = tx
            .financial_token
            .as_ref()
            .filter(|t| !t.is_expired(self.clock.now()))
            .ok_or_else(|| ValidationError::TokenExpired(tx.group_id.clone()))?;

        let request = GatewayRequest::new(Category::Tokenize, format!("{}-TOKN", tx.transaction_number))
            .with_token(GatewayToken::Financial(token.clone()));
        let response = self.server_direct.execute(creds, &request).await?;

        if !response.is_approved() {
            return Err(PaymentError::Transport(TransportError::Rejected {
                code: response.response_code,
                message: response.message,
            }));
        }
        let value = response.token.ok_or_else(|| {
            PaymentError::Transport(TransportError::MalformedResponse(
                "promotion response carried no token".to_string(),
            ))
        })?;
        tracing::info!(transaction_id = %tx.id, "Financial token promoted to storage token");
        Ok(StorageToken::from_promotion(value))
    }

    /// Reports authorizations whose token is about to lapse and pending rows
    /// that have waited too long for an answer. Changes no state.
    pub async fn sweep_expiring(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = self.sweep_authorizations(now).await?;
        report = report.merge(self.sweep_pending(now).await?);
        tracing::info!(
            examined = report.examined,
            flagged = report.changed,
            failed = report.failed,
            "Token housekeeping finished"
        );
        Ok(report)
    }

    async fn sweep_authorizations(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let authorizations = bounded(
            self.store_timeout,
            self.ledger.list_by_type(TransactionType::Authorize),
        )
        .await?;

        for auth in authorizations.into_iter().filter(Transaction::is_approved) {
            let Some(token) = auth.financial_token.as_ref() else {
                continue;
            };
            report.examined += 1;
            if token.is_expired(now) || token.expires_at() > now + self.warning_window {
                continue;
            }
            let chain = match bounded(self.store_timeout, self.ledger.group(&auth.group_id)).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(transaction_id = %auth.id, error = %e, "Could not load chain");
                    report.failed += 1;
                    continue;
                }
            };
            let settled = chain.iter().any(|tx| {
                matches!(tx.r#type, TransactionType::Capture | TransactionType::Void)
                    && tx.counts_toward_totals()
            });
            if settled {
                continue;
            }
            tracing::warn!(
                transaction_id = %auth.id,
                expires_at = %token.expires_at(),
                "Authorization token expiring without capture or void"
            );
            self.events
                .publish(DomainEvent::AuthorizationExpiring {
                    merchant_id: auth.merchant_id.clone(),
                    transaction_id: auth.id.clone(),
                    expires_at: token.expires_at(),
                })
                .await;
            report.changed += 1;
        }
        Ok(report)
    }

    async fn sweep_pending(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let pending = bounded(self.store_timeout, self.ledger.list_pending()).await?;
        for tx in pending {
            report.examined += 1;
            if tx.created_at + self.reconciliation_after > now {
                continue;
            }
            tracing::warn!(
                transaction_id = %tx.id,
                txn_number = %tx.transaction_number,
                pending_since = %tx.created_at,
                "Transaction still pending; reconciliation required"
            );
            self.events
                .publish(DomainEvent::ReconciliationRequired {
                    merchant_id: tx.merchant_id.clone(),
                    transaction_id: tx.id.clone(),
                    pending_since: tx.created_at,
                })
                .await;
            report.changed += 1;
        }
        Ok(report)
    }
}
