use super::ach::{AchVerifier, NOTIFICATION_VERIFIED};
use super::idempotency::RequestFingerprint;
use super::locks::KeyedLocks;
use super::requests::{
    AchNotificationOutcome, FollowOnRequest, OriginationRequest, PaymentMethodSummary,
    PaymentOutcome, PreNoteRequest,
};
use super::tokens::TokenLifecycleManager;
use super::{SweepReport, bounded};
use crate::domain::chain::Chain;
use crate::domain::events::DomainEvent;
use crate::domain::identity::{CallerIdentity, CustomerId, MerchantCredentials, MerchantId};
use crate::domain::money::Money;
use crate::domain::payment_method::{Chargeability, MethodKind, PaymentMethod, PaymentMethodId};
use crate::domain::ports::{
    InsertOutcome, RecordOutcome, SharedClock, SharedEvents, SharedLedger, SharedMerchants,
    SharedMethodStore,
};
use crate::domain::token::GatewayToken;
use crate::domain::transaction::{
    GatewayResponse, PaymentSource, Receipt, Transaction, TransactionId, TransactionType,
    Transport,
};
use crate::error::{PaymentError, Result, ValidationError};
use crate::gateway::browser_redirect::{
    AuthenticatedCallback, BrowserRedirectAdapter, CallbackError, authenticate,
};
use crate::gateway::codec::fields;
use crate::gateway::protocol::{Category, GatewayRequest};
use crate::gateway::retry::RetryPolicy;
use crate::gateway::server_direct::ServerDirectAdapter;
use crate::gateway::{SharedTransport, TransportError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use url::Url;

/// Tunables for the engine and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Lifetime of a financial token when the gateway does not say.
    pub financial_token_lifetime: Duration,
    /// How long before expiry an uncaptured authorization is reported.
    pub expiry_warning: Duration,
    /// Age after which a pending row is reported for reconciliation.
    pub reconciliation_after: Duration,
    pub ach_grace_period: Duration,
    pub store_timeout: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            financial_token_lifetime: Duration::days(365),
            expiry_warning: Duration::days(30),
            reconciliation_after: Duration::minutes(15),
            ach_grace_period: Duration::days(3),
            store_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// The ports the engine is wired against.
#[derive(Clone)]
pub struct EngineServices {
    pub ledger: SharedLedger,
    pub methods: SharedMethodStore,
    pub events: SharedEvents,
    pub clock: SharedClock,
    pub merchants: SharedMerchants,
    pub transport: SharedTransport,
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub retry: RetryPolicy,
    pub hosted_page_url: Url,
    pub callback_url: Url,
}

/// How an originating request reaches the gateway once validated.
struct ResolvedSource {
    transport: Transport,
    token: Option<GatewayToken>,
    account_token: Option<String>,
    payment_method_id: Option<PaymentMethodId>,
    owner: Option<CustomerId>,
    /// Held until the row is inserted so a concurrent deactivation cannot
    /// slip between validation and insert.
    guard: Option<OwnedMutexGuard<()>>,
}

/// The main entry point for payment processing.
///
/// Every operation that creates a row takes the lock of its chain first and
/// holds it across the idempotency check, validation and insert. The lock
/// is released before the gateway call; the pending row itself reserves
/// the amount against concurrent follow-ons.
pub struct PaymentEngine {
    ledger: SharedLedger,
    methods: SharedMethodStore,
    events: SharedEvents,
    clock: SharedClock,
    merchants: SharedMerchants,
    server_direct: Arc<ServerDirectAdapter>,
    browser_redirect: BrowserRedirectAdapter,
    tokens: TokenLifecycleManager,
    ach: AchVerifier,
    chain_locks: KeyedLocks,
    method_locks: Arc<KeyedLocks>,
    settings: EngineSettings,
}

impl PaymentEngine {
    pub fn new(services: EngineServices, gateway: GatewayOptions, settings: EngineSettings) -> Self {
        let EngineServices {
            ledger,
            methods,
            events,
            clock,
            merchants,
            transport,
        } = services;

        let server_direct = Arc::new(ServerDirectAdapter::new(
            transport.clone(),
            gateway.retry.clone(),
            clock.clone(),
        ));
        let browser_redirect = BrowserRedirectAdapter::new(
            transport,
            gateway.retry,
            gateway.hosted_page_url,
            gateway.callback_url,
            clock.clone(),
        );
        let tokens = TokenLifecycleManager::new(
            server_direct.clone(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
            settings.financial_token_lifetime,
            settings.expiry_warning,
            settings.reconciliation_after,
            settings.store_timeout,
        );
        let method_locks = Arc::new(KeyedLocks::new());
        let ach = AchVerifier::new(
            ledger.clone(),
            methods.clone(),
            events.clone(),
            clock.clone(),
            method_locks.clone(),
            settings.ach_grace_period,
            settings.store_timeout,
        );

        Self {
            ledger,
            methods,
            events,
            clock,
            merchants,
            server_direct,
            browser_redirect,
            tokens,
            ach,
            chain_locks: KeyedLocks::new(),
            method_locks,
            settings,
        }
    }

    pub async fn authorize(&self, identity: &CallerIdentity, request: OriginationRequest) -> Result<PaymentOutcome> {
        self.originate(TransactionType::Authorize, identity, request).await
    }

    pub async fn sale(&self, identity: &CallerIdentity, request: OriginationRequest) -> Result<PaymentOutcome> {
        self.originate(TransactionType::Sale, identity, request).await
    }

    pub async fn capture(&self, identity: &CallerIdentity, request: FollowOnRequest) -> Result<Receipt> {
        self.follow_on(TransactionType::Capture, identity, request).await
    }

    pub async fn void(&self, identity: &CallerIdentity, request: FollowOnRequest) -> Result<Receipt> {
        self.follow_on(TransactionType::Void, identity, request).await
    }

    pub async fn refund(&self, identity: &CallerIdentity, request: FollowOnRequest) -> Result<Receipt> {
        self.follow_on(TransactionType::Refund, identity, request).await
    }

    /// Zero-value probe of a bank account. On approval the account is saved
    /// as a pending ACH method and its verification grace period starts.
    pub async fn pre_note(&self, identity: &CallerIdentity, request: PreNoteRequest) -> Result<Receipt> {
        let creds = self.credentials(&identity.merchant_id)?;
        let source = PaymentSource::OneTime(request.account_token.clone());
        let fingerprint = RequestFingerprint {
            kind: TransactionType::PreNote,
            merchant_id: identity.merchant_id.clone(),
            group_id: request.id.clone(),
            parent_id: None,
            amount: Some(Money::ZERO),
            currency: Some(request.currency.clone()),
            source: Some(source.clone()),
        };

        let chain_guard = self.chain_locks.lock(request.id.as_str()).await;
        if let Some(existing) = self.store(self.ledger.get(&request.id)).await? {
            drop(chain_guard);
            return self
                .replay(&creds, existing, &fingerprint)
                .await
                .map(PaymentOutcome::into_receipt);
        }
        let owner = identity
            .customer_id
            .clone()
            .ok_or(ValidationError::MissingCustomer)?;

        let mut tx = Transaction::pending(
            request.id.clone(),
            request.id.clone(),
            TransactionType::PreNote,
            identity.merchant_id.clone(),
            Money::ZERO,
            request.currency.clone(),
            self.clock.now(),
        );
        tx.customer_id = Some(owner);
        tx.source = Some(source);
        tx.payment_method_id = Some(PaymentMethodId::generate());

        if let InsertOutcome::Existing(existing) = self.store(self.ledger.insert_if_absent(tx.clone())).await? {
            drop(chain_guard);
            return self
                .replay(&creds, existing, &fingerprint)
                .await
                .map(PaymentOutcome::into_receipt);
        }
        drop(chain_guard);
        log_created(&tx);

        let wire = GatewayRequest::new(Category::PreNote, tx.transaction_number.as_str())
            .with_amount(Money::ZERO, tx.currency.clone())
            .with_account_token(request.account_token);
        let result = self.server_direct.execute(&creds, &wire).await;
        self.settle(&creds, tx, result).await
    }

    /// Gateway callback for a hosted-page submission. Also resolves
    /// server-direct rows left pending by an unknown outcome.
    pub async fn handle_redirect_callback(&self, body: &str) -> Result<Receipt> {
        let callback = authenticate(self.merchants.as_ref(), body)
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected gateway callback"))?;
        let tx = self.find_for_callback(&callback).await?;

        if tx.is_resolved() {
            tracing::info!(
                transaction_id = %tx.id,
                txn_number = %callback.transaction_number,
                "Duplicate callback for resolved transaction ignored"
            );
            return self.receipt(&tx).await;
        }
        if tx.transport == Transport::ServerDirect {
            tracing::info!(transaction_id = %tx.id, "Callback resolves pending server-direct transaction");
        }
        let creds = self.credentials(&tx.merchant_id)?;
        let response = callback.response(self.clock.now())?;
        self.complete(&creds, tx, response).await
    }

    /// Return or verification notice for an ACH debit or pre-note.
    pub async fn handle_ach_notification(&self, body: &str) -> Result<AchNotificationOutcome> {
        let callback = authenticate(self.merchants.as_ref(), body)
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected ACH notification"))?;
        let tx = self.find_for_callback(&callback).await?;

        if callback.fields.get(fields::NOTIFICATION_TYPE) == Some(NOTIFICATION_VERIFIED) {
            return self.ach.confirm(&tx).await;
        }
        let ach_return = callback.ach_return(self.clock.now())?;
        self.ach.handle_return(&tx, ach_return).await
    }

    pub async fn get_transaction(&self, identity: &CallerIdentity, id: &TransactionId) -> Result<Receipt> {
        let tx = self
            .store(self.ledger.get(id))
            .await?
            .filter(|tx| tx.merchant_id == identity.merchant_id)
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))?;
        self.receipt(&tx).await
    }

    /// Live and deactivated methods of the calling customer. Removed ones
    /// are hidden.
    pub async fn list_payment_methods(&self, identity: &CallerIdentity) -> Result<Vec<PaymentMethodSummary>> {
        let owner = require_customer(identity)?;
        let methods = self
            .store(self.methods.list_for_owner(&identity.merchant_id, owner))
            .await?;
        Ok(methods
            .iter()
            .filter(|m| m.deleted_at.is_none())
            .map(PaymentMethodSummary::from)
            .collect())
    }

    pub async fn set_default_payment_method(
        &self,
        identity: &CallerIdentity,
        id: &PaymentMethodId,
    ) -> Result<PaymentMethodSummary> {
        let owner = require_customer(identity)?;
        let _owner_guard = self.method_locks.lock(&owner_key(&identity.merchant_id, owner)).await;

        let methods = self
            .store(self.methods.list_for_owner(&identity.merchant_id, owner))
            .await?;
        let target = methods
            .iter()
            .find(|m| &m.id == id && m.deleted_at.is_none())
            .ok_or_else(|| ValidationError::PaymentMethodNotFound(id.to_string()))?;
        if !target.is_active {
            return Err(ValidationError::InactivePaymentMethod {
                id: id.to_string(),
                reason: target
                    .deactivation_reason
                    .clone()
                    .unwrap_or_else(|| "deactivated".to_string()),
            }
            .into());
        }

        let mut updated = None;
        for method in &methods {
            let should_default = &method.id == id;
            if method.is_default == should_default {
                if should_default {
                    updated = Some(method.clone());
                }
                continue;
            }
            if let Some(fresh) = self.update_method(&method.id, |m| m.is_default = should_default).await?
                && should_default
            {
                updated = Some(fresh);
            }
        }
        tracing::info!(payment_method_id = %id, "Default payment method changed");
        updated
            .map(|m| PaymentMethodSummary::from(&m))
            .ok_or_else(|| PaymentError::NotFound(format!("payment method {id}")))
    }

    /// Soft-deletes a method. If it was the default, the oldest remaining
    /// active method takes over.
    pub async fn remove_payment_method(
        &self,
        identity: &CallerIdentity,
        id: &PaymentMethodId,
    ) -> Result<PaymentMethodSummary> {
        let owner = require_customer(identity)?;
        let _owner_guard = self.method_locks.lock(&owner_key(&identity.merchant_id, owner)).await;

        let (method, was_default) = {
            let _guard = self.method_locks.lock(id.as_str()).await;
            let mut method = self
                .store(self.methods.get(id))
                .await?
                .filter(|m| m.merchant_id == identity.merchant_id && &m.owner == owner)
                .filter(|m| m.deleted_at.is_none())
                .ok_or_else(|| ValidationError::PaymentMethodNotFound(id.to_string()))?;
            let was_default = method.is_default;
            method.remove(self.clock.now());
            self.store(self.methods.store(method.clone())).await?;
            (method, was_default)
        };

        tracing::info!(payment_method_id = %id, "Payment method removed");
        self.events
            .publish(DomainEvent::PaymentMethodDeactivated {
                merchant_id: method.merchant_id.clone(),
                payment_method_id: method.id.clone(),
                reason: method.deactivation_reason.clone().unwrap_or_default(),
                return_count: method.return_count(),
            })
            .await;

        if was_default {
            let remaining = self
                .store(self.methods.list_for_owner(&identity.merchant_id, owner))
                .await?;
            let successor = remaining
                .iter()
                .filter(|m| m.is_active && m.deleted_at.is_none())
                .min_by_key(|m| m.created_at);
            if let Some(successor) = successor {
                self.update_method(&successor.id, |m| m.is_default = true).await?;
                tracing::info!(payment_method_id = %successor.id, "Promoted payment method to default");
            }
        }
        Ok(PaymentMethodSummary::from(&method))
    }

    pub async fn sweep_ach_verifications(&self) -> Result<SweepReport> {
        self.ach.sweep_verifications().await
    }

    pub async fn sweep_token_housekeeping(&self) -> Result<SweepReport> {
        let report = self.tokens.sweep_expiring().await;
        self.chain_locks.prune();
        report
    }

    async fn originate(
        &self,
        kind: TransactionType,
        identity: &CallerIdentity,
        request: OriginationRequest,
    ) -> Result<PaymentOutcome> {
        let creds = self.credentials(&identity.merchant_id)?;
        let amount = Money::from(request.amount);
        let fingerprint = RequestFingerprint {
            kind,
            merchant_id: identity.merchant_id.clone(),
            group_id: request.id.clone(),
            parent_id: None,
            amount: Some(amount),
            currency: Some(request.currency.clone()),
            source: Some(request.source.clone()),
        };

        let chain_guard = self.chain_locks.lock(request.id.as_str()).await;
        if let Some(existing) = self.store(self.ledger.get(&request.id)).await? {
            drop(chain_guard);
            return self.replay(&creds, existing, &fingerprint).await;
        }

        let saves_new_method = request.save_method && !matches!(request.source, PaymentSource::Saved(_));
        if saves_new_method && identity.customer_id.is_none() {
            return Err(ValidationError::MissingCustomer.into());
        }
        let now = self.clock.now();
        let ResolvedSource {
            transport,
            token,
            account_token,
            payment_method_id,
            owner,
            guard,
        } = self.resolve_source(kind, identity, &request.source, now).await?;

        let mut tx = Transaction::pending(
            request.id.clone(),
            request.id.clone(),
            kind,
            identity.merchant_id.clone(),
            amount,
            request.currency.clone(),
            now,
        );
        tx.customer_id = identity.customer_id.clone().or(owner);
        tx.source = Some(request.source);
        tx.transport = transport;
        tx.save_method = saves_new_method;
        tx.payment_method_id = if saves_new_method {
            Some(PaymentMethodId::generate())
        } else {
            payment_method_id
        };

        let inserted = self.store(self.ledger.insert_if_absent(tx.clone())).await?;
        drop(guard);
        drop(chain_guard);
        if let InsertOutcome::Existing(existing) = inserted {
            return self.replay(&creds, existing, &fingerprint).await;
        }
        log_created(&tx);

        let mut wire = GatewayRequest::new(kind.into(), tx.transaction_number.as_str())
            .with_amount(tx.amount, tx.currency.clone());
        if let Some(token) = token {
            wire = wire.with_token(token);
        }
        if let Some(account_token) = account_token {
            wire = wire.with_account_token(account_token);
        }

        match tx.transport {
            Transport::BrowserRedirect => {
                let redirect = self.browser_redirect.prepare(&creds, &wire).await.inspect_err(|e| {
                    tracing::warn!(transaction_id = %tx.id, error = %e, "Access code exchange failed; transaction left pending")
                })?;
                Ok(PaymentOutcome::RedirectRequired {
                    receipt: self.receipt(&tx).await?,
                    redirect,
                })
            }
            Transport::ServerDirect => {
                let result = self.server_direct.execute(&creds, &wire).await;
                let receipt = self.settle(&creds, tx, result).await?;
                Ok(PaymentOutcome::Completed { receipt })
            }
        }
    }

    async fn resolve_source(
        &self,
        kind: TransactionType,
        identity: &CallerIdentity,
        source: &PaymentSource,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSource> {
        match source {
            PaymentSource::HostedEntry => Ok(ResolvedSource {
                transport: Transport::BrowserRedirect,
                token: None,
                account_token: None,
                payment_method_id: None,
                owner: None,
                guard: None,
            }),
            PaymentSource::OneTime(account_token) => Ok(ResolvedSource {
                transport: Transport::ServerDirect,
                token: None,
                account_token: Some(account_token.clone()),
                payment_method_id: None,
                owner: None,
                guard: None,
            }),
            PaymentSource::Saved(id) => {
                let guard = self.method_locks.lock(id.as_str()).await;
                let method = self
                    .store(self.methods.get(id))
                    .await?
                    .filter(|m| {
                        m.merchant_id == identity.merchant_id
                            && identity.customer_id.as_ref().is_none_or(|c| c == &m.owner)
                    })
                    .ok_or_else(|| ValidationError::PaymentMethodNotFound(id.to_string()))?;

                match method.check_chargeable(kind, now, self.settings.ach_grace_period)? {
                    Chargeability::Ready => {}
                    Chargeability::WithinGrace { ends_at } => tracing::warn!(
                        payment_method_id = %id,
                        grace_ends_at = %ends_at,
                        "Debiting unverified ACH account within grace period"
                    ),
                    Chargeability::AwaitingSweep => tracing::warn!(
                        payment_method_id = %id,
                        "Debiting ACH account whose grace period elapsed before verification ran"
                    ),
                }

                Ok(ResolvedSource {
                    transport: Transport::ServerDirect,
                    token: Some(GatewayToken::Storage(method.token.clone())),
                    account_token: None,
                    payment_method_id: Some(method.id.clone()),
                    owner: Some(method.owner),
                    guard: Some(guard),
                })
            }
        }
    }

    async fn follow_on(
        &self,
        kind: TransactionType,
        identity: &CallerIdentity,
        request: FollowOnRequest,
    ) -> Result<Receipt> {
        let creds = self.credentials(&identity.merchant_id)?;
        let fingerprint = RequestFingerprint {
            kind,
            merchant_id: identity.merchant_id.clone(),
            group_id: request.group_id.clone(),
            parent_id: request.parent_id.clone(),
            amount: request.amount.map(Money::from),
            currency: request.currency.clone(),
            source: None,
        };

        let chain_guard = self.chain_locks.lock(request.group_id.as_str()).await;
        if let Some(existing) = self.store(self.ledger.get(&request.id)).await? {
            drop(chain_guard);
            return self
                .replay(&creds, existing, &fingerprint)
                .await
                .map(PaymentOutcome::into_receipt);
        }

        let rows = self.store(self.ledger.group(&request.group_id)).await?;
        let chain = Chain::from_rows(request.group_id.clone(), rows);
        let now = self.clock.now();
        let plan = chain
            .plan_follow_on(
                kind,
                fingerprint.amount,
                request.parent_id.as_ref(),
                &identity.merchant_id,
                request.currency.as_ref(),
                now,
            )
            .inspect_err(|e| {
                tracing::info!(
                    transaction_id = %request.id,
                    group_id = %request.group_id,
                    kind = %kind,
                    reason = %e,
                    "Follow-on rejected"
                )
            })?;

        let mut tx = Transaction::pending(
            request.id.clone(),
            request.group_id.clone(),
            kind,
            identity.merchant_id.clone(),
            plan.amount,
            plan.currency,
            now,
        );
        tx.parent_id = Some(plan.parent_id);
        tx.customer_id = chain.origin().and_then(|o| o.customer_id.clone());
        tx.payment_method_id = plan.payment_method_id;

        let inserted = self.store(self.ledger.insert_if_absent(tx.clone())).await?;
        drop(chain_guard);
        if let InsertOutcome::Existing(existing) = inserted {
            return self
                .replay(&creds, existing, &fingerprint)
                .await
                .map(PaymentOutcome::into_receipt);
        }
        log_created(&tx);

        let wire = GatewayRequest::new(kind.into(), tx.transaction_number.as_str())
            .with_amount(tx.amount, tx.currency.clone())
            .with_token(GatewayToken::Financial(plan.token));
        let result = self.server_direct.execute(&creds, &wire).await;
        self.settle(&creds, tx, result).await
    }

    /// Answers a request whose id already exists. The stored result is
    /// returned as is; nothing is sent to the gateway again, except that a
    /// hosted entry still awaiting its callback gets a fresh access code.
    async fn replay(
        &self,
        creds: &MerchantCredentials,
        existing: Transaction,
        fingerprint: &RequestFingerprint,
    ) -> Result<PaymentOutcome> {
        if let Some(field) = fingerprint.first_mismatch(&existing) {
            tracing::warn!(transaction_id = %existing.id, field, "Replay with different parameters rejected");
            return Err(PaymentError::ReplayMismatch {
                id: existing.id,
                field,
            });
        }
        tracing::info!(
            transaction_id = %existing.id,
            status = ?existing.status(),
            "Replayed request; returning stored result"
        );

        if existing.is_approved() {
            self.save_if_requested(creds, &existing).await;
        }
        if !existing.is_resolved() && existing.transport == Transport::BrowserRedirect {
            let wire = GatewayRequest::new(existing.r#type.into(), existing.transaction_number.as_str())
                .with_amount(existing.amount, existing.currency.clone());
            let redirect = self.browser_redirect.prepare(creds, &wire).await?;
            return Ok(PaymentOutcome::RedirectRequired {
                receipt: self.receipt(&existing).await?,
                redirect,
            });
        }
        Ok(PaymentOutcome::Completed {
            receipt: self.receipt(&existing).await?,
        })
    }

    /// Records the result of a server-direct exchange. A provable
    /// non-delivery fails the row; anything else without a response leaves
    /// it pending for reconciliation.
    async fn settle(
        &self,
        creds: &MerchantCredentials,
        tx: Transaction,
        result: std::result::Result<GatewayResponse, TransportError>,
    ) -> Result<Receipt> {
        match result {
            Ok(response) => self.complete(creds, tx, response).await,
            Err(err) if !err.may_have_applied() => {
                tracing::warn!(transaction_id = %tx.id, error = %err, "Gateway request not delivered; transaction failed");
                let response = GatewayResponse::not_delivered(err.to_string(), self.clock.now());
                self.store(self.ledger.record_response(&tx.id, response, None)).await?;
                Err(PaymentError::Transport(err))
            }
            Err(err) => {
                tracing::error!(
                    transaction_id = %tx.id,
                    txn_number = %tx.transaction_number,
                    error = %err,
                    "Gateway outcome unknown; transaction left pending"
                );
                self.events
                    .publish(DomainEvent::OutcomeUnknown {
                        merchant_id: tx.merchant_id.clone(),
                        transaction_id: tx.id.clone(),
                    })
                    .await;
                Err(PaymentError::UnknownOutcome { id: tx.id })
            }
        }
    }

    /// Writes the first response for `tx`. A later response for the same
    /// row is ignored and the stored result returned.
    async fn complete(
        &self,
        creds: &MerchantCredentials,
        tx: Transaction,
        response: GatewayResponse,
    ) -> Result<Receipt> {
        let token = self.tokens.mint(&tx, &response);
        let outcome = self
            .store(self.ledger.record_response(&tx.id, response, token))
            .await?;
        let recorded = match outcome {
            RecordOutcome::AlreadyRecorded(existing) => {
                tracing::info!(transaction_id = %existing.id, "Transaction already resolved; keeping first response");
                return self.receipt(&existing).await;
            }
            RecordOutcome::Recorded(recorded) => recorded,
        };

        if recorded.is_approved() {
            self.save_if_requested(creds, &recorded).await;
            if matches!(recorded.r#type, TransactionType::Sale | TransactionType::Capture) {
                self.touch_method(&recorded).await;
            }
            let receipt = self.receipt(&recorded).await?;
            tracing::info!(
                transaction_id = %recorded.id,
                kind = %recorded.r#type,
                amount = %recorded.amount,
                "Transaction approved"
            );
            self.events
                .publish(DomainEvent::TransactionApproved {
                    merchant_id: recorded.merchant_id.clone(),
                    receipt: receipt.clone(),
                })
                .await;
            Ok(receipt)
        } else {
            let receipt = self.receipt(&recorded).await?;
            tracing::info!(
                transaction_id = %recorded.id,
                kind = %recorded.r#type,
                response_code = ?receipt.response_code,
                "Transaction declined"
            );
            self.events
                .publish(DomainEvent::TransactionDeclined {
                    merchant_id: recorded.merchant_id.clone(),
                    receipt: receipt.clone(),
                })
                .await;
            Ok(receipt)
        }
    }

    /// Saves the method an approved row asked for. The payment itself has
    /// already succeeded, so failures here are logged and retried on the
    /// next replay rather than surfaced.
    async fn save_if_requested(&self, creds: &MerchantCredentials, tx: &Transaction) {
        let kind = match tx.r#type {
            TransactionType::PreNote => MethodKind::Ach,
            TransactionType::Authorize | TransactionType::Sale if tx.save_method => MethodKind::Card,
            _ => return,
        };
        if let Err(e) = self.save_method(creds, tx, kind).await {
            tracing::error!(transaction_id = %tx.id, error = %e, "Could not save payment method");
        }
    }

    async fn save_method(&self, creds: &MerchantCredentials, tx: &Transaction, kind: MethodKind) -> Result<()> {
        let (Some(id), Some(owner)) = (&tx.payment_method_id, &tx.customer_id) else {
            return Ok(());
        };
        let _owner_guard = self.method_locks.lock(&owner_key(&tx.merchant_id, owner)).await;
        let _guard = self.method_locks.lock(id.as_str()).await;
        if self.store(self.methods.get(id)).await?.is_some() {
            return Ok(());
        }

        let storage = self.tokens.promote(creds, tx).await?;
        let display = tx
            .response
            .as_ref()
            .map(|r| r.display.clone())
            .unwrap_or_default();
        let now = self.clock.now();
        let mut method = match kind {
            MethodKind::Card => PaymentMethod::card(tx.merchant_id.clone(), owner.clone(), storage, display, now),
            MethodKind::Ach => PaymentMethod::ach(tx.merchant_id.clone(), owner.clone(), storage, display, now),
        };
        method.id = id.clone();
        let existing = self
            .store(self.methods.list_for_owner(&tx.merchant_id, owner))
            .await?;
        method.is_default = !existing
            .iter()
            .any(|m| m.is_default && m.is_active && m.deleted_at.is_none());
        self.store(self.methods.store(method.clone())).await?;

        tracing::info!(
            transaction_id = %tx.id,
            payment_method_id = %method.id,
            kind = method.kind.as_str(),
            is_default = method.is_default,
            "Payment method saved"
        );
        self.events
            .publish(DomainEvent::PaymentMethodSaved {
                merchant_id: method.merchant_id.clone(),
                payment_method_id: method.id.clone(),
                kind: method.kind,
            })
            .await;
        Ok(())
    }

    async fn touch_method(&self, tx: &Transaction) {
        let Some(id) = &tx.payment_method_id else {
            return;
        };
        let now = self.clock.now();
        if let Err(e) = self.update_method(id, |m| m.touch(now)).await {
            tracing::warn!(payment_method_id = %id, error = %e, "Could not record method usage");
        }
    }

    /// Re-reads and rewrites one method under its lock.
    async fn update_method(
        &self,
        id: &PaymentMethodId,
        change: impl FnOnce(&mut PaymentMethod),
    ) -> Result<Option<PaymentMethod>> {
        let _guard = self.method_locks.lock(id.as_str()).await;
        let Some(mut method) = self.store(self.methods.get(id)).await? else {
            return Ok(None);
        };
        change(&mut method);
        self.store(self.methods.store(method.clone())).await?;
        Ok(Some(method))
    }

    async fn find_for_callback(&self, callback: &AuthenticatedCallback) -> Result<Transaction> {
        let number = &callback.transaction_number;
        let tx = self
            .store(self.ledger.find_by_number(number))
            .await?
            .ok_or_else(|| CallbackError::UnknownTransaction(number.clone()))
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected gateway notification"))?;
        if tx.merchant_id != callback.merchant_id {
            tracing::warn!(txn_number = %number, merchant_id = %callback.merchant_id, "Notification names another merchant's transaction");
            return Err(CallbackError::MerchantMismatch(number.clone()).into());
        }
        Ok(tx)
    }

    /// Receipt for `tx`. A method id reserved for saving is only reported
    /// once the method actually exists.
    async fn receipt(&self, tx: &Transaction) -> Result<Receipt> {
        let mut receipt = tx.receipt();
        if let Some(id) = &tx.payment_method_id
            && self.store(self.methods.get(id)).await?.is_none()
        {
            receipt.payment_method_id = None;
        }
        Ok(receipt)
    }

    fn credentials(&self, merchant_id: &MerchantId) -> Result<MerchantCredentials> {
        self.merchants
            .credentials(merchant_id)
            .ok_or_else(|| PaymentError::UnknownMerchant(merchant_id.to_string()))
    }

    async fn store<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        bounded(self.settings.store_timeout, op).await
    }
}

fn require_customer(identity: &CallerIdentity) -> Result<&CustomerId> {
    identity
        .customer_id
        .as_ref()
        .ok_or_else(|| ValidationError::MissingCustomer.into())
}

fn owner_key(merchant_id: &MerchantId, owner: &CustomerId) -> String {
    format!("owner:{merchant_id}:{owner}")
}

fn log_created(tx: &Transaction) {
    tracing::info!(
        transaction_id = %tx.id,
        group_id = %tx.group_id,
        kind = %tx.r#type,
        amount = %tx.amount,
        txn_number = %tx.transaction_number,
        "Transaction created"
    );
}
