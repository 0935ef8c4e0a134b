use crate::domain::ach::AchReturn;
use crate::domain::identity::{CustomerId, MerchantId};
use crate::domain::payment_method::{PaymentMethod, PaymentMethodId, VerificationStatus};
use crate::domain::ports::{InsertOutcome, PaymentMethodStore, RecordOutcome, TransactionLedger};
use crate::domain::token::FinancialToken;
use crate::domain::transaction::{GatewayResponse, Transaction, TransactionId, TransactionType};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    rows: HashMap<TransactionId, Transaction>,
    /// Insertion order, so groups and listings come back stable.
    order: Vec<TransactionId>,
    by_number: HashMap<String, TransactionId>,
    groups: HashMap<TransactionId, Vec<TransactionId>>,
}

impl LedgerState {
    fn collect<'a>(&'a self, ids: impl Iterator<Item = &'a TransactionId>) -> Vec<Transaction> {
        ids.filter_map(|id| self.rows.get(id)).cloned().collect()
    }
}

/// A thread-safe in-memory transaction ledger.
///
/// Every mutation runs under a single write lock, which makes
/// insert-if-absent and the write-once updates atomic.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new, empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn insert_if_absent(&self, tx: Transaction) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.rows.get(&tx.id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if state.by_number.contains_key(&tx.transaction_number) {
            return Err(PaymentError::internal(format!(
                "transaction number {} already in use",
                tx.transaction_number
            )));
        }
        state
            .by_number
            .insert(tx.transaction_number.clone(), tx.id.clone());
        state
            .groups
            .entry(tx.group_id.clone())
            .or_default()
            .push(tx.id.clone());
        state.order.push(tx.id.clone());
        state.rows.insert(tx.id.clone(), tx);
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.rows.get(id).cloned())
    }

    async fn find_by_number(&self, transaction_number: &str) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .by_number
            .get(transaction_number)
            .and_then(|id| state.rows.get(id))
            .cloned())
    }

    async fn group(&self, group_id: &TransactionId) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .get(group_id)
            .map(|ids| state.collect(ids.iter()))
            .unwrap_or_default())
    }

    async fn record_response(
        &self,
        id: &TransactionId,
        response: GatewayResponse,
        financial_token: Option<FinancialToken>,
    ) -> Result<RecordOutcome> {
        let mut state = self.state.write().await;
        let row = state
            .rows
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))?;
        if row.response.is_some() {
            return Ok(RecordOutcome::AlreadyRecorded(row.clone()));
        }
        row.updated_at = response.received_at;
        row.response = Some(response);
        row.financial_token = financial_token;
        Ok(RecordOutcome::Recorded(row.clone()))
    }

    async fn record_return(&self, id: &TransactionId, ach_return: AchReturn) -> Result<RecordOutcome> {
        let mut state = self.state.write().await;
        let row = state
            .rows
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))?;
        if row.ach_return.is_some() {
            return Ok(RecordOutcome::AlreadyRecorded(row.clone()));
        }
        row.updated_at = ach_return.received_at;
        row.ach_return = Some(ach_return);
        Ok(RecordOutcome::Recorded(row.clone()))
    }

    async fn list_by_type(&self, kind: TransactionType) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .collect(state.order.iter())
            .into_iter()
            .filter(|tx| tx.r#type == kind)
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .collect(state.order.iter())
            .into_iter()
            .filter(|tx| !tx.is_resolved() && tx.deleted_at.is_none())
            .collect())
    }
}

/// A thread-safe in-memory store for saved payment methods.
#[derive(Default, Clone)]
pub struct InMemoryPaymentMethodStore {
    methods: Arc<RwLock<HashMap<PaymentMethodId, PaymentMethod>>>,
}

impl InMemoryPaymentMethodStore {
    /// Creates a new, empty payment method store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentMethodStore for InMemoryPaymentMethodStore {
    async fn store(&self, method: PaymentMethod) -> Result<()> {
        let mut methods = self.methods.write().await;
        methods.insert(method.id.clone(), method);
        Ok(())
    }

    async fn get(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods.get(id).cloned())
    }

    async fn list_for_owner(&self, merchant_id: &MerchantId, owner: &CustomerId) -> Result<Vec<PaymentMethod>> {
        let methods = self.methods.read().await;
        let mut owned: Vec<_> = methods
            .values()
            .filter(|m| &m.merchant_id == merchant_id && &m.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn list_pending_verification(&self) -> Result<Vec<PaymentMethod>> {
        let methods = self.methods.read().await;
        let mut pending: Vec<_> = methods
            .values()
            .filter(|m| {
                m.is_active
                    && m.deleted_at.is_none()
                    && m.verification_status() == Some(VerificationStatus::Pending)
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }
}
