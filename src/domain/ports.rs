use super::ach::AchReturn;
use super::events::DomainEvent;
use super::identity::{CustomerId, MerchantCredentials, MerchantId};
use super::payment_method::{PaymentMethod, PaymentMethodId};
use super::token::FinancialToken;
use super::transaction::{GatewayResponse, Transaction, TransactionId, TransactionType};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of the atomic check-and-insert behind idempotency.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    Existing(Transaction),
}

/// Result of a write-once update on a transaction row.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(Transaction),
    AlreadyRecorded(Transaction),
}

impl RecordOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Recorded(tx) | Self::AlreadyRecorded(tx) => tx,
        }
    }
}

/// The authoritative transaction record.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Inserts `tx` unless a row with the same id exists, as one atomic
    /// store operation.
    async fn insert_if_absent(&self, tx: Transaction) -> Result<InsertOutcome>;
    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;
    async fn find_by_number(&self, transaction_number: &str) -> Result<Option<Transaction>>;
    /// Every row of a chain, in insertion order.
    async fn group(&self, group_id: &TransactionId) -> Result<Vec<Transaction>>;
    /// Stores the gateway response (and minted token) on a pending row.
    /// Rows that already carry a response are left untouched.
    async fn record_response(
        &self,
        id: &TransactionId,
        response: GatewayResponse,
        financial_token: Option<FinancialToken>,
    ) -> Result<RecordOutcome>;
    /// Write-once ACH return annotation.
    async fn record_return(&self, id: &TransactionId, ach_return: AchReturn) -> Result<RecordOutcome>;
    async fn list_by_type(&self, kind: TransactionType) -> Result<Vec<Transaction>>;
    async fn list_pending(&self) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    async fn store(&self, method: PaymentMethod) -> Result<()>;
    async fn get(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>>;
    async fn list_for_owner(&self, merchant_id: &MerchantId, owner: &CustomerId) -> Result<Vec<PaymentMethod>>;
    async fn list_pending_verification(&self) -> Result<Vec<PaymentMethod>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Read-only view of merchant gateway credentials; administration lives
/// elsewhere.
pub trait MerchantDirectory: Send + Sync {
    fn credentials(&self, merchant_id: &MerchantId) -> Option<MerchantCredentials>;
}

pub type SharedLedger = Arc<dyn TransactionLedger>;
pub type SharedMethodStore = Arc<dyn PaymentMethodStore>;
pub type SharedEvents = Arc<dyn EventPublisher>;
pub type SharedClock = Arc<dyn Clock>;
pub type SharedMerchants = Arc<dyn MerchantDirectory>;
