use crate::domain::ach::AchReturn;
use crate::domain::identity::{CustomerId, MerchantId};
use crate::domain::payment_method::{PaymentMethod, PaymentMethodId, VerificationStatus};
use crate::domain::ports::{InsertOutcome, PaymentMethodStore, RecordOutcome, TransactionLedger};
use crate::domain::token::FinancialToken;
use crate::domain::transaction::{GatewayResponse, Transaction, TransactionId, TransactionType};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for transaction rows, keyed by transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping gateway transaction numbers to transaction ids.
pub const CF_TXN_NUMBERS: &str = "txn_numbers";
/// Column Family listing chain members, keyed by `group \0 created_at \0 id`.
pub const CF_GROUP_MEMBERS: &str = "group_members";
/// Column Family for saved payment methods.
pub const CF_PAYMENT_METHODS: &str = "payment_methods";

/// A persistent store implementation using RocksDB.
///
/// Implements both the transaction ledger and the payment method store on
/// one database. Read-check-write sequences hold `write_lock` and commit
/// through a single `WriteBatch`, so idempotent inserts and write-once
/// updates stay atomic.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_TRANSACTIONS, CF_TXN_NUMBERS, CF_GROUP_MEMBERS, CF_PAYMENT_METHODS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(&handle, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &'static str) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_key, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    fn transactions_sorted(&self) -> Result<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn put_transaction(&self, tx: &Transaction) -> Result<()> {
        let handle = self.cf(CF_TRANSACTIONS)?;
        self.db.put_cf(&handle, tx.id.as_str().as_bytes(), encode(tx)?)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

fn group_prefix(group_id: &TransactionId) -> Vec<u8> {
    let mut key = group_id.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

fn group_member_key(tx: &Transaction) -> Vec<u8> {
    let mut key = group_prefix(&tx.group_id);
    let nanos = tx.created_at.timestamp_nanos_opt().unwrap_or_default();
    key.extend_from_slice(&nanos.to_be_bytes());
    key.push(0);
    key.extend_from_slice(tx.id.as_str().as_bytes());
    key
}

#[async_trait]
impl TransactionLedger for RocksDBStore {
    async fn insert_if_absent(&self, tx: Transaction) -> Result<InsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let key = tx.id.as_str().as_bytes();
        if let Some(existing) = self.read::<Transaction>(CF_TRANSACTIONS, key)? {
            return Ok(InsertOutcome::Existing(existing));
        }

        let numbers = self.cf(CF_TXN_NUMBERS)?;
        if self
            .db
            .get_pinned_cf(&numbers, tx.transaction_number.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::internal(format!(
                "transaction number {} already in use",
                tx.transaction_number
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_TRANSACTIONS)?, key, encode(&tx)?);
        batch.put_cf(&numbers, tx.transaction_number.as_bytes(), key);
        batch.put_cf(&self.cf(CF_GROUP_MEMBERS)?, group_member_key(&tx), key);
        self.db.write(batch)?;

        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_str().as_bytes())
    }

    async fn find_by_number(&self, transaction_number: &str) -> Result<Option<Transaction>> {
        let numbers = self.cf(CF_TXN_NUMBERS)?;
        match self.db.get_cf(&numbers, transaction_number.as_bytes())? {
            Some(id) => self.read(CF_TRANSACTIONS, &id),
            None => Ok(None),
        }
    }

    async fn group(&self, group_id: &TransactionId) -> Result<Vec<Transaction>> {
        let members = self.cf(CF_GROUP_MEMBERS)?;
        let prefix = group_prefix(group_id);
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(&members, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, id) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(tx) = self.read(CF_TRANSACTIONS, &id)? {
                rows.push(tx);
            }
        }
        Ok(rows)
    }

    async fn record_response(
        &self,
        id: &TransactionId,
        response: GatewayResponse,
        financial_token: Option<FinancialToken>,
    ) -> Result<RecordOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut row: Transaction = self
            .read(CF_TRANSACTIONS, id.as_str().as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))?;
        if row.response.is_some() {
            return Ok(RecordOutcome::AlreadyRecorded(row));
        }
        row.updated_at = response.received_at;
        row.response = Some(response);
        row.financial_token = financial_token;
        self.put_transaction(&row)?;
        Ok(RecordOutcome::Recorded(row))
    }

    async fn record_return(&self, id: &TransactionId, ach_return: AchReturn) -> Result<RecordOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut row: Transaction = self
            .read(CF_TRANSACTIONS, id.as_str().as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))?;
        if row.ach_return.is_some() {
            return Ok(RecordOutcome::AlreadyRecorded(row));
        }
        row.updated_at = ach_return.received_at;
        row.ach_return = Some(ach_return);
        self.put_transaction(&row)?;
        Ok(RecordOutcome::Recorded(row))
    }

    async fn list_by_type(&self, kind: TransactionType) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions_sorted()?
            .into_iter()
            .filter(|tx| tx.r#type == kind)
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions_sorted()?
            .into_iter()
            .filter(|tx| !tx.is_resolved() && tx.deleted_at.is_none())
            .collect())
    }
}

#[async_trait]
impl PaymentMethodStore for RocksDBStore {
    async fn store(&self, method: PaymentMethod) -> Result<()> {
        let handle = self.cf(CF_PAYMENT_METHODS)?;
        self.db
            .put_cf(&handle, method.id.as_str().as_bytes(), encode(&method)?)?;
        Ok(())
    }

    async fn get(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>> {
        self.read(CF_PAYMENT_METHODS, id.as_str().as_bytes())
    }

    async fn list_for_owner(&self, merchant_id: &MerchantId, owner: &CustomerId) -> Result<Vec<PaymentMethod>> {
        let mut owned: Vec<PaymentMethod> = self
            .scan::<PaymentMethod>(CF_PAYMENT_METHODS)?
            .into_iter()
            .filter(|m| &m.merchant_id == merchant_id && &m.owner == owner)
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn list_pending_verification(&self) -> Result<Vec<PaymentMethod>> {
        let mut pending: Vec<PaymentMethod> = self
            .scan::<PaymentMethod>(CF_PAYMENT_METHODS)?
            .into_iter()
            .filter(|m| {
                m.is_active
                    && m.deleted_at.is_none()
                    && m.verification_status() == Some(VerificationStatus::Pending)
            })
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }
}
