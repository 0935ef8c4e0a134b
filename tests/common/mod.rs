#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatewaypay::application::engine::{EngineServices, EngineSettings, GatewayOptions, PaymentEngine};
use gatewaypay::application::requests::OriginationRequest;
use gatewaypay::domain::identity::{CallerIdentity, MerchantCredentials, MerchantId};
use gatewaypay::domain::money::{Amount, Currency};
use gatewaypay::domain::identity::CustomerId;
use gatewaypay::domain::payment_method::{PaymentMethod, PaymentMethodId};
use gatewaypay::domain::ports::{PaymentMethodStore, SharedLedger, SharedMethodStore};
use gatewaypay::error::PaymentError;
use gatewaypay::domain::transaction::{PaymentSource, TransactionId};
use gatewaypay::gateway::codec::{FieldSet, fields};
use gatewaypay::gateway::retry::RetryPolicy;
use gatewaypay::gateway::{Endpoint, GatewayTransport, TransportError, signature};
use gatewaypay::infrastructure::clock::ManualClock;
use gatewaypay::infrastructure::events::BroadcastEventPublisher;
use gatewaypay::infrastructure::in_memory::{InMemoryLedger, InMemoryPaymentMethodStore};
use gatewaypay::infrastructure::merchants::StaticMerchantDirectory;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

pub const MERCHANT: &str = "acme";
pub const SECRET: &str = "acme-secret";
pub const OTHER_MERCHANT: &str = "globex";
pub const OTHER_SECRET: &str = "globex-secret";
pub const CUSTOMER: &str = "cust-1";
/// Amount the fake gateway always declines.
pub const DECLINE_AMOUNT: &str = "13.13";

pub fn credentials() -> Vec<MerchantCredentials> {
    vec![
        MerchantCredentials::new(MerchantId::new(MERCHANT), "acme-web", SECRET),
        MerchantCredentials::new(MerchantId::new(OTHER_MERCHANT), "globex-web", OTHER_SECRET),
    ]
}

/// In-process stand-in for the gateway. Approves everything except
/// [`DECLINE_AMOUNT`], echoes transaction numbers, signs its answers and
/// records every request it sees.
pub struct FakeGateway {
    secrets: HashMap<String, String>,
    calls: Mutex<Vec<FieldSet>>,
    faults: Mutex<VecDeque<TransportError>>,
    tokenization_fault: Mutex<Option<TransportError>>,
    token_expires_at: Mutex<Option<DateTime<Utc>>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            secrets: HashMap::from([
                (MERCHANT.to_string(), SECRET.to_string()),
                (OTHER_MERCHANT.to_string(), OTHER_SECRET.to_string()),
            ]),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(VecDeque::new()),
            tokenization_fault: Mutex::new(None),
            token_expires_at: Mutex::new(None),
        }
    }

    /// The next request fails with `err` instead of being answered.
    pub fn fail_next(&self, err: TransportError) {
        self.faults.lock().unwrap().push_back(err);
    }

    /// The next tokenization request fails with `err`.
    pub fn fail_next_tokenization(&self, err: TransportError) {
        *self.tokenization_fault.lock().unwrap() = Some(err);
    }

    pub fn set_token_expiry(&self, at: DateTime<Utc>) {
        *self.token_expires_at.lock().unwrap() = Some(at);
    }

    pub fn calls(&self) -> Vec<FieldSet> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Category codes of money-moving and tokenization requests, in order.
    pub fn categories(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.get(fields::CATEGORY).map(str::to_string))
            .collect()
    }

    pub fn last_call(&self) -> FieldSet {
        self.calls().pop().expect("no gateway calls")
    }

    fn answer(&self, endpoint: Endpoint, request: &FieldSet) -> FieldSet {
        let merchant = request.get(fields::MERCHANT_ID).unwrap_or_default();
        let txn_number = request.get(fields::TXN_NUMBER).unwrap_or_default();
        let category = request.get(fields::CATEGORY).unwrap_or_default();

        let mut response = FieldSet::new();
        response
            .insert(fields::MERCHANT_ID, merchant)
            .insert(fields::TXN_NUMBER, txn_number);

        if endpoint == Endpoint::CodeExchange {
            response
                .insert(fields::RESPONSE_CODE, "00")
                .insert(fields::ACCESS_CODE, format!("ac_{txn_number}"))
                .insert(fields::EXPIRES_IN, "600");
        } else if request.get(fields::AMOUNT) == Some(DECLINE_AMOUNT) {
            response
                .insert(fields::RESPONSE_CODE, "05")
                .insert(fields::MESSAGE, "Do not honor");
        } else {
            let token = match category {
                "TOKN" => format!("sto_{txn_number}"),
                _ => format!("fin_{txn_number}"),
            };
            response
                .insert(fields::RESPONSE_CODE, "00")
                .insert(fields::AUTH_CODE, "AUTH01")
                .insert(fields::MESSAGE, "Approved")
                .insert(fields::TOKEN, token);
            if category == "PNOT" {
                response
                    .insert(fields::BANK_NAME, "First Test Bank")
                    .insert(fields::LAST_FOUR, "6789");
            } else {
                response
                    .insert(fields::BRAND, "VISA")
                    .insert(fields::LAST_FOUR, "4242");
            }
            if let Some(at) = *self.token_expires_at.lock().unwrap() {
                response.insert(fields::TOKEN_EXPIRES_AT, at.to_rfc3339());
            }
        }

        if let Some(secret) = self.secrets.get(merchant) {
            signature::sign_in_place(secret.as_bytes(), &mut response).unwrap();
        }
        response
    }
}

#[async_trait]
impl GatewayTransport for FakeGateway {
    async fn post(&self, endpoint: Endpoint, request: &FieldSet) -> Result<FieldSet, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(fault) = self.faults.lock().unwrap().pop_front() {
            return Err(fault);
        }
        if request.get(fields::CATEGORY) == Some("TOKN")
            && let Some(fault) = self.tokenization_fault.lock().unwrap().take()
        {
            return Err(fault);
        }
        Ok(self.answer(endpoint, request))
    }
}

/// Signed, form-encoded notification as the gateway would post it.
pub fn signed_notification(merchant: &str, secret: &str, txn_number: &str, extra: &[(&str, &str)]) -> String {
    let mut set = FieldSet::new();
    set.insert(fields::MERCHANT_ID, merchant)
        .insert(fields::TXN_NUMBER, txn_number);
    for (key, value) in extra {
        set.insert(*key, *value);
    }
    signature::sign_in_place(secret.as_bytes(), &mut set).unwrap();
    set.encode()
}

/// Approval callback for a hosted-page entry.
pub fn approval_callback(txn_number: &str) -> String {
    signed_notification(
        MERCHANT,
        SECRET,
        txn_number,
        &[
            (fields::RESPONSE_CODE, "00"),
            (fields::AUTH_CODE, "HOSTED1"),
            (fields::MESSAGE, "Approved"),
            (fields::TOKEN, "fin_hosted"),
            (fields::BRAND, "MASTERCARD"),
            (fields::LAST_FOUR, "4444"),
        ],
    )
}

pub fn return_notification(txn_number: &str, code: &str) -> String {
    signed_notification(
        MERCHANT,
        SECRET,
        txn_number,
        &[
            (fields::RETURN_CODE, code),
            (fields::RETURN_DESCRIPTION, "returned by bank"),
        ],
    )
}

/// Method store whose next write can be made to time out.
#[derive(Default)]
pub struct FlakyMethodStore {
    inner: InMemoryPaymentMethodStore,
    fail_next_store: AtomicBool,
}

impl FlakyMethodStore {
    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentMethodStore for FlakyMethodStore {
    async fn store(&self, method: PaymentMethod) -> gatewaypay::error::Result<()> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(PaymentError::StoreTimeout);
        }
        self.inner.store(method).await
    }

    async fn get(&self, id: &PaymentMethodId) -> gatewaypay::error::Result<Option<PaymentMethod>> {
        self.inner.get(id).await
    }

    async fn list_for_owner(
        &self,
        merchant_id: &MerchantId,
        owner: &CustomerId,
    ) -> gatewaypay::error::Result<Vec<PaymentMethod>> {
        self.inner.list_for_owner(merchant_id, owner).await
    }

    async fn list_pending_verification(&self) -> gatewaypay::error::Result<Vec<PaymentMethod>> {
        self.inner.list_pending_verification().await
    }
}

pub struct Harness {
    pub engine: Arc<PaymentEngine>,
    pub gateway: Arc<FakeGateway>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<BroadcastEventPublisher>,
    pub ledger: SharedLedger,
    pub methods: SharedMethodStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryPaymentMethodStore::new()),
        )
    }

    pub fn with_stores(ledger: SharedLedger, methods: SharedMethodStore) -> Self {
        Self::build(ledger, methods, RetryPolicy::none())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self::build(
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryPaymentMethodStore::new()),
            retry,
        )
    }

    fn build(ledger: SharedLedger, methods: SharedMethodStore, retry: RetryPolicy) -> Self {
        let gateway = Arc::new(FakeGateway::new());
        let clock = Arc::new(ManualClock::default());
        let events = Arc::new(BroadcastEventPublisher::new(256));
        let services = EngineServices {
            ledger: ledger.clone(),
            methods: methods.clone(),
            events: events.clone(),
            clock: clock.clone(),
            merchants: Arc::new(StaticMerchantDirectory::new(credentials())),
            transport: gateway.clone(),
        };
        let options = GatewayOptions {
            retry,
            hosted_page_url: Url::parse("https://gateway.test/hosted").unwrap(),
            callback_url: Url::parse("https://payments.test/gateway/callback").unwrap(),
        };
        let engine = PaymentEngine::new(services, options, EngineSettings::default());
        Self {
            engine: Arc::new(engine),
            gateway,
            clock,
            events,
            ledger,
            methods,
        }
    }

    /// Gateway transaction number of a stored row.
    pub async fn txn_number(&self, id: &str) -> String {
        self.ledger
            .get(&TransactionId::new(id))
            .await
            .unwrap()
            .expect("transaction exists")
            .transaction_number
    }
}

pub fn merchant() -> CallerIdentity {
    CallerIdentity::merchant(MERCHANT)
}

pub fn customer() -> CallerIdentity {
    CallerIdentity::merchant(MERCHANT).with_customer(CUSTOMER)
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

fn origination(id: &str, value: Decimal, source: PaymentSource) -> OriginationRequest {
    OriginationRequest {
        id: TransactionId::new(id),
        amount: amount(value),
        currency: Currency::usd(),
        source,
        save_method: false,
    }
}

pub fn card(id: &str, value: Decimal) -> OriginationRequest {
    origination(id, value, PaymentSource::OneTime("ot_card".into()))
}

pub fn hosted(id: &str, value: Decimal) -> OriginationRequest {
    origination(id, value, PaymentSource::HostedEntry)
}

pub fn saved(id: &str, value: Decimal, method: &PaymentMethodId) -> OriginationRequest {
    origination(id, value, PaymentSource::Saved(method.clone()))
}
