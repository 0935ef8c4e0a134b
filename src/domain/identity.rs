use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantId(String);

impl MerchantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MerchantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope for money movement and transaction lookups.
pub const SCOPE_PAYMENTS: &str = "payments";
/// Scope for managing saved payment methods.
pub const SCOPE_METHODS: &str = "methods";

/// An already-authenticated caller. Authentication happens upstream and the
/// engine trusts this value as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub merchant_id: MerchantId,
    pub customer_id: Option<CustomerId>,
    pub scopes: BTreeSet<String>,
}

impl CallerIdentity {
    pub fn merchant(merchant_id: impl Into<String>) -> Self {
        Self {
            merchant_id: MerchantId::new(merchant_id),
            customer_id: None,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(CustomerId::new(customer_id));
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// An empty scope set means the authenticator did not narrow the caller.
    pub fn permits(&self, scope: &str) -> bool {
        self.scopes.is_empty() || self.scopes.contains(scope)
    }
}

/// Gateway credentials for one merchant.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct MerchantCredentials {
    pub merchant_id: MerchantId,
    pub site_id: String,
    secret: String,
}

impl MerchantCredentials {
    pub fn new(merchant_id: MerchantId, site_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            merchant_id,
            site_id: site_id.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

impl fmt::Debug for MerchantCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerchantCredentials")
            .field("merchant_id", &self.merchant_id)
            .field("site_id", &self.site_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
