//! Flat key-value wire format shared by every gateway exchange.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field names used on the wire.
pub mod fields {
    pub const MERCHANT_ID: &str = "merchant_id";
    pub const SITE_ID: &str = "site_id";
    pub const TXN_NUMBER: &str = "txn_number";
    pub const CATEGORY: &str = "category";
    pub const AMOUNT: &str = "amount";
    pub const CURRENCY: &str = "currency";
    pub const TOKEN: &str = "token";
    pub const ACCOUNT_TOKEN: &str = "account_token";
    pub const CALLBACK_URL: &str = "callback_url";
    pub const ACCESS_CODE: &str = "access_code";
    pub const EXPIRES_IN: &str = "expires_in";
    pub const SIGNATURE: &str = "signature";

    pub const RESPONSE_CODE: &str = "response_code";
    pub const AUTH_CODE: &str = "auth_code";
    pub const MESSAGE: &str = "message";
    pub const TOKEN_EXPIRES_AT: &str = "token_expires_at";
    pub const LAST_FOUR: &str = "last_four";
    pub const BRAND: &str = "brand";
    pub const BANK_NAME: &str = "bank_name";
    pub const EXPIRY: &str = "expiry";

    pub const NOTIFICATION_TYPE: &str = "notification_type";
    pub const RETURN_CODE: &str = "return_code";
    pub const RETURN_DESCRIPTION: &str = "return_description";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("duplicate field {0:?}")]
    DuplicateField(String),
    #[error("empty field name")]
    EmptyKey,
    #[error("missing required field {0:?}")]
    MissingField(&'static str),
    #[error("invalid value for {field:?}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// An ordered set of wire fields. Keys are unique and kept sorted, which is
/// also the canonical order for signing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldSet(BTreeMap<String, String>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert_opt(&mut self, key: &str, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(value) = value {
            self.0.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &'static str) -> Result<&str, CodecError> {
        self.get(key).ok_or(CodecError::MissingField(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }

    pub fn decode(body: &str) -> Result<Self, CodecError> {
        let mut map = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(body.trim().as_bytes()) {
            if key.is_empty() {
                return Err(CodecError::EmptyKey);
            }
            if map.insert(key.to_string(), value.into_owned()).is_some() {
                return Err(CodecError::DuplicateField(key.into_owned()));
            }
        }
        Ok(Self(map))
    }

    /// Signing input: every field except the signature, sorted by key,
    /// `key=value` pairs joined by `&`, unescaped.
    pub fn canonical_string(&self) -> String {
        self.0
            .iter()
            .filter(|(k, _)| k.as_str() != fields::SIGNATURE)
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
