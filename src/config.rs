//! Engine configuration.
//!
//! Loaded from a TOML file whose string values may reference environment
//! variables as `$VAR` or `${VAR}`. A missing file means "all defaults".
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//!
//! [gateway]
//! server_direct_url = "https://gateway.example/api/direct"
//! code_exchange_url = "https://gateway.example/api/access-code"
//! hosted_page_url = "https://gateway.example/hosted"
//! callback_url = "https://payments.example/gateway/callback"
//! request_timeout_secs = 30
//! max_attempts = 3
//! retry_unconfirmed = false
//!
//! [ach]
//! grace_period_days = 3
//!
//! [merchants.acme]
//! site_id = "acme-web"
//! secret = "${ACME_GATEWAY_SECRET}"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the configuration file (default: `gatewaypay.toml`)
//! - `HOST` / `PORT`: override the bind address
//! - Merchant secrets referenced by `$VAR` in the file

use crate::application::engine::EngineSettings;
use crate::domain::identity::{MerchantCredentials, MerchantId};
use crate::gateway::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "gatewaypay.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid URL in gateway.{field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub ach: AchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Gateway credentials keyed by merchant id.
    #[serde(default)]
    pub merchants: BTreeMap<String, MerchantConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server_direct_url: String,
    pub code_exchange_url: String,
    pub hosted_page_url: String,
    /// Where the gateway posts browser-redirect results.
    pub callback_url: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Set only when the gateway deduplicates repeated transaction numbers.
    pub retry_unconfirmed: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_direct_url: "http://127.0.0.1:9400/direct".to_string(),
            code_exchange_url: "http://127.0.0.1:9400/access-code".to_string(),
            hosted_page_url: "http://127.0.0.1:9400/hosted".to_string(),
            callback_url: "http://127.0.0.1:8080/gateway/callback".to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            retry_unconfirmed: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Used when the gateway does not state a financial token expiry.
    pub financial_lifetime_days: i64,
    pub expiry_warning_days: i64,
    /// Pending rows older than this are reported for reconciliation.
    pub reconciliation_after_minutes: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            financial_lifetime_days: 365,
            expiry_warning_days: 30,
            reconciliation_after_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AchConfig {
    pub grace_period_days: i64,
}

impl Default for AchConfig {
    fn default() -> Self {
        Self { grace_period_days: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

#[derive(Clone, Deserialize)]
pub struct MerchantConfig {
    pub site_id: String,
    pub secret: String,
}

impl std::fmt::Debug for MerchantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantConfig")
            .field("site_id", &self.site_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    8080
}

/// Gateway endpoints, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoints {
    pub server_direct: Url,
    pub code_exchange: Url,
    pub hosted_page: Url,
    pub callback: Url,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            gateway: GatewayConfig::default(),
            tokens: TokenConfig::default(),
            ach: AchConfig::default(),
            store: StoreConfig::default(),
            merchants: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads from `path`, or from `CONFIG` / [`DEFAULT_CONFIG_PATH`] when no
    /// path is given. `HOST` and `PORT` override the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var("CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let content = if path.exists() {
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?
        } else {
            String::new()
        };

        let mut config = Self::from_toml(&content)?;

        if let Ok(host) = std::env::var("HOST")
            && let Ok(addr) = host.parse()
        {
            config.host = addr;
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse()
        {
            config.port = port;
        }

        Ok(config)
    }

    /// Parses TOML. No `HOST`/`PORT` overrides.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn endpoints(&self) -> Result<GatewayEndpoints, ConfigError> {
        let parse = |field: &'static str, raw: &str| {
            Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
        };
        Ok(GatewayEndpoints {
            server_direct: parse("server_direct_url", &self.gateway.server_direct_url)?,
            code_exchange: parse("code_exchange_url", &self.gateway.code_exchange_url)?,
            hosted_page: parse("hosted_page_url", &self.gateway.hosted_page_url)?,
            callback: parse("callback_url", &self.gateway.callback_url)?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.gateway.max_attempts.max(1),
            base_delay: Duration::from_millis(self.gateway.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.gateway.retry_max_delay_ms),
            retry_unconfirmed: self.gateway.retry_unconfirmed,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            financial_token_lifetime: chrono::Duration::days(self.tokens.financial_lifetime_days),
            expiry_warning: chrono::Duration::days(self.tokens.expiry_warning_days),
            reconciliation_after: chrono::Duration::minutes(self.tokens.reconciliation_after_minutes),
            ach_grace_period: chrono::Duration::days(self.ach.grace_period_days),
            store_timeout: Duration::from_secs(self.store.timeout_secs),
        }
    }

    /// Credentials for every merchant whose secret resolved. Merchants with
    /// an empty secret or an unset variable are skipped with a warning.
    pub fn merchant_credentials(&self) -> Vec<MerchantCredentials> {
        self.merchants
            .iter()
            .filter_map(|(merchant_id, merchant)| {
                let Some(secret) = resolve_secret(&merchant.secret) else {
                    tracing::warn!(
                        merchant_id = %merchant_id,
                        "Skipping merchant: secret not resolved (missing env var?)"
                    );
                    return None;
                };
                Some(MerchantCredentials::new(
                    MerchantId::new(merchant_id.as_str()),
                    merchant.site_id.as_str(),
                    secret,
                ))
            })
            .collect()
    }
}

/// Resolves a secret that is either a literal or a whole-value `$NAME` /
/// `${NAME}` reference to the environment. `None` when the result is empty
/// or the variable is unset.
fn resolve_secret(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let value = match raw.strip_prefix('$') {
        Some(reference) => {
            let name = reference
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .unwrap_or(reference);
            std::env::var(name).ok()?
        }
        None => raw.to_string(),
    };
    Some(value).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.gateway.request_timeout_secs, 30);
        assert_eq!(config.ach.grace_period_days, 3);
        assert_eq!(config.tokens.financial_lifetime_days, 365);
        assert!(!config.gateway.retry_unconfirmed);
        assert!(config.endpoints().is_ok());
    }

    #[test]
    fn test_env_expansion() {
        // SAFETY: test-local variable name, not read concurrently elsewhere.
        unsafe { std::env::set_var("GATEWAYPAY_TEST_SECRET", "s3cret") };
        let config = Config::from_toml(
            r#"
            [merchants.acme]
            site_id = "web"
            secret = "${GATEWAYPAY_TEST_SECRET}"

            [merchants.beta]
            site_id = "web"
            secret = "$GATEWAYPAY_TEST_UNSET_VAR"
            "#,
        )
        .unwrap();
        let creds = config.merchant_credentials();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].merchant_id, MerchantId::new("acme"));
        assert_eq!(creds[0].secret(), b"s3cret");
    }

    #[test]
    fn test_secret_resolution() {
        assert_eq!(resolve_secret(" literal "), Some("literal".to_string()));
        assert_eq!(resolve_secret(""), None);
        assert_eq!(resolve_secret("$GATEWAYPAY_NOPE_NOT_SET"), None);
        assert_eq!(resolve_secret("${GATEWAYPAY_NOPE_NOT_SET}"), None);
    }

    #[test]
    fn test_invalid_url_reported() {
        let config = Config::from_toml("[gateway]\nhosted_page_url = \"not a url\"").unwrap();
        assert!(matches!(
            config.endpoints(),
            Err(ConfigError::InvalidUrl { field: "hosted_page_url", .. })
        ));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = Config::from_toml("[gateway]\nmax_attempts = 0\nretry_unconfirmed = true").unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.retry_unconfirmed);
    }
}
