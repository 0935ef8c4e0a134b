//! Gateway-facing half of the engine: the wire codec, request signing, and
//! the two transports (server-direct and browser-redirect) that carry the
//! same signed field sets.

pub mod browser_redirect;
pub mod codec;
pub mod http;
pub mod protocol;
pub mod retry;
pub mod server_direct;
pub mod signature;

use async_trait::async_trait;
use codec::FieldSet;
use std::sync::Arc;
use thiserror::Error;

/// Gateway endpoints the engine posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Synchronous server-direct processing.
    Direct,
    /// Access-code exchange preceding a hosted-page redirect.
    CodeExchange,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request was not delivered: {0}")]
    NotDelivered(String),
    #[error("timed out waiting for the gateway response")]
    Timeout,
    #[error("connection interrupted after the request was sent: {0}")]
    Interrupted(String),
    #[error("gateway answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("unreadable gateway response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Whether the gateway may have acted on the request. `false` only when
    /// it provably did not.
    pub fn may_have_applied(&self) -> bool {
        match self {
            Self::NotDelivered(_) | Self::Rejected { .. } => false,
            Self::Status { status, .. } => !(400..500).contains(status),
            Self::Timeout | Self::Interrupted(_) | Self::MalformedResponse(_) => true,
        }
    }
}

/// Carrier for signed field sets. The HTTP implementation lives in
/// [`http::HttpTransport`]; tests substitute their own.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn post(&self, endpoint: Endpoint, fields: &FieldSet) -> Result<FieldSet, TransportError>;
}

pub type SharedTransport = Arc<dyn GatewayTransport>;
