use super::codec::FieldSet;
use super::{Endpoint, GatewayTransport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Form-encoded HTTP carrier for gateway requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    direct_url: Url,
    code_exchange_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(direct_url: Url, code_exchange_url: Url, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            direct_url,
            code_exchange_url,
            timeout,
        }
    }

    pub fn url_for(&self, endpoint: Endpoint) -> &Url {
        match endpoint {
            Endpoint::Direct => &self.direct_url,
            Endpoint::CodeExchange => &self.code_exchange_url,
        }
    }
}

/// Errors raised while sending. A connect failure means nothing reached the
/// gateway; anything later might have.
fn classify_send_error(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_builder() {
        TransportError::NotDelivered(err.to_string())
    } else if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Interrupted(err.to_string())
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn post(&self, endpoint: Endpoint, fields: &FieldSet) -> Result<FieldSet, TransportError> {
        let url = self.url_for(endpoint);
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(ACCEPT, FORM_CONTENT_TYPE)
            .timeout(self.timeout)
            .body(fields.encode())
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Interrupted(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        FieldSet::decode(&body).map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }
}
