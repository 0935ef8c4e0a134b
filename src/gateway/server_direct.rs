use super::codec::{FieldSet, fields};
use super::protocol::{GatewayRequest, parse_response};
use super::retry::RetryPolicy;
use super::signature;
use super::{Endpoint, SharedTransport, TransportError};
use crate::domain::identity::MerchantCredentials;
use crate::domain::ports::SharedClock;
use crate::domain::transaction::GatewayResponse;

/// Sends signed requests straight from the backend and waits for the
/// answer.
pub struct ServerDirectAdapter {
    transport: SharedTransport,
    retry: RetryPolicy,
    clock: SharedClock,
}

impl ServerDirectAdapter {
    pub fn new(transport: SharedTransport, retry: RetryPolicy, clock: SharedClock) -> Self {
        Self {
            transport,
            retry,
            clock,
        }
    }

    /// Signs and sends `request`. Declines come back as `Ok`; only transport
    /// level trouble is an error.
    pub async fn execute(
        &self,
        creds: &MerchantCredentials,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, TransportError> {
        let mut outbound = request.to_fields(creds);
        signature::sign_in_place(creds.secret(), &mut outbound)
            .map_err(|e| TransportError::NotDelivered(format!("could not sign request: {e}")))?;

        let replay_safe = !request.category.moves_money();
        let transport = &self.transport;
        let outbound = &outbound;
        let inbound = self
            .retry
            .run(replay_safe, move |attempt| {
                tracing::debug!(
                    txn_number = %request.transaction_number,
                    category = %request.category,
                    attempt,
                    "Posting server-direct request"
                );
                transport.post(Endpoint::Direct, outbound)
            })
            .await?;

        check_response(creds, request, &inbound)?;
        parse_response(&inbound, self.clock.now())
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }
}

fn check_response(
    creds: &MerchantCredentials,
    request: &GatewayRequest,
    inbound: &FieldSet,
) -> Result<(), TransportError> {
    if inbound.contains(fields::SIGNATURE) {
        signature::verify(creds.secret(), inbound)
            .map_err(|e| TransportError::MalformedResponse(format!("response signature: {e}")))?;
    }
    if let Some(echo) = inbound.get(fields::TXN_NUMBER)
        && echo != request.transaction_number
    {
        return Err(TransportError::MalformedResponse(format!(
            "response is for transaction number {echo}, expected {}",
            request.transaction_number
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::MerchantId;
    use crate::domain::money::{Currency, Money};
    use crate::gateway::protocol::Category;
    use crate::gateway::GatewayTransport;
    use crate::infrastructure::clock::SystemClock;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    struct Scripted {
        replies: Mutex<Vec<Result<FieldSet, TransportError>>>,
        seen: Mutex<Vec<FieldSet>>,
    }

    #[async_trait]
    impl GatewayTransport for Scripted {
        async fn post(&self, _endpoint: Endpoint, fields: &FieldSet) -> Result<FieldSet, TransportError> {
            self.seen.lock().unwrap().push(fields.clone());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn adapter(replies: Vec<Result<FieldSet, TransportError>>) -> (ServerDirectAdapter, Arc<Scripted>) {
        let transport = Arc::new(Scripted {
            replies: Mutex::new(replies),
            seen: Mutex::new(Vec::new()),
        });
        let policy = RetryPolicy {
            base_delay: std::time::Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        (
            ServerDirectAdapter::new(transport.clone(), policy, Arc::new(SystemClock)),
            transport,
        )
    }

    fn creds() -> MerchantCredentials {
        MerchantCredentials::new(MerchantId::new("m1"), "s1", "secret")
    }

    fn sale() -> GatewayRequest {
        GatewayRequest::new(Category::Sale, "T-1").with_amount(Money::new(dec!(10)), Currency::usd())
    }

    #[tokio::test]
    async fn test_request_is_signed() {
        let reply = FieldSet::new().with(fields::RESPONSE_CODE, "00");
        let (adapter, transport) = adapter(vec![Ok(reply)]);
        let response = adapter.execute(&creds(), &sale()).await.unwrap();
        assert!(response.is_approved());

        let seen = transport.seen.lock().unwrap();
        assert_eq!(signature::verify(b"secret", &seen[0]), Ok(()));
    }

    #[tokio::test]
    async fn test_forged_response_signature_rejected() {
        let reply = FieldSet::new()
            .with(fields::RESPONSE_CODE, "00")
            .with(fields::SIGNATURE, "00ff");
        let (adapter, _) = adapter(vec![Ok(reply)]);
        let err = adapter.execute(&creds(), &sale()).await.unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)));
        assert!(err.may_have_applied());
    }

    #[tokio::test]
    async fn test_echo_mismatch_rejected() {
        let reply = FieldSet::new()
            .with(fields::RESPONSE_CODE, "00")
            .with(fields::TXN_NUMBER, "T-2");
        let (adapter, _) = adapter(vec![Ok(reply)]);
        assert!(matches!(
            adapter.execute(&creds(), &sale()).await,
            Err(TransportError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_undelivered_sale_retried_then_answered() {
        let reply = FieldSet::new().with(fields::RESPONSE_CODE, "05");
        let (adapter, transport) = adapter(vec![
            Err(TransportError::NotDelivered("refused".into())),
            Ok(reply),
        ]);
        let response = adapter.execute(&creds(), &sale()).await.unwrap();
        assert_eq!(response.response_code, "05");
        assert_eq!(transport.seen.lock().unwrap().len(), 2);
    }
}
