use super::TransportError;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for gateway calls.
///
/// A failed attempt is only repeated when doing so cannot double-apply the
/// request: it never reached the gateway, the call moves no money, or the
/// gateway is known to deduplicate transaction numbers (`retry_unconfirmed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_unconfirmed: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            retry_unconfirmed: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, err: &TransportError, replay_safe: bool) -> bool {
        match err {
            TransportError::NotDelivered(_) => true,
            TransportError::Rejected { .. } => false,
            TransportError::Status { status, .. } if (400..500).contains(status) => false,
            _ => replay_safe || self.retry_unconfirmed,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, replay_safe: bool, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && self.should_retry(&err, replay_safe) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(attempt, ?delay, error = %err, "Retrying gateway call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_undelivered_requests_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast()
            .run(false, |_| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TransportError::NotDelivered("refused".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_on_money_movement_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = fast()
            .run(false, |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Timeout)
                }
            })
            .await;
        assert_eq!(result, Err(TransportError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_when_gateway_dedupes() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retry_unconfirmed: true,
            ..fast()
        };
        let result: Result<(), _> = policy
            .run(false, |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Timeout)
                }
            })
            .await;
        assert_eq!(result, Err(TransportError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
