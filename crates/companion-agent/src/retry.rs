//! Retry wrapper for provider calls.
//!
//! 429 honors the `Retry-After` header when present, otherwise exponential
//! backoff from the base delay, doubling per attempt. 5xx always backs off
//! exponentially. Everything else propagates immediately.

use tracing::warn;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// Backoff delay for a given error at a given attempt, or `None` when
    /// the error is not retryable.
    pub fn delay_for(&self, err: &ProviderError, attempt: u32) -> Option<u64> {
        let backoff = self.base_delay_ms.saturating_mul(1 << attempt.min(16));
        match err {
            ProviderError::RateLimited { retry_after_ms } => {
                Some(retry_after_ms.unwrap_or(backoff))
            }
            ProviderError::Api { status, .. } if (500..=599).contains(status) => Some(backoff),
            _ => None,
        }
    }
}

/// Send with retries. The final error is propagated after `max_retries`
/// additional attempts.
pub async fn send_with_retry(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    policy: RetryPolicy,
) -> Result<ChatResponse, ProviderError> {
    let mut attempt: u32 = 0;
    loop {
        match provider.send(req).await {
            Ok(resp) => return Ok(resp),
            Err(err) => {
                let Some(delay_ms) = policy.delay_for(&err, attempt) else {
                    return Err(err);
                };
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                warn!(attempt, delay_ms, error = %err, "provider call failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}
