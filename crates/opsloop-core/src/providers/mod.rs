// Vendor provider adapters
//
// Each adapter maps provider-agnostic turns onto one vendor's HTTP API and
// normalizes the response back into an AssistantReply. Adapters are
// non-streaming: one POST per call, with transient faults retried here so
// the engine never sees them.

use std::future::Future;
use tracing::warn;

use opsloop_reliability::RetryPolicy;

use crate::error::{Error, Result};

pub mod anthropic;
pub mod openai;
#[cfg(test)]
mod tests;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// One failed HTTP exchange, classified for the retry driver
pub(crate) struct HttpFault {
    pub message: String,
    pub retryable: bool,
}

impl HttpFault {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Rate limits and server-side faults are worth retrying; other client
/// errors are not
pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Drive `op` through the retry policy, sleeping between attempts.
///
/// Returns the first success, or a provider error once the fault is
/// non-retryable or attempts run out.
pub(crate) async fn send_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    vendor: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, HttpFault>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(fault) => {
                if !fault.retryable || !policy.has_attempts_remaining(attempt) {
                    return Err(Error::provider(format!("{vendor}: {}", fault.message)));
                }
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    vendor,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %fault.message,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
