use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Retry policy for provider calls: total attempt budget plus a doubling
/// backoff capped at `max_backoff`. Non-retryable errors short-circuit
/// regardless of remaining attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `operation` under `policy`, sleeping between failed attempts.
pub async fn run_with_retry<F, Fut, T>(
    policy: RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(what, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) => {
                if !e.is_retryable() || attempt >= policy.max_attempts {
                    return Err(e);
                }
                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "attempt failed, retrying in {delay:?}"
                );
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_backoff);
            }
        }
    }
}
