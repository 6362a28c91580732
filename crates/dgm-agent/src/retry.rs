//! Timeouts and bounded exponential backoff for external calls

use async_trait::async_trait;
use dgm_core::{AgentCode, DgmError, Result, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::runner::AgentRunner;

/// Per-call timeout plus retry budget for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting (useful in tests)
    pub fn none(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            timeout,
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            timeout: config.timeout(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Run `f` under `policy`
///
/// Each attempt is bounded by `policy.timeout` (a timeout becomes
/// `DgmError::Timeout`). Transient errors are retried up to
/// `policy.max_retries` times; anything else is returned immediately.
/// A rate limit carrying `retry-after` waits that long instead of the
/// exponential step, capped at `policy.max_backoff`.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(DgmError::Timeout(format!(
                "{} exceeded {:?}",
                operation_name, policy.timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let wait = match e.retry_after() {
                    Some(requested) => requested.min(policy.max_backoff),
                    None => policy.backoff_for(retries),
                };
                warn!(
                    "{} failed ({}). Waiting {:?} before retry {}/{}",
                    operation_name, e, wait, retries, policy.max_retries
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                debug!(
                    "{} giving up after {} retries: {}",
                    operation_name, retries, e
                );
                return Err(e);
            }
        }
    }
}

/// Wraps any runner with the retry policy
pub struct RetryingRunner<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: AgentRunner> RetryingRunner<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<R: AgentRunner> AgentRunner for RetryingRunner<R> {
    async fn run(&self, code: &AgentCode, input: &str) -> Result<String> {
        retry_with_backoff(&self.policy, "agent_runner", || {
            self.inner.run(code, input)
        })
        .await
    }
}
