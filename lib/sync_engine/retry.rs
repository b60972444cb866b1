use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::{Classify, ErrorClass, RetryFailure};
use super::types::RetryPolicy;

/// Mutable bookkeeping for one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryState {
    attempt: u32,
    next_delay: Duration,
    classified_error: Option<ErrorClass>,
}

/// Runs one fallible async operation with capped exponential backoff.
///
/// Only errors classified as [`ErrorClass::Transient`] are retried. The delay after failed
/// attempt `n` (zero-based) is `min(initial_delay * 2^n, max_delay)`, without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.execute_counted(op).await.map(|(value, _)| value)
    }

    /// Like [`execute`](Self::execute), also returning how many attempts the success took.
    pub async fn execute_counted<T, E, F, Fut>(
        &self,
        mut op: F,
    ) -> Result<(T, u32), RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut state = RetryState {
            attempt: 0,
            next_delay: self.policy.initial_delay,
            classified_error: None,
        };

        loop {
            state.attempt += 1;
            let error = match op(state.attempt).await {
                Ok(value) => return Ok((value, state.attempt)),
                Err(error) => error,
            };

            let class = error.class();
            state.classified_error = Some(class);
            if class == ErrorClass::Fatal {
                return Err(RetryFailure::Fatal {
                    error,
                    attempts: state.attempt,
                });
            }
            if state.attempt > self.policy.max_retries {
                return Err(RetryFailure::Exhausted {
                    last_error: error,
                    attempts: state.attempt,
                });
            }

            state.next_delay = backoff_delay(&self.policy, state.attempt - 1);
            warn!(
                event = "retry_backoff",
                attempt = state.attempt,
                max_attempts = self.policy.max_retries + 1,
                delay_ms = state.next_delay.as_millis() as u64,
                error_class = state.classified_error.map_or("unknown", ErrorClass::as_str),
                error = %error,
                "transient failure, backing off before retry"
            );
            if !state.next_delay.is_zero() {
                tokio::time::sleep(state.next_delay).await;
            }
        }
    }
}

/// Delay before the retry that follows failed attempt `failed_attempt` (zero-based).
pub fn backoff_delay(policy: &RetryPolicy, failed_attempt: u32) -> Duration {
    let shift = failed_attempt.min(20);
    let exponential_ms = policy
        .initial_delay
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_delay.as_millis());
    Duration::from_millis(capped_ms.min(u64::MAX as u128) as u64)
}
