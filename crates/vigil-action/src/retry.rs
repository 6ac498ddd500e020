//! Retry policy for adapter invocations.
//!
//! Transient failures are retried with exponential backoff up to
//! `max_attempts`; permanent failures get exactly one attempt; unclassified
//! failures get `unclassified_attempts`. Every attempt runs under a timeout,
//! and a timeout counts as transient.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use vigil_core::config::{OrchestratorConfig, RetryConfig};

use crate::error::AdapterError;
use crate::types::{AdapterOutput, ErrorClass};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub unclassified_attempts: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), &OrchestratorConfig::default())
    }
}

/// Result of running an operation under the policy.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub result: Result<AdapterOutput, AdapterError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl RetryOutcome {
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, orchestrator: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            backoff_base: Duration::from_millis(retry.backoff_base_ms),
            unclassified_attempts: retry.unclassified_attempts.max(1),
            attempt_timeout: Duration::from_secs(orchestrator.adapter_timeout_secs),
        }
    }

    /// Total attempts allowed once a failure of `class` has been seen.
    pub fn attempts_for(&self, class: ErrorClass) -> u32 {
        match class {
            ErrorClass::Transient => self.max_attempts,
            ErrorClass::Permanent => 1,
            ErrorClass::Unclassified => self.unclassified_attempts.min(self.max_attempts),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }

    /// Run `op` until it succeeds or the policy gives up.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<F, Fut>(&self, mut op: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<AdapterOutput, AdapterError>>,
    {
        let start = Instant::now();
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(r) => r,
                Err(_) => Err(AdapterError::transient(format!(
                    "timed out after {}s",
                    self.attempt_timeout.as_secs()
                ))),
            };

            match result {
                Ok(output) => {
                    return RetryOutcome {
                        result: Ok(output),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    }
                }
                Err(err) => {
                    if attempt >= self.attempts_for(err.class) {
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                            elapsed: start.elapsed(),
                        };
                    }
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, class = %err.class, delay_ms = delay.as_millis() as u64, error = %err.message, "Retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            unclassified_attempts: 2,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Fails with `errors` in order, then succeeds.
    fn scripted(errors: Vec<AdapterError>) -> (Arc<AtomicU32>, impl FnMut(u32) -> std::future::Ready<Result<AdapterOutput, AdapterError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move |_attempt: u32| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            std::future::ready(match errors.get(n) {
                Some(e) => Err(e.clone()),
                None => Ok(AdapterOutput::new("ok")),
            })
        };
        (calls, op)
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_then_success() {
        let (calls, op) = scripted(vec![AdapterError::transient("503"), AdapterError::transient("503")]);
        let outcome = policy().run(op).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retry_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff on the paused clock.
        assert_eq!(outcome.elapsed, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_bounded() {
        let (calls, op) = scripted(vec![AdapterError::transient("down"); 10]);
        let outcome = policy().run(op).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_single_attempt_no_delay() {
        let (calls, op) = scripted(vec![AdapterError::permanent("bad credentials")]);
        let outcome = policy().run(op).await;
        assert_eq!(outcome.result.as_ref().unwrap_err().class, ErrorClass::Permanent);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.retry_count(), 0);
        assert_eq!(outcome.elapsed, Duration::ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_retried_once() {
        let (calls, op) = scripted(vec![AdapterError::unclassified("?"); 5]);
        let outcome = policy().run(op).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let p = RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            ..policy()
        };
        let outcome = p
            .run(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok(AdapterOutput::new("ok"))
                }
            })
            .await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.elapsed, Duration::from_secs(6));
    }
}
