//! Error classification and bounded exponential backoff.
//!
//! Overload errors are retried up to `max_attempts` with the delay doubling
//! from `base_delay`. Network errors share that budget but are retried at
//! most `max_network_retries` times. Fatal errors return immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use parley_types::config::{RetryConfig, TimeoutConfig};
use parley_types::llm::{ErrorClass, LlmError};

/// Map a backend error to its retry class.
pub fn classify(error: &LlmError) -> ErrorClass {
    match error {
        LlmError::RateLimited { .. } | LlmError::Overloaded(_) | LlmError::Provider { .. } => {
            ErrorClass::RetryableOverload
        }
        LlmError::Network(_) | LlmError::Timeout { .. } | LlmError::Stream(_) => {
            ErrorClass::RetryableNetwork
        }
        LlmError::AuthenticationFailed
        | LlmError::Deserialization(_)
        | LlmError::ContextLengthExceeded { .. }
        | LlmError::InvalidRequest(_)
        | LlmError::UnsupportedCapability(_)
        | LlmError::Cancelled => ErrorClass::Fatal,
    }
}

/// A successful result and how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error once retrying gives up.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub class: ErrorClass,
    pub error: LlmError,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_network_retries: u32,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), &TimeoutConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_network_retries: retry.max_network_retries,
            attempt_timeout: timeouts.attempt(),
        }
    }

    /// Wait after the `attempt`-th failure: `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number. Each attempt is bounded by
    /// `attempt_timeout`, and both attempts and backoff waits end early when
    /// `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0u32;
        let mut network_retries = 0u32;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                result = tokio::time::timeout(self.attempt_timeout, op(attempt)) => {
                    result.unwrap_or_else(|_| {
                        Err(LlmError::Timeout {
                            timeout_ms: self.attempt_timeout.as_millis() as u64,
                        })
                    })
                }
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, "Generation succeeded after retry");
                    }
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            let class = classify(&error);
            let retryable = match class {
                ErrorClass::Fatal => false,
                ErrorClass::RetryableOverload => attempt < self.max_attempts,
                ErrorClass::RetryableNetwork => {
                    attempt < self.max_attempts && network_retries < self.max_network_retries
                }
            };
            if !retryable {
                return Err(RetryFailure {
                    attempts: attempt,
                    class,
                    error,
                });
            }
            if class == ErrorClass::RetryableNetwork {
                network_retries += 1;
            }

            let mut delay = self.delay_for(attempt);
            if let LlmError::RateLimited {
                retry_after_ms: Some(ms),
            } = &error
            {
                delay = delay.max(Duration::from_millis(*ms));
            }
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                class = %class,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying generation"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        class: ErrorClass::Fatal,
                        error: LlmError::Cancelled,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
