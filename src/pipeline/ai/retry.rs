//! Retry-with-backoff around a single backend call.
//!
//! The policy is a plain value applied at the call site. Backoff sleeps on
//! the calling thread, so inside a pool only that worker waits.

use std::time::Duration;

use super::types::AiServiceError;
use super::BackendError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first. Zero means exactly one call.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub retryable: fn(&BackendError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            retryable: BackendError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Same schedule shape with no sleeping. For tests and local backends.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// `min(base_delay · base^attempt, max_delay)`, attempt counted from 0.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up. The last error is the one classified.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: impl FnMut() -> Result<T, BackendError>,
) -> Result<T, AiServiceError> {
    let mut attempt: u32 = 0;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if (policy.retryable)(&e) && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Backend call failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) if (policy.retryable)(&e) => {
                tracing::error!(operation, attempts = attempt + 1, error = %e, "Backend retries exhausted");
                return Err(AiServiceError::from_backend(&e, attempt + 1, true));
            }
            Err(e) => {
                tracing::error!(operation, error = %e, "Backend call failed (not retryable)");
                return Err(AiServiceError::from_backend(&e, attempt + 1, false));
            }
        }
    }
}
