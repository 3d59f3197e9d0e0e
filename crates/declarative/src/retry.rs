//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use crate::types::RetryConfig;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Sync {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until next attempt
    fn on_retry(
        &self,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: std::time::Duration,
    );
}

/// Callback that logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(
        &self,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: std::time::Duration,
    ) {
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {:.1}s...",
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

/// Execute a provider call with retry logic.
///
/// Only errors marked transient are retried; anything else is returned
/// immediately. Returns the last error once attempts are exhausted.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt + 1 >= max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, max_attempts, &e, delay);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::ZERO, 2.0)
    }

    #[test]
    fn test_transient_error_is_retried() {
        let calls = Cell::new(0);
        let result = with_retry(&fast(3), None, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok("vpc-1")
            }
        });
        assert_eq!(result.unwrap(), "vpc-1");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast(5), None, || {
            calls.set(calls.get() + 1);
            Err(ProviderError::permanent("invalid cidr"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast(4), None, || {
            calls.set(calls.get() + 1);
            Err(ProviderError::transient("timeout"))
        });
        assert_eq!(result.unwrap_err().message, "timeout");
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_no_retry_config() {
        let calls = Cell::new(0);
        let _: Result<(), _> = with_retry(&RetryConfig::no_retry(), None, || {
            calls.set(calls.get() + 1);
            Err(ProviderError::transient("timeout"))
        });
        assert_eq!(calls.get(), 1);
    }
}
