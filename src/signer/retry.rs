//! Bounded retry for calls to the key-management service.
//!
//! Only errors for which [`CloudPkiError::is_transient`] holds are retried.
//! The delay doubles per attempt from `initial_backoff`, is capped at
//! `max_backoff`, and gets 0–50% random jitter on top.

use std::time::Duration;

use rand::Rng;

use crate::error::{CloudPkiError, Result};
use crate::profile::RetryConfig;

/// Runs `operation` until it succeeds, fails permanently, or runs out of retries.
///
/// Returns the last error once `config.max_retries` retries are spent.
pub fn with_retry<T, F>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                if attempt > 0 && err.is_transient() {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "retries exhausted",
                    );
                }
                return Err(err);
            }
        }
    }
}

fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config
        .initial_backoff
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}

/// Classifies an HTTP status from the key service.
pub(crate) fn status_error(status: u16, body: &str) -> CloudPkiError {
    let message = format!("key service returned HTTP {status}: {body}");
    if status == 429 || (500..600).contains(&status) {
        CloudPkiError::remote_transient(message)
    } else {
        CloudPkiError::remote(message)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&fast(), "sign", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(CloudPkiError::remote_transient("503"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&fast(), "sign", || {
            calls.set(calls.get() + 1);
            Err(CloudPkiError::remote_transient("timeout"))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&fast(), "sign", || {
            calls.set(calls.get() + 1);
            Err(CloudPkiError::remote("permission denied"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
        };
        assert!(compute_backoff(&config, 0) <= Duration::from_millis(150));
        for attempt in 3..40 {
            assert!(compute_backoff(&config, attempt) <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error(429, "").is_transient());
        assert!(status_error(503, "").is_transient());
        assert!(!status_error(403, "").is_transient());
        assert!(!status_error(400, "").is_transient());
    }
}
