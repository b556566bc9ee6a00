//! Bounded retry with exponential backoff.
//!
//! The building service is best-effort, so each request gets a small
//! fixed number of attempts. Transient failures (timeouts, connection
//! errors, HTTP 429 and 5xx, truncated bodies) are retried after an
//! exponentially growing delay; anything else fails immediately. Once
//! the attempts are used up the last failure is reported as
//! [`BuildingError::DataSourceUnavailable`].

use std::future::Future;
use std::time::Duration;

use crate::BuildingError;

/// Default number of attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry. Doubles on every further retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Worth trying again.
    Transient(String),
    /// Retrying will not help.
    Permanent(String),
}

impl AttemptError {
    /// Classifies a request error.
    #[must_use]
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
            Self::Transient(format!("HTTP request error: {e}"))
        } else {
            Self::Permanent(format!("HTTP request error: {e}"))
        }
    }

    /// Classifies an unsuccessful HTTP status.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient(format!("HTTP {status}"))
        } else {
            Self::Permanent(format!("HTTP {status}"))
        }
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or the policy's
/// attempts are used up. The closure receives the 1-based attempt number.
///
/// # Errors
///
/// Returns [`BuildingError::DataSourceUnavailable`] carrying the last
/// failure message and the number of attempts made.
pub async fn with_retry<T, F, Fut>(
    service: &str,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, BuildingError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=max_attempts {
        if n > 1 {
            let delay = policy.delay_before(n);
            log::warn!(
                "{service}: retry {}/{} in {delay:?}...",
                n - 1,
                max_attempts - 1
            );
            tokio::time::sleep(delay).await;
        }

        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Transient(message)) => {
                log::warn!("{service} (attempt {n}/{max_attempts}): {message}");
                last_error = message;
            }
            Err(AttemptError::Permanent(message)) => {
                log::error!("{service} (attempt {n}/{max_attempts}): {message}, giving up");
                return Err(BuildingError::DataSourceUnavailable {
                    service: service.to_string(),
                    attempts: n,
                    message,
                });
            }
        }
    }

    log::error!("{service}: failed after {max_attempts} attempts, giving up");
    Err(BuildingError::DataSourceUnavailable {
        service: service.to_string(),
        attempts: max_attempts,
        message: last_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
    };

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = with_retry("stub", &FAST, |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(AttemptError::Transient("HTTP 503".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = with_retry("stub", &FAST, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AttemptError::Transient("connection reset".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            BuildingError::DataSourceUnavailable { attempts: 3, ref message, .. }
                if message == "connection reset"
        ));
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_retry("stub", &FAST, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AttemptError::Permanent("HTTP 400".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err,
            BuildingError::DataSourceUnavailable { attempts: 1, .. }
        ));
    }

    #[test]
    fn classifies_statuses() {
        assert!(matches!(
            AttemptError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            AttemptError::Transient(_)
        ));
        assert!(matches!(
            AttemptError::from_status(reqwest::StatusCode::GATEWAY_TIMEOUT),
            AttemptError::Transient(_)
        ));
        assert!(matches!(
            AttemptError::from_status(reqwest::StatusCode::BAD_REQUEST),
            AttemptError::Permanent(_)
        ));
    }
}
