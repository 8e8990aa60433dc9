use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// How a failed provider call should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableError {
    /// 429 from the provider - back off the longest
    RateLimit,
    /// 5xx from the provider
    ServerError,
    /// Request timed out or the connection dropped
    Timeout,
    /// Anything else (bad request, bad key, unparseable body) - fail immediately
    Other,
}

impl RetryableError {
    /// Classify an HTTP status code returned by a provider
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => RetryableError::RateLimit,
            500..=599 => RetryableError::ServerError,
            408 => RetryableError::Timeout,
            _ => RetryableError::Other,
        }
    }
}

/// Retry schedule shared by the history and price providers.
///
/// The delay lists are indexed by retry attempt; running off the end of a
/// list stops retrying even if `max_attempts` has not been reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_attempts: u32,
    pub rate_limit_delays_ms: Vec<u64>,
    pub server_error_delays_ms: Vec<u64>,
    pub timeout_delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_delays_ms: vec![500, 1000, 2000],
            server_error_delays_ms: vec![300, 600, 1200],
            timeout_delays_ms: vec![500, 1000],
        }
    }
}

impl RetryConfig {
    /// A schedule that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            rate_limit_delays_ms: Vec::new(),
            server_error_delays_ms: Vec::new(),
            timeout_delays_ms: Vec::new(),
        }
    }

    fn delay_for(&self, attempt: u32, kind: RetryableError) -> Option<Duration> {
        let delays = match kind {
            RetryableError::RateLimit => &self.rate_limit_delays_ms,
            RetryableError::ServerError => &self.server_error_delays_ms,
            RetryableError::Timeout => &self.timeout_delays_ms,
            RetryableError::Other => return None,
        };

        delays
            .get(attempt as usize)
            .map(|&ms| Duration::from_millis(ms))
    }
}

/// Terminal outcome of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E: std::fmt::Display> {
    #[error("non-retryable failure: {0}")]
    NonRetryable(E),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E: std::fmt::Display> RetryError<E> {
    /// The error returned by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::NonRetryable(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable(_) => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// schedule in `config` is used up.
///
/// ```ignore
/// let page = retry_with_backoff(
///     || client.fetch_page(wallet, before.as_deref()),
///     &config.retry,
///     HeliusError::retry_class,
/// ).await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    classify: impl Fn(&E) -> RetryableError,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!("Provider call succeeded after {} retries", retries);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let kind = classify(&err);
        if kind == RetryableError::Other {
            error!("Provider call failed with non-retryable error: {}", err);
            return Err(RetryError::NonRetryable(err));
        }

        let delay = if retries < config.max_attempts {
            config.delay_for(retries, kind)
        } else {
            None
        };

        let Some(delay) = delay else {
            error!(
                "Provider call failed after {} attempts ({:?}): {}",
                retries + 1,
                kind,
                err
            );
            return Err(RetryError::Exhausted {
                attempts: retries + 1,
                last: err,
            });
        };

        warn!(
            "Provider call failed (attempt {}/{}, {:?}): {} - retrying in {}ms",
            retries + 1,
            config.max_attempts + 1,
            kind,
            err,
            delay.as_millis()
        );

        tokio::time::sleep(delay).await;
        retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct ProviderError(u16);

    impl std::fmt::Display for ProviderError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "HTTP {}", self.0)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            rate_limit_delays_ms: vec![1, 1, 1],
            server_error_delays_ms: vec![1, 1, 1],
            timeout_delays_ms: vec![1],
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(RetryableError::from_status(429), RetryableError::RateLimit);
        assert_eq!(RetryableError::from_status(503), RetryableError::ServerError);
        assert_eq!(RetryableError::from_status(408), RetryableError::Timeout);
        assert_eq!(RetryableError::from_status(401), RetryableError::Other);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_with_backoff(
            || async { Ok::<_, ProviderError>(7) },
            &fast_config(3),
            |e| RetryableError::from_status(e.0),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_once() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(ProviderError(401)) }
            },
            &fast_config(3),
            |e| RetryableError::from_status(e.0),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.into_inner().0, 401);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_from_rate_limit() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError(429))
                    } else {
                        Ok(n)
                    }
                }
            },
            &fast_config(3),
            |e| RetryableError::from_status(e.0),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_reports_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(ProviderError(502)) }
            },
            &fast_config(2),
            |e| RetryableError::from_status(e.0),
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.0, 502);
            }
            other => panic!("expected exhausted retries, got {:?}", other.map_err(|e| e.to_string())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_short_delay_list_stops_early() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(ProviderError(408)) }
            },
            &fast_config(3),
            |e| RetryableError::from_status(e.0),
        )
        .await;

        // one timeout delay configured => initial attempt + one retry
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
