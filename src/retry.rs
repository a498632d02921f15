//! Shared retry policy for network calls.
//!
//! Every request to the catalog, webplayback, license and CDM endpoints goes
//! through [`RetryPolicy::run`]. Attempts are separated by an exponential
//! backoff (`2^attempt` seconds by default) and only errors classified as
//! retryable by [`AmdlError::is_retryable`] are tried again.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{AmdlError, Result};

/// Backoff function: maps the zero-based index of a failed attempt to the
/// delay before the next one.
pub type Backoff = fn(u32) -> Duration;

/// `2^attempt` seconds.
pub fn exponential_backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: exponential_backoff,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: exponential_backoff,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = (self.backoff)(attempt);
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(error = %e, attempts = attempt + 1, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Convenience for the common case of running with the default policy.
pub async fn with_retry<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryPolicy::default().run(operation).await
}

/// Map a reqwest error into the retryable error variant.
pub(crate) fn network_error(url: &str) -> impl FnOnce(reqwest::Error) -> AmdlError + '_ {
    move |e| AmdlError::network(url, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Produces a genuine reqwest error without touching the network.
    async fn transport_error() -> AmdlError {
        let err = reqwest::Client::new()
            .get("http://[::1")
            .send()
            .await
            .unwrap_err();
        AmdlError::network("http://[::1", err)
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff(0), Duration::from_secs(1));
        assert_eq!(exponential_backoff(1), Duration::from_secs(2));
        assert_eq!(exponential_backoff(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_backoff() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let result = RetryPolicy::default()
            .run(|| {
                let calls = calls.clone();
                async move {
                    let seen = {
                        let mut calls = calls.lock().unwrap();
                        calls.push(start.elapsed());
                        calls.len()
                    };
                    if seen < 3 {
                        Err(transport_error().await)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_return_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::default()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport_error().await) }
            })
            .await;

        assert!(matches!(result, Err(AmdlError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AmdlError::License("no CONTENT key".into())) }
        })
        .await;

        assert!(matches!(result, Err(AmdlError::License(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
