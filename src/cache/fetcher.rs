//! The network-fetch boundary: the injected `Fetcher` trait, the
//! transient/permanent error taxonomy, and the retry wrapper.
//!
//! Every fetch the cache issues — demand or prefetch — goes through
//! [`fetch_with_retry`]: up to `max_attempts` tries with exponential backoff,
//! retrying only transient failures. Failures are never cached.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Terminal fetch failure, as seen by the consumer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection resets, server overload. Retried.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Not-found, forbidden, malformed key. Fails fast, never retried.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Whether another attempt is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Network accessor for study payloads. Injected at cache construction; the
/// cache owns retry, caching, and prefetch policy on top of it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Bytes, FetchError>;
}

/// Fetch with retry and exponential backoff.
///
/// Attempt 1 fires immediately; attempt n (n >= 2) waits `base * 2^(n-1)`
/// first, so 2x base then 4x base at the default three attempts. Only
/// transient failures are retried; a permanent failure or an exhausted
/// budget propagates to the caller.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    key: &str,
    retry: &RetryConfig,
) -> Result<Bytes, FetchError> {
    let max_attempts = retry.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = Duration::from_millis(retry.base_delay_ms) * 2u32.pow(attempt - 1);
            debug!(key, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            sleep(delay).await;
        }

        match fetcher.fetch(key).await {
            Ok(payload) => return Ok(payload),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(key, attempt, error = %err, "Transient fetch failure, will retry");
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails with the scripted errors, then succeeds.
    struct ScriptedFetcher {
        failures: Vec<FetchError>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(failures: Vec<FetchError>) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _key: &str) -> Result<Bytes, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.failures.get(call) {
                Some(err) => Err(err.clone()),
                None => Ok(Bytes::from_static(b"study-bytes")),
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried_with_backoff() {
        let fetcher = ScriptedFetcher::new(vec![
            FetchError::Transient("timeout".into()),
            FetchError::Transient("503".into()),
        ]);

        let start = Instant::now();
        let result = fetch_with_retry(&fetcher, "s1", &fast_retry()).await;

        assert_eq!(result.unwrap(), Bytes::from_static(b"study-bytes"));
        assert_eq!(fetcher.calls(), 3);
        // Waited 2x base before attempt 2 and 4x base before attempt 3.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_fails_fast() {
        let fetcher = ScriptedFetcher::new(vec![FetchError::Permanent("not found".into())]);

        let result = fetch_with_retry(&fetcher, "s1", &fast_retry()).await;

        assert_eq!(result, Err(FetchError::Permanent("not found".into())));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let fetcher = ScriptedFetcher::new(vec![
            FetchError::Transient("timeout".into()),
            FetchError::Transient("timeout".into()),
            FetchError::Transient("timeout".into()),
        ]);

        let result = fetch_with_retry(&fetcher, "s1", &fast_retry()).await;

        assert!(matches!(result, Err(FetchError::Transient(_))));
        assert_eq!(fetcher.calls(), 3);
    }
}
