//! Integration tests for the fetch path: retry/backoff, permanent failures,
//! and single-flight coalescing, exercised through the public cache API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use study_cache::{CacheConfig, FetchError, Fetcher, RelatedKeysProvider, StudyCache};

/// Fails the first `failures` calls transiently, then succeeds.
struct FlakyFetcher {
    failures: u32,
    calls: AtomicU32,
    delay: Duration,
}

impl FlakyFetcher {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures: 0,
            calls: AtomicU32::new(0),
            delay,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FlakyFetcher {
    async fn fetch(&self, key: &str) -> Result<Bytes, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if key.starts_with("missing") {
            return Err(FetchError::Permanent(format!("study not found: {key}")));
        }
        if call < self.failures {
            return Err(FetchError::Transient("gateway timeout".into()));
        }
        Ok(Bytes::from(format!("pixels:{key}")))
    }
}

struct NoRelated;

#[async_trait]
impl RelatedKeysProvider for NoRelated {
    async fn related_keys(&self, _context_id: &str, _exclude_key: &str) -> Vec<String> {
        Vec::new()
    }
}

fn test_config() -> CacheConfig {
    let mut cfg = CacheConfig::default();
    cfg.retry.base_delay_ms = 100;
    cfg.prefetch.enabled = false;
    cfg
}

fn cache_with(fetcher: Arc<FlakyFetcher>) -> StudyCache {
    StudyCache::new(test_config(), fetcher, Arc::new(NoRelated))
}

#[tokio::test(start_paused = true)]
async fn test_two_transient_failures_then_success() {
    let fetcher = FlakyFetcher::new(2);
    let cache = cache_with(fetcher.clone());

    let start = Instant::now();
    let study = cache.get_study("study-7", "ctx").await.unwrap();

    assert_eq!(study.data, Bytes::from_static(b"pixels:study-7"));
    assert_eq!(fetcher.calls(), 3);
    // Backoff before attempts 2 and 3 must total at least base + 2x base.
    assert!(start.elapsed() >= Duration::from_millis(300));
    cache.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_propagate_transient_error() {
    let fetcher = FlakyFetcher::new(10);
    let cache = cache_with(fetcher.clone());

    let err = cache.get_study("study-7", "ctx").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(cache.get_metrics().await.entry_count, 0);
    cache.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_fails_fast() {
    let fetcher = FlakyFetcher::new(0);
    let cache = cache_with(fetcher.clone());

    let start = Instant::now();
    let err = cache.get_study("missing-1", "ctx").await.unwrap_err();

    assert!(!err.is_transient());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    cache.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_for_same_key_coalesce() {
    let fetcher = FlakyFetcher::slow(Duration::from_millis(80));
    let cache = cache_with(fetcher.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(
            async move { cache.get_study("study-7", "ctx").await },
        ));
    }
    for handle in handles {
        let study = handle.await.unwrap().unwrap();
        assert_eq!(study.data, Bytes::from_static(b"pixels:study-7"));
    }

    assert_eq!(fetcher.calls(), 1, "eight callers must share one fetch");
    cache.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_for_different_keys_do_not_serialize() {
    let fetcher = FlakyFetcher::slow(Duration::from_millis(80));
    let cache = cache_with(fetcher.clone());

    let a = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_study("study-a", "ctx").await })
    };
    let b = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_study("study-b", "ctx").await })
    };

    let start = Instant::now();
    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());

    assert_eq!(fetcher.calls(), 2);
    // Both fetches overlap; the pair takes one fetch's worth of time.
    assert!(start.elapsed() < Duration::from_millis(160));
    cache.shutdown();
}
