//! Cached entry types and payload sizing.
//!
//! A cached entry holds one study payload (opaque bytes) plus the bookkeeping
//! the store needs: computed size, insertion timestamp, last-access timestamp,
//! and whether the entry was populated speculatively by the prefetcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// Unique monotonic sequence number per insertion, used as the LRU tiebreaker
/// when two entries share a last-access timestamp.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Pluggable payload-sizing function. The default accounts the payload's
/// byte length; callers storing richer values can inject their own.
pub type SizeOf = Arc<dyn Fn(&Bytes) -> usize + Send + Sync>;

/// The default sizing function: the stored payload's length in bytes.
pub fn payload_len_sizer() -> SizeOf {
    Arc::new(|payload: &Bytes| payload.len())
}

/// What the consumer receives from a `get_study` call.
#[derive(Debug, Clone)]
pub struct Study {
    /// Opaque study identifier.
    pub key: String,

    /// The study payload, decompressed if the cache stored it compressed.
    pub data: Bytes,

    /// Whether this request was served from the cache.
    pub from_cache: bool,
}

/// A single cached study.
///
/// Entries are created on a cache miss after a successful fetch (or by the
/// prefetcher), re-stamped on every hit, and destroyed by age-based cleanup,
/// size-pressure eviction, or an explicit clear. The store owns all entries;
/// nothing outside the cache mutates them.
#[derive(Debug)]
pub struct CachedEntry {
    /// The stored payload, possibly zstd-compressed.
    pub payload: Bytes,

    /// Whether `payload` is compressed and must be decoded before serving.
    pub compressed: bool,

    /// Accounted size in bytes, as computed by the sizing function over the
    /// stored payload.
    pub size_bytes: usize,

    /// When this entry was inserted.
    pub cached_at: Instant,

    /// Milliseconds since the store epoch at last successful read. Atomic so
    /// a hit can re-stamp it under the store's read lock.
    last_accessed_ms: AtomicU64,

    /// Insertion order, breaks LRU ties between equal last-access stamps.
    pub seq: u64,

    /// Whether this entry was populated speculatively by the prefetcher.
    pub is_prefetched: bool,
}

impl CachedEntry {
    pub fn new(
        payload: Bytes,
        compressed: bool,
        size_bytes: usize,
        epoch: Instant,
        is_prefetched: bool,
    ) -> Self {
        let now = Instant::now();
        Self {
            payload,
            compressed,
            size_bytes,
            cached_at: now,
            last_accessed_ms: AtomicU64::new(millis_since(epoch, now)),
            seq: next_seq(),
            is_prefetched,
        }
    }

    /// Re-stamp the last-access time. Called on every successful read.
    pub fn touch(&self, epoch: Instant) {
        self.last_accessed_ms
            .store(millis_since(epoch, Instant::now()), Ordering::Relaxed);
    }

    /// Milliseconds since the store epoch at last access.
    pub fn last_accessed_ms(&self) -> u64 {
        self.last_accessed_ms.load(Ordering::Relaxed)
    }

    /// Age of this entry relative to `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cached_at)
    }

    /// Whether this entry has outlived the configured maximum age.
    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

fn millis_since(epoch: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(epoch).as_millis() as u64
}
