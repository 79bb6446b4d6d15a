//! The study cache service: the public facade wiring store, fetcher, evictor,
//! prefetcher, compressor, and metrics together.
//!
//! One `StudyCache` per process is the expected composition, but nothing here
//! is global: configuration and both collaborators are injected at
//! construction, and the periodic cleanup task is owned by the instance (it
//! holds only a weak reference, so dropping the cache ends it).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::compressor::Compressor;
use crate::cache::entry::{payload_len_sizer, SizeOf, Study};
use crate::cache::fetcher::{fetch_with_retry, FetchError, Fetcher};
use crate::cache::metrics::{CacheMetrics, MetricsSnapshot};
use crate::cache::prefetcher::{Prefetcher, RelatedKeysProvider};
use crate::cache::store::{PutOutcome, Store};
use crate::config::{CacheConfig, CacheConfigUpdate};

/// Bounded, size-aware cache for remote studies. Cheap to clone; all clones
/// share one store, one metrics recorder, and one cleanup task.
#[derive(Clone)]
pub struct StudyCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<CacheConfig>,
    store: RwLock<Store>,
    metrics: CacheMetrics,
    fetcher: Arc<dyn Fetcher>,
    related: Arc<dyn RelatedKeysProvider>,
    /// Per-key gates serializing concurrent misses (single-flight).
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cleanup: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StudyCache {
    pub fn new(
        config: CacheConfig,
        fetcher: Arc<dyn Fetcher>,
        related: Arc<dyn RelatedKeysProvider>,
    ) -> Self {
        Self::with_sizer(config, fetcher, related, payload_len_sizer())
    }

    /// Construct with a custom payload-sizing function.
    pub fn with_sizer(
        config: CacheConfig,
        fetcher: Arc<dyn Fetcher>,
        related: Arc<dyn RelatedKeysProvider>,
        sizer: SizeOf,
    ) -> Self {
        let store = Store::with_sizer(config.max_cache_size_bytes, sizer);
        let metrics = CacheMetrics::new(&config.metrics);

        let inner = Arc::new(Inner {
            config: RwLock::new(config),
            store: RwLock::new(store),
            metrics,
            fetcher,
            related,
            inflight: Mutex::new(HashMap::new()),
            cleanup: std::sync::Mutex::new(None),
        });

        let handle = spawn_cleanup(&inner);
        *inner.cleanup.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

        Self { inner }
    }

    /// Fetch a study, serving from the cache when possible.
    ///
    /// On a hit the entry's access time is re-stamped and related studies are
    /// prefetched in the background. On a miss the fetch is retried with
    /// backoff, the result is inserted under the capacity guard, and the same
    /// prefetch is triggered. Abandoning the returned future cancels any
    /// pending retry and prevents the result from being inserted or counted.
    pub async fn get_study(&self, key: &str, context_id: &str) -> Result<Study, FetchError> {
        let cfg = self.inner.config.read().await.clone();

        if let Some(study) = self.inner.try_hit(key, &cfg).await {
            self.inner.metrics.record_hit();
            self.inner.spawn_prefetch(key, context_id);
            return Ok(study);
        }

        // Single-flight: misses for the same key queue up behind one gate so
        // N simultaneous callers trigger one underlying fetch.
        let gate = self.inner.inflight_gate(key).await;
        let _guard = gate.lock().await;

        // A queued caller may find the entry populated by the gate holder
        // that ran before it.
        if let Some(study) = self.inner.try_hit(key, &cfg).await {
            self.inner.metrics.record_hit();
            self.inner.spawn_prefetch(key, context_id);
            self.inner.release_gate(key, &gate).await;
            return Ok(study);
        }

        self.inner.metrics.record_miss();
        self.inner.store.write().await.remove_if_expired(key, cfg.max_entry_age());

        let started = Instant::now();
        let fetched = fetch_with_retry(self.inner.fetcher.as_ref(), key, &cfg.retry).await;

        let payload = match fetched {
            Ok(payload) => payload,
            Err(err) => {
                self.inner.release_gate(key, &gate).await;
                return Err(err);
            }
        };

        self.inner.metrics.record_load_time(started.elapsed());
        self.inner.insert(key, &payload, false, &cfg).await;
        self.inner.release_gate(key, &gate).await;
        self.inner.spawn_prefetch(key, context_id);

        Ok(Study {
            key: key.to_string(),
            data: payload,
            from_cache: false,
        })
    }

    /// Read-only snapshot of hit rate, load latency, and store shape.
    pub async fn get_metrics(&self) -> MetricsSnapshot {
        let store = self.inner.store.read().await;
        self.inner
            .metrics
            .snapshot(store.entry_count(), store.total_size_bytes())
    }

    /// Drop every cached study.
    pub async fn clear_cache(&self) {
        self.inner.store.write().await.clear();
    }

    /// Invalidate a single study. Returns whether an entry was removed.
    pub async fn remove(&self, key: &str) -> bool {
        self.inner.store.write().await.remove(key)
    }

    /// Merge a partial configuration update into the live config. Existing
    /// entries are not retroactively resized or expired; future inserts,
    /// evictions, and cleanup passes observe the new limits.
    pub async fn update_config(&self, update: CacheConfigUpdate) {
        let mut cfg = self.inner.config.write().await;
        cfg.apply(update);
        self.inner
            .store
            .write()
            .await
            .set_max_size(cfg.max_cache_size_bytes);
    }

    /// Current configuration.
    pub async fn config(&self) -> CacheConfig {
        self.inner.config.read().await.clone()
    }

    /// Stop the periodic cleanup task. Dropping the last `StudyCache` clone
    /// ends it too; this is for hosts that want a deterministic stop.
    pub fn shutdown(&self) {
        let handle = self
            .inner
            .cleanup
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Inner {
    /// Serve from the cache if a live entry exists. A corrupt compressed
    /// entry is dropped so the caller falls through to a fresh fetch.
    async fn try_hit(&self, key: &str, cfg: &CacheConfig) -> Option<Study> {
        let stored = {
            let store = self.store.read().await;
            store
                .get(key, cfg.max_entry_age())
                .map(|entry| (entry.payload.clone(), entry.compressed))
        };
        let (payload, compressed) = stored?;

        let compressor = Compressor::new(cfg.compression.clone());
        match compressor.decode(&payload, compressed) {
            Ok(data) => Some(Study {
                key: key.to_string(),
                data,
                from_cache: true,
            }),
            Err(err) => {
                warn!(key, error = %err, "Cached study failed to decompress, dropping entry");
                self.store.write().await.remove(key);
                None
            }
        }
    }

    /// Compress and insert a payload under the capacity guard. An object
    /// larger than the whole budget is not stored; the caller already holds
    /// the payload and serves it directly.
    async fn insert(&self, key: &str, payload: &Bytes, is_prefetched: bool, cfg: &CacheConfig) {
        let compressor = Compressor::new(cfg.compression.clone());
        let (stored, compressed) = compressor.encode(payload);

        let outcome = self
            .store
            .write()
            .await
            .put(key, stored, compressed, is_prefetched);
        if outcome == PutOutcome::TooLarge {
            debug!(key, size = payload.len(), "Study exceeds cache budget, serving uncached");
        }
    }

    async fn inflight_gate(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inflight.lock().await;
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the gate once no other caller shares it, so the in-flight map
    /// does not grow with every key ever requested.
    async fn release_gate(&self, key: &str, gate: &Arc<Mutex<()>>) {
        let mut map = self.inflight.lock().await;
        // Two strong refs: the map's and ours.
        if Arc::strong_count(gate) <= 2 {
            map.remove(key);
        }
    }

    /// Kick off a detached prefetch pass for studies related to `key`.
    /// Failures inside never reach the triggering request.
    fn spawn_prefetch(self: &Arc<Self>, key: &str, context_id: &str) {
        let inner = Arc::clone(self);
        let key = key.to_string();
        let context_id = context_id.to_string();
        tokio::spawn(async move {
            inner.run_prefetch(&key, &context_id).await;
        });
    }

    /// One prefetch pass: ask the provider for related keys, bound and filter
    /// them, fetch concurrently, and insert the successes as prefetched
    /// entries. Every failure is swallowed at debug level, and inserts from
    /// here never trigger further prefetching.
    async fn run_prefetch(&self, key: &str, context_id: &str) {
        let cfg = self.config.read().await.clone();
        let prefetcher = Prefetcher::new(cfg.prefetch.clone());
        if !prefetcher.enabled() {
            return;
        }

        let related = self.related.related_keys(context_id, key).await;
        let candidates = {
            let store = self.store.read().await;
            prefetcher.select_candidates(related, key, |k| {
                store.contains_live(k, cfg.max_entry_age())
            })
        };
        if candidates.is_empty() {
            return;
        }

        debug!(trigger = key, count = candidates.len(), "Prefetching related studies");

        futures::stream::iter(candidates)
            .for_each_concurrent(Some(prefetcher.concurrency()), |related_key| {
                let cfg = &cfg;
                async move {
                    match fetch_with_retry(self.fetcher.as_ref(), &related_key, &cfg.retry).await
                    {
                        Ok(payload) => {
                            self.insert(&related_key, &payload, true, cfg).await;
                            debug!(key = %related_key, "Prefetched study");
                        }
                        Err(err) => {
                            debug!(key = %related_key, error = %err, "Prefetch failed, ignoring");
                        }
                    }
                }
            })
            .await;
    }
}

/// Periodic cleanup: purge expired entries every `cleanup_interval`. The task
/// holds only a weak reference, so it exits when the cache is dropped; the
/// interval is re-read each pass so config updates are observed.
fn spawn_cleanup(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        loop {
            let interval = match weak.upgrade() {
                Some(inner) => inner.config.read().await.cleanup_interval(),
                None => break,
            };
            tokio::time::sleep(interval).await;

            match weak.upgrade() {
                Some(inner) => {
                    let max_age = inner.config.read().await.max_entry_age();
                    inner.store.write().await.purge_expired(max_age);
                }
                None => break,
            }
        }
    })
}
