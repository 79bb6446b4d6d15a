//! Prefetching: after a study is served, anticipate which related studies the
//! viewer will open next and populate the cache for them in the background.
//!
//! The prefetcher only plans — it turns the provider's related-key list into a
//! bounded candidate set, skipping keys that are already cached. The service
//! executes the plan on a detached task; failures there are swallowed and
//! prefetched inserts never trigger further prefetching.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::config::PrefetchConfig;

/// Supplies the keys likely to be requested after the given one, e.g. the
/// other studies in the same patient context. Injected at cache construction.
#[async_trait]
pub trait RelatedKeysProvider: Send + Sync {
    async fn related_keys(&self, context_id: &str, exclude_key: &str) -> Vec<String>;
}

/// Bounds and filters prefetch candidates.
pub struct Prefetcher {
    config: PrefetchConfig,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Reduce the provider's related-key list to the keys worth fetching:
    /// deduplicated, never the triggering key, not already cached, and at
    /// most `limit` of them (provider order is preserved).
    pub fn select_candidates(
        &self,
        related: Vec<String>,
        exclude_key: &str,
        is_cached: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        if !self.config.enabled || self.config.limit == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        related
            .into_iter()
            .filter(|key| key != exclude_key)
            .filter(|key| seen.insert(key.clone()))
            .filter(|key| !is_cached(key))
            .take(self.config.limit)
            .collect()
    }
}
