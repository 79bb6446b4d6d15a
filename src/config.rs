//! Runtime configuration for study-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All cache knobs (capacity, entry age, retry/backoff, prefetch, compression)
//! live here. A [`CacheConfigUpdate`] can be merged into a live config; existing
//! entries are not retroactively resized or expired, only future evictions and
//! cleanup passes observe the new limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total bytes of cached payloads.
    pub max_cache_size_bytes: usize,

    /// Maximum entry age in minutes before it is treated as expired.
    pub max_entry_age_minutes: u64,

    /// How often the background cleanup pass runs, in seconds.
    pub cleanup_interval_secs: u64,

    /// Fetch retry tuning.
    pub retry: RetryConfig,

    /// Prefetching settings.
    pub prefetch: PrefetchConfig,

    /// Compression settings.
    pub compression: CompressionConfig,

    /// Metrics settings.
    pub metrics: MetricsConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 512 * 1024 * 1024, // 512 MB
            max_entry_age_minutes: 30,
            cleanup_interval_secs: 300,
            retry: RetryConfig::default(),
            prefetch: PrefetchConfig::default(),
            compression: CompressionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Retry and backoff tuning for demand and prefetch fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum fetch attempts per request (first try included).
    pub max_attempts: u32,

    /// Backoff base unit in milliseconds. Attempt n (n >= 2) waits
    /// `base * 2^(n-1)` before firing, so 2x base, then 4x base.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Prefetch strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Whether related studies are prefetched after each request.
    pub enabled: bool,

    /// Maximum number of related keys prefetched per triggering request.
    pub limit: usize,

    /// Maximum in-flight prefetch fetches per triggering request.
    pub concurrency: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 3,
            concurrency: 2,
        }
    }
}

/// Payload compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Apply zstd compression to stored payloads.
    pub enabled: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            zstd_level: 3,
        }
    }
}

/// Metrics tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Number of recent access events retained for the hit-rate window.
    pub history_len: usize,

    /// Smoothing factor for the load-latency exponential moving average.
    pub latency_alpha: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_len: 1000,
            latency_alpha: 0.1,
        }
    }
}

/// Partial configuration, merged into a live [`CacheConfig`] by
/// `StudyCache::update_config`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfigUpdate {
    pub max_cache_size_bytes: Option<usize>,
    pub max_entry_age_minutes: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub retry: Option<RetryConfig>,
    pub prefetch: Option<PrefetchConfig>,
    pub compression: Option<CompressionConfig>,
}

impl CacheConfig {
    /// Load configuration from a JSON file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: CacheConfig = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(CacheConfig::default())
        }
    }

    /// Merge a partial update into this config.
    pub fn apply(&mut self, update: CacheConfigUpdate) {
        if let Some(v) = update.max_cache_size_bytes {
            self.max_cache_size_bytes = v;
        }
        if let Some(v) = update.max_entry_age_minutes {
            self.max_entry_age_minutes = v;
        }
        if let Some(v) = update.cleanup_interval_secs {
            self.cleanup_interval_secs = v;
        }
        if let Some(v) = update.retry {
            self.retry = v;
        }
        if let Some(v) = update.prefetch {
            self.prefetch = v;
        }
        if let Some(v) = update.compression {
            self.compression = v;
        }
    }

    /// Maximum entry age as a [`Duration`].
    pub fn max_entry_age(&self) -> Duration {
        Duration::from_secs(self.max_entry_age_minutes * 60)
    }

    /// Cleanup interval as a [`Duration`].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.prefetch.limit, 3);
        assert_eq!(cfg.metrics.history_len, 1000);
        assert_eq!(cfg.max_entry_age(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_apply_partial_update() {
        let mut cfg = CacheConfig::default();
        cfg.apply(CacheConfigUpdate {
            max_cache_size_bytes: Some(1024),
            prefetch: Some(PrefetchConfig {
                enabled: false,
                limit: 0,
                concurrency: 1,
            }),
            ..Default::default()
        });

        assert_eq!(cfg.max_cache_size_bytes, 1024);
        assert!(!cfg.prefetch.enabled);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.max_entry_age_minutes, 30);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let cfg = CacheConfig::load(std::path::Path::new("/nonexistent/study-cache.json")).unwrap();
        assert_eq!(cfg.max_cache_size_bytes, 512 * 1024 * 1024);
    }
}
