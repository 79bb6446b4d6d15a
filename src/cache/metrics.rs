//! Cache access metrics: hit rate over a bounded window of recent accesses
//! and an exponential moving average of load latency.
//!
//! Recording is infallible and never blocks the request path beyond a short
//! uncontended lock; the mutex is never held across an await point.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::config::MetricsConfig;

/// Read-only view of the cache's health, returned by `get_metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Hits / total over the retained access window; 0.0 with no history.
    pub hit_rate: f64,

    /// Exponential moving average of demand-fetch latency in milliseconds.
    pub average_load_time_ms: f64,

    /// Live entries in the store at snapshot time.
    pub entry_count: usize,

    /// Total accounted bytes at snapshot time.
    pub total_size_bytes: usize,
}

struct State {
    /// Most recent accesses, true = hit. Capped at `history_len`.
    events: VecDeque<bool>,
    hits_in_window: usize,
    load_ema_ms: f64,
    samples: u64,
}

/// Hit/miss and latency recorder. One instance per cache.
pub struct CacheMetrics {
    history_len: usize,
    latency_alpha: f64,
    state: Mutex<State>,
}

impl CacheMetrics {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            history_len: config.history_len,
            latency_alpha: config.latency_alpha,
            state: Mutex::new(State {
                events: VecDeque::with_capacity(config.history_len),
                hits_in_window: 0,
                load_ema_ms: 0.0,
                samples: 0,
            }),
        }
    }

    pub fn record_hit(&self) {
        self.record_access(true);
    }

    pub fn record_miss(&self) {
        self.record_access(false);
    }

    fn record_access(&self, hit: bool) {
        let mut state = self.lock();
        if state.events.len() == self.history_len {
            if let Some(evicted) = state.events.pop_front() {
                if evicted {
                    state.hits_in_window -= 1;
                }
            }
        }
        state.events.push_back(hit);
        if hit {
            state.hits_in_window += 1;
        }
    }

    /// Fold a demand-fetch duration into the latency average. The first
    /// sample seeds the average directly.
    pub fn record_load_time(&self, elapsed: Duration) {
        let sample_ms = elapsed.as_secs_f64() * 1000.0;
        let mut state = self.lock();
        if state.samples == 0 {
            state.load_ema_ms = sample_ms;
        } else {
            state.load_ema_ms =
                state.load_ema_ms * (1.0 - self.latency_alpha) + sample_ms * self.latency_alpha;
        }
        state.samples += 1;
    }

    /// Snapshot the counters, combining them with the store's current shape.
    pub fn snapshot(&self, entry_count: usize, total_size_bytes: usize) -> MetricsSnapshot {
        let state = self.lock();
        let hit_rate = if state.events.is_empty() {
            0.0
        } else {
            state.hits_in_window as f64 / state.events.len() as f64
        };
        MetricsSnapshot {
            hit_rate,
            average_load_time_ms: state.load_ema_ms,
            entry_count,
            total_size_bytes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Metrics recording is infallible; a poisoned lock only means another
        // recorder panicked mid-update, and the counters are still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> CacheMetrics {
        CacheMetrics::new(&MetricsConfig::default())
    }

    #[test]
    fn test_hit_rate() {
        let m = metrics();
        for _ in 0..7 {
            m.record_hit();
        }
        for _ in 0..3 {
            m.record_miss();
        }
        let snap = m.snapshot(0, 0);
        assert!((snap.hit_rate - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_empty_history_is_zero() {
        let snap = metrics().snapshot(5, 1234);
        assert_eq!(snap.hit_rate, 0.0);
        assert_eq!(snap.average_load_time_ms, 0.0);
        assert_eq!(snap.entry_count, 5);
        assert_eq!(snap.total_size_bytes, 1234);
    }

    #[test]
    fn test_window_is_bounded() {
        let m = CacheMetrics::new(&MetricsConfig {
            history_len: 4,
            latency_alpha: 0.1,
        });
        // Four misses scroll out of the window, leaving only hits.
        for _ in 0..4 {
            m.record_miss();
        }
        for _ in 0..4 {
            m.record_hit();
        }
        let snap = m.snapshot(0, 0);
        assert_eq!(snap.hit_rate, 1.0);
    }

    #[test]
    fn test_latency_ema() {
        let m = metrics();
        m.record_load_time(Duration::from_millis(100));
        let snap = m.snapshot(0, 0);
        assert!((snap.average_load_time_ms - 100.0).abs() < 1e-9);

        m.record_load_time(Duration::from_millis(200));
        let snap = m.snapshot(0, 0);
        // 100 * 0.9 + 200 * 0.1
        assert!((snap.average_load_time_ms - 110.0).abs() < 1e-9);
    }
}
