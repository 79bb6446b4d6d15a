//! Study cache internals.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: CachedEntry, Study, payload sizing
//! - [`store`]: key → entry map with size accounting and capacity-guarded inserts
//! - [`evictor`]: LRU eviction policy
//! - [`fetcher`]: injected network accessor, error taxonomy, retry/backoff
//! - [`prefetcher`]: related-study prediction for speculative population
//! - [`compressor`]: optional zstd compression of stored payloads
//! - [`metrics`]: hit-rate window and load-latency average
//! - [`service`]: the [`service::StudyCache`] facade wiring it all together

pub mod compressor;
pub mod entry;
pub mod evictor;
pub mod fetcher;
pub mod metrics;
pub mod prefetcher;
pub mod service;
pub mod store;
