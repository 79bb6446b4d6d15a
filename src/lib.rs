//! study-cache: bounded, size-aware cache for large remote imaging studies.
//!
//! One [`StudyCache`] instance serves many concurrent viewer sessions. A
//! request either hits the cache or triggers a retrying network fetch through
//! the injected [`Fetcher`]; inserts are capacity-guarded by LRU eviction, a
//! periodic task sweeps out aged entries, and after every served request the
//! studies a [`RelatedKeysProvider`] predicts are prefetched in the
//! background. Hit rate and load latency are exposed as a
//! [`MetricsSnapshot`].
//!
//! Payloads are opaque bytes: the cache tracks only their key and size and
//! never interprets the imaging data it stores.

pub mod cache;
pub mod config;

pub use cache::entry::{payload_len_sizer, SizeOf, Study};
pub use cache::fetcher::{FetchError, Fetcher};
pub use cache::metrics::MetricsSnapshot;
pub use cache::prefetcher::RelatedKeysProvider;
pub use cache::service::StudyCache;
pub use config::{CacheConfig, CacheConfigUpdate};
