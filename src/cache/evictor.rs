//! Eviction policy: selects which entries to drop under size pressure.
//!
//! Strict least-recently-used: victims are chosen by ascending last-access
//! time, ties broken by insertion order. Clinicians re-view recent studies,
//! so recency approximates optimal retention; the O(n log n) sort is paid
//! only when an insert actually overflows the budget.

use crate::cache::entry::CachedEntry;

/// An eviction candidate, ordered oldest-access-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: String,
    pub last_accessed_ms: u64,
    pub seq: u64,
    pub size_bytes: usize,
}

/// The eviction policy engine.
#[derive(Debug, Default)]
pub struct Evictor;

impl Evictor {
    pub fn new() -> Self {
        Self
    }

    /// Select entries to evict, oldest-accessed first, until at least
    /// `bytes_needed` would be freed or the candidate pool is exhausted.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = (&'a String, &'a CachedEntry)>,
        bytes_needed: usize,
    ) -> Vec<EvictionCandidate> {
        let mut candidates: Vec<EvictionCandidate> = entries
            .map(|(key, entry)| EvictionCandidate {
                key: key.clone(),
                last_accessed_ms: entry.last_accessed_ms(),
                seq: entry.seq,
                size_bytes: entry.size_bytes,
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.last_accessed_ms
                .cmp(&b.last_accessed_ms)
                .then(a.seq.cmp(&b.seq))
        });

        let mut victims = Vec::new();
        let mut freed = 0usize;
        for candidate in candidates {
            if freed >= bytes_needed {
                break;
            }
            freed += candidate.size_bytes;
            victims.push(candidate);
        }

        victims
    }
}
