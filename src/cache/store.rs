//! The store: key → cached-entry map with size accounting.
//!
//! Owns all cache state. `put` is capacity-guarded: it evicts LRU victims
//! until the new entry fits, so the size invariant (total accounted bytes
//! never exceeds the configured budget) holds after every insert. Expired
//! entries are treated as absent on read and swept by the periodic cleanup
//! pass.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::entry::{payload_len_sizer, CachedEntry, SizeOf};
use crate::cache::evictor::Evictor;

/// Outcome of a capacity-guarded insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The entry was inserted; the size invariant holds.
    Inserted,
    /// The object is larger than the whole cache budget and was not stored.
    /// The caller serves it directly (transparent pass-through).
    TooLarge,
}

/// Key → entry map with running totals. Not internally synchronized; the
/// service wraps it in a `tokio::sync::RwLock`.
pub struct Store {
    entries: HashMap<String, CachedEntry>,
    total_size_bytes: usize,
    max_size_bytes: usize,
    evictor: Evictor,
    sizer: SizeOf,
    /// Reference instant for last-access stamps.
    epoch: Instant,
}

impl Store {
    pub fn new(max_size_bytes: usize) -> Self {
        Self::with_sizer(max_size_bytes, payload_len_sizer())
    }

    pub fn with_sizer(max_size_bytes: usize, sizer: SizeOf) -> Self {
        Self {
            entries: HashMap::new(),
            total_size_bytes: 0,
            max_size_bytes,
            evictor: Evictor::new(),
            sizer,
            epoch: Instant::now(),
        }
    }

    /// Look up a live entry. Expired entries are treated as absent; a hit
    /// re-stamps the entry's last-access time.
    pub fn get(&self, key: &str, max_age: Duration) -> Option<&CachedEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now(), max_age) {
            return None;
        }
        entry.touch(self.epoch);
        Some(entry)
    }

    /// Whether a live (non-expired) entry exists for `key` without touching
    /// its access time. Used by the prefetcher to skip already-cached keys.
    pub fn contains_live(&self, key: &str, max_age: Duration) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired(Instant::now(), max_age))
            .unwrap_or(false)
    }

    /// Insert a payload, evicting LRU victims first if it would overflow the
    /// budget. Replacing an existing key is last-writer-wins: the old entry's
    /// size is released before the new one is accounted.
    pub fn put(&mut self, key: &str, payload: Bytes, compressed: bool, is_prefetched: bool) -> PutOutcome {
        let size = (self.sizer)(&payload);
        if size > self.max_size_bytes {
            debug!(key, size, budget = self.max_size_bytes, "Object exceeds cache budget, not stored");
            return PutOutcome::TooLarge;
        }

        // Release the previous entry for this key before accounting the new one.
        if let Some(old) = self.entries.remove(key) {
            self.total_size_bytes = self.total_size_bytes.saturating_sub(old.size_bytes);
        }

        if self.total_size_bytes + size > self.max_size_bytes {
            let needed = self.total_size_bytes + size - self.max_size_bytes;
            self.evict(needed);
        }

        let entry = CachedEntry::new(payload, compressed, size, self.epoch, is_prefetched);
        self.total_size_bytes += size;
        self.entries.insert(key.to_string(), entry);

        PutOutcome::Inserted
    }

    /// Evict LRU victims until at least `bytes_needed` is freed.
    fn evict(&mut self, bytes_needed: usize) {
        let victims = self
            .evictor
            .select_victims(self.entries.iter(), bytes_needed);

        for victim in victims {
            if let Some(entry) = self.entries.remove(&victim.key) {
                self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
                debug!(key = %victim.key, size = entry.size_bytes, "Evicted study");
            }
        }
    }

    /// Lazily drop an entry that has expired in place. Called from the miss
    /// path so stale entries do not linger until the next cleanup pass.
    pub fn remove_if_expired(&mut self, key: &str, max_age: Duration) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.is_expired(Instant::now(), max_age))
            .unwrap_or(false);
        if expired {
            self.remove(key)
        } else {
            false
        }
    }

    /// Remove a single entry.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
                true
            }
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.total_size_bytes = 0;
        info!(dropped, "Cache cleared");
    }

    /// Sweep expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now, max_age))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
            }
        }

        if !expired.is_empty() {
            info!(purged = expired.len(), "Cleanup pass removed expired studies");
        }
        expired.len()
    }

    /// Update the capacity budget. Existing entries are untouched; the new
    /// limit is observed by future inserts.
    pub fn set_max_size(&mut self, max_size_bytes: usize) {
        self.max_size_bytes = max_size_bytes;
    }

    /// Number of live entries (including not-yet-swept expired ones).
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Total accounted bytes.
    pub fn total_size_bytes(&self) -> usize {
        self.total_size_bytes
    }
}
