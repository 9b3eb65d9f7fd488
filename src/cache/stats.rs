//! Cache Statistics Module
//!
//! Tracks per-namespace counters including hits, misses, purges and evictions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Lock-free counters updated from concurrent callers.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    corrupt_purges: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    storage_errors: AtomicU64,
    stale_writes: AtomicU64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_corrupt_purge(&self) {
        self.corrupt_purges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_write(&self) {
        self.stale_writes.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Copies the counters together with current occupancy.
    pub fn snapshot(
        &self,
        namespace: &str,
        total_entries: usize,
        total_bytes: usize,
    ) -> StatsSnapshot {
        StatsSnapshot {
            namespace: namespace.to_string(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            corrupt_purges: self.corrupt_purges.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            total_entries,
            total_bytes,
        }
    }
}

// == Stats Snapshot ==
/// Point-in-time view of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub namespace: String,
    pub hits: u64,
    pub misses: u64,
    /// Entries purged for TTL or schema mismatch
    pub expirations: u64,
    /// Entries purged because they failed to decode or decrypt
    pub corrupt_purges: u64,
    /// Valid entries removed to respect size/count bounds
    pub evictions: u64,
    /// Durable hits copied into memory
    pub promotions: u64,
    pub storage_errors: u64,
    pub stale_writes: u64,
    /// Live entries in the memory tier
    pub total_entries: usize,
    /// Bytes held by live memory entries
    pub total_bytes: usize,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
