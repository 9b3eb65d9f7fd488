//! Tiered Cache Module
//!
//! One namespace: a sharded in-memory tier in front of a durable tier, with
//! read-through promotion and write-behind persistence.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::durable::{DurableRead, DurableTier};
use super::entry::version_accepts;
use super::locks::KeyLocks;
use super::sweep::SweepState;
use super::writer::{settle, AckReceiver, WriteQueue};
use super::{
    CacheEntry, CacheStats, Envelope, InvalidationBus, Lookup, MissReason, StatsSnapshot,
    Subscription, Validity, WriteOutcome, MAX_KEY_LENGTH, MAX_VALUE_SIZE,
};
use crate::clock::SharedClock;
use crate::config::NamespaceConfig;
use crate::error::{CacheError, Result};
use crate::storage::PersistentStore;

/// Durable keys validated per bulk read in `keys()`.
const KEYS_BATCH: usize = 128;

// == Memory Slot ==
/// A memory-tier slot. Tombstones mask the durable copy of a deleted key
/// until the write-behind queue has applied the delete.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Live(CacheEntry),
    Tombstone(u64),
}

impl Slot {
    pub(crate) fn is_tombstone(&self, seq: u64) -> bool {
        matches!(self, Slot::Tombstone(s) if *s == seq)
    }

    pub(crate) fn is_live_seq(&self, seq: u64) -> bool {
        matches!(self, Slot::Live(e) if e.seq == seq)
    }
}

pub(crate) type MemoryTier = DashMap<String, Slot>;

enum MemoryRead {
    Hit(Vec<u8>),
    Deleted,
    Invalid(Validity, u64),
    Vacant,
}

// == Tiered Cache ==
/// Byte-level cache for one namespace.
///
/// Must be constructed inside a Tokio runtime: it spawns the namespace's
/// write-behind task.
pub struct TieredCache {
    pub(super) config: NamespaceConfig,
    pub(super) schema_version: u32,
    pub(super) clock: SharedClock,
    pub(super) memory: Arc<MemoryTier>,
    pub(super) durable: Arc<DurableTier>,
    pub(super) writes: WriteQueue,
    locks: KeyLocks,
    /// Shared by ordinary mutations, taken exclusively by clear and by each sweep batch
    pub(super) gate: RwLock<()>,
    bus: Arc<InvalidationBus>,
    pub(super) stats: Arc<CacheStats>,
    seq: AtomicU64,
    pending_clears: AtomicUsize,
    clear_epoch: AtomicU64,
    pub(super) sweep_state: SweepState,
    pub(super) last_sweep_ms: AtomicU64,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("namespace", &self.config.name)
            .field("memory_slots", &self.memory.len())
            .finish()
    }
}

impl TieredCache {
    // == Constructor ==
    /// Creates the namespace cache.
    ///
    /// # Arguments
    /// * `config` - Namespace policy
    /// * `schema_version` - Entries written under any other schema are invalid
    /// * `store` - Durable backend, shared between namespaces
    /// * `envelope` - Cipher, required when the namespace is encrypted
    /// * `clock` - Time source for TTL decisions
    pub fn new(
        config: NamespaceConfig,
        schema_version: u32,
        store: Arc<dyn PersistentStore>,
        envelope: Option<Envelope>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;
        if config.encrypted && envelope.is_none() {
            return Err(CacheError::Config(format!(
                "namespace '{}' is encrypted but no key was provided",
                config.name
            )));
        }
        let envelope = envelope.filter(|_| config.encrypted);

        let memory = Arc::new(MemoryTier::new());
        let durable = Arc::new(DurableTier::new(
            &config.name,
            config.encrypted,
            store,
            envelope,
        ));
        let stats = Arc::new(CacheStats::new());
        let writes = WriteQueue::spawn(
            config.name.clone(),
            durable.clone(),
            memory.clone(),
            stats.clone(),
        );
        let now = clock.now_ms();

        Ok(Self {
            config,
            schema_version,
            clock,
            memory,
            durable,
            writes,
            locks: KeyLocks::default(),
            gate: RwLock::new(()),
            bus: InvalidationBus::new(),
            stats,
            seq: AtomicU64::new(0),
            pending_clears: AtomicUsize::new(0),
            clear_epoch: AtomicU64::new(0),
            sweep_state: SweepState::default(),
            last_sweep_ms: AtomicU64::new(now),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    // == Get ==
    /// Reads `key`: memory first, then the durable tier with promotion.
    ///
    /// Invalid, undecodable and undecryptable entries are purged and reported
    /// as misses; a failing durable tier degrades to a miss.
    pub async fn get(&self, key: &str) -> Lookup<Vec<u8>> {
        match self.memory_read(key, self.clock.now_ms()) {
            MemoryRead::Hit(value) => return self.hit(key, value, "memory"),
            MemoryRead::Deleted => return self.miss(key, MissReason::Absent),
            MemoryRead::Invalid(..) | MemoryRead::Vacant => {}
        }

        let _guard = self.locks.lock(key).await;
        let now = self.clock.now_ms();
        match self.memory_read(key, now) {
            MemoryRead::Hit(value) => return self.hit(key, value, "memory"),
            MemoryRead::Deleted => return self.miss(key, MissReason::Absent),
            MemoryRead::Invalid(validity, seq) => {
                self.memory.remove_if(key, |_, slot| slot.is_live_seq(seq));
                self.sweep_state.mark_dirty(key);
                self.writes.remove(key, None, false);
                self.stats.record_expirations(1);
                debug!(namespace = %self.name(), key = %key, ?validity, "Purged invalid entry");
                return self.miss(key, MissReason::Expired);
            }
            MemoryRead::Vacant => {}
        }

        if self.pending_clears.load(Ordering::SeqCst) > 0 {
            return self.miss(key, MissReason::Absent);
        }
        let epoch = self.clear_epoch.load(Ordering::SeqCst);

        match self.durable.load(key).await {
            Err(e) => {
                self.stats.record_storage_error();
                warn!(namespace = %self.name(), key = %key, error = %e, "Durable read failed, serving miss");
                self.miss(key, MissReason::StorageUnavailable)
            }
            Ok(DurableRead::Absent) => self.miss(key, MissReason::Absent),
            Ok(DurableRead::Corrupt(reason)) => {
                self.sweep_state.mark_dirty(key);
                self.writes.remove(key, None, false);
                self.stats.record_corrupt_purge();
                warn!(namespace = %self.name(), key = %key, reason = %reason, "Purged corrupt entry");
                self.miss(key, MissReason::Corrupt)
            }
            Ok(DurableRead::Found(mut entry)) => {
                if !entry.is_valid(now, self.schema_version) {
                    self.sweep_state.mark_dirty(key);
                    self.writes.remove(key, None, false);
                    self.stats.record_expirations(1);
                    debug!(namespace = %self.name(), key = %key, "Purged invalid durable entry");
                    return self.miss(key, MissReason::Expired);
                }
                if self.config.touch_on_read {
                    entry.touch(now);
                }
                let value = entry.value.clone();

                // A clear that started while we were reading wins.
                if self.clear_epoch.load(Ordering::SeqCst) == epoch
                    && self.pending_clears.load(Ordering::SeqCst) == 0
                {
                    if self.promotion_evicts(key, &entry) {
                        // Older than everything it would displace: served, then dropped
                        self.sweep_state.mark_dirty(key);
                        self.writes.remove(key, None, false);
                        self.stats.record_evictions(1);
                        debug!(namespace = %self.name(), key = %key, "Evicted oldest entry");
                    } else {
                        self.memory
                            .entry(key.to_string())
                            .or_insert(Slot::Live(entry));
                        self.stats.record_promotion();
                        self.enforce_entry_bound(key);
                    }
                }
                self.hit(key, value, "durable")
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - Serialized value
    /// * `ttl_ms` - Optional TTL (namespace default if None)
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<WriteOutcome> {
        self.write(key, value, ttl_ms, None).await
    }

    /// Stores `value` only if `version` is greater than the stored version.
    pub async fn set_versioned(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
        version: u64,
    ) -> Result<WriteOutcome> {
        self.write(key, value, ttl_ms, Some(version)).await
    }

    async fn write(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
        version: Option<u64>,
    ) -> Result<WriteOutcome> {
        validate_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }
        let ttl_ms = ttl_ms.unwrap_or(self.config.ttl_ms);
        if ttl_ms == 0 {
            return Err(CacheError::InvalidRequest("TTL must be positive".to_string()));
        }

        let _guard = self.locks.lock(key).await;
        let gate = self.gate.read().await;
        let now = self.clock.now_ms();

        if version.is_some() && self.durable_version_blocks(key, version, now).await {
            return Ok(self.stale(key, version));
        }

        let entry = CacheEntry::new(key, value, now, ttl_ms, self.schema_version)
            .with_version(version)
            .with_seq(self.next_seq())
            .with_encrypted(self.config.encrypted);
        let published = entry.value.clone();

        let fresh = match self.memory.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let stale = matches!(
                    slot.get(),
                    Slot::Live(existing) if existing.is_valid(now, self.schema_version)
                        && !version_accepts(existing.version, version)
                );
                if stale {
                    drop(slot);
                    return Ok(self.stale(key, version));
                }
                let fresh = !matches!(slot.get(), Slot::Live(_));
                slot.insert(Slot::Live(entry.clone()));
                fresh
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Live(entry.clone()));
                true
            }
        };

        if fresh {
            self.enforce_entry_bound(key);
        }
        self.sweep_state.mark_dirty(key);
        let pending = self.writes.put(entry, self.config.write_through);
        drop(gate);

        let outcome = self.resolve(pending).await;
        self.bus.publish(key, Some(&published));
        debug!(namespace = %self.name(), key = %key, ?outcome, "Entry stored");
        Ok(outcome)
    }

    /// With a cold memory tier, the durable copy decides whether a versioned
    /// write is stale.
    async fn durable_version_blocks(&self, key: &str, version: Option<u64>, now: u64) -> bool {
        if self.memory.contains_key(key) {
            return false;
        }
        match self.durable.load(key).await {
            Ok(DurableRead::Found(existing)) => {
                existing.is_valid(now, self.schema_version)
                    && !version_accepts(existing.version, version)
            }
            _ => false,
        }
    }

    fn stale(&self, key: &str, version: Option<u64>) -> WriteOutcome {
        self.stats.record_stale_write();
        debug!(namespace = %self.name(), key = %key, ?version, "Discarded stale versioned write");
        WriteOutcome::Stale
    }

    // == Delete ==
    /// Removes `key` from both tiers.
    pub async fn delete(&self, key: &str) -> WriteOutcome {
        let _guard = self.locks.lock(key).await;
        let gate = self.gate.read().await;

        let seq = self.next_seq();
        self.memory.insert(key.to_string(), Slot::Tombstone(seq));
        self.sweep_state.mark_dirty(key);
        let pending = self.writes.remove(key, Some(seq), self.config.write_through);
        drop(gate);

        let outcome = self.resolve(pending).await;
        self.bus.publish(key, None);
        debug!(namespace = %self.name(), key = %key, ?outcome, "Entry deleted");
        outcome
    }

    // == Has ==
    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_hit()
    }

    // == Keys ==
    /// Keys of all valid entries across both tiers, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.writes.flush().await;
        let now = self.clock.now_ms();

        let mut live = BTreeSet::new();
        let mut known = HashSet::new();
        for slot in self.memory.iter() {
            known.insert(slot.key().clone());
            if let Slot::Live(entry) = slot.value() {
                if entry.is_valid(now, self.schema_version) {
                    live.insert(slot.key().clone());
                }
            }
        }
        if self.pending_clears.load(Ordering::SeqCst) > 0 {
            return live.into_iter().collect();
        }

        let storage_keys = match self.durable.list_storage_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.stats.record_storage_error();
                warn!(namespace = %self.name(), error = %e, "Durable listing failed, returning memory keys");
                return live.into_iter().collect();
            }
        };
        let unknown: Vec<String> = storage_keys
            .into_iter()
            .filter(|sk| {
                self.durable
                    .user_key(sk)
                    .is_some_and(|key| !known.contains(key))
            })
            .collect();

        for chunk in unknown.chunks(KEYS_BATCH) {
            match self.durable.read_raw(chunk).await {
                Ok(records) => {
                    for (storage_key, raw) in records {
                        if let Ok(entry) = self.durable.decode(&storage_key, &raw) {
                            if entry.is_valid(now, self.schema_version) {
                                live.insert(entry.key);
                            }
                        }
                    }
                }
                Err(e) => {
                    self.stats.record_storage_error();
                    warn!(namespace = %self.name(), error = %e, "Durable bulk read failed");
                    break;
                }
            }
        }
        live.into_iter().collect()
    }

    // == Clear ==
    /// Removes every entry of the namespace from both tiers.
    pub async fn clear(&self) {
        self.pending_clears.fetch_add(1, Ordering::SeqCst);
        self.clear_epoch.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.write().await;
        let removed_memory = self
            .memory
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Live(_)))
            .count();
        self.memory.clear();
        self.sweep_state.note_clear();
        let pending = self.writes.clear();
        drop(gate);

        let removed_durable = match settle(pending).await {
            Ok(count) => count,
            Err(e) => {
                warn!(namespace = %self.name(), error = %e, "Durable clear failed");
                0
            }
        };
        self.pending_clears.fetch_sub(1, Ordering::SeqCst);

        if removed_memory + removed_durable > 0 {
            self.bus.publish_clear();
            info!(
                namespace = %self.name(),
                removed_memory,
                removed_durable,
                "Namespace cleared"
            );
        } else {
            debug!(namespace = %self.name(), "Clear on empty namespace");
        }
    }

    // == Subscribe ==
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: Fn(&str, Option<&[u8]>) + Send + Sync + 'static,
    {
        self.bus.subscribe(key, listener)
    }

    // == Stats ==
    pub fn stats(&self) -> StatsSnapshot {
        let (entries, bytes) = self
            .memory
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Live(entry) => Some(entry.size_bytes),
                Slot::Tombstone(_) => None,
            })
            .fold((0, 0), |(n, b), size| (n + 1, b + size));
        self.stats.snapshot(self.name(), entries, bytes)
    }

    /// Waits for queued durable writes to land.
    pub async fn flush(&self) {
        self.writes.flush().await;
    }

    /// Whether this namespace's sweep interval has elapsed at `now`.
    pub fn sweep_due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_sweep_ms.load(Ordering::SeqCst))
            >= self.config.sweep_interval_ms
    }

    /// Drops an entry whose bytes the typed layer could not decode.
    pub(crate) async fn purge_undecodable(&self, key: &str, raw: &[u8]) {
        let _guard = self.locks.lock(key).await;
        let _gate = self.gate.read().await;
        self.sweep_state.mark_dirty(key);
        let removed = self
            .memory
            .remove_if(key, |_, slot| matches!(slot, Slot::Live(e) if e.value == raw))
            .is_some();
        if removed || !self.memory.contains_key(key) {
            self.writes.remove(key, None, false);
        }
        self.stats.record_corrupt_purge();
        warn!(namespace = %self.name(), key = %key, "Purged undecodable entry");
    }

    // == Internals ==
    pub(super) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn memory_read(&self, key: &str, now: u64) -> MemoryRead {
        if self.config.touch_on_read {
            if let Some(mut slot) = self.memory.get_mut(key) {
                if let Slot::Live(entry) = slot.value_mut() {
                    if entry.is_valid(now, self.schema_version) {
                        entry.touch(now);
                    }
                }
            }
        }

        let Some(slot) = self.memory.get(key) else {
            return MemoryRead::Vacant;
        };
        match slot.value() {
            Slot::Tombstone(_) => MemoryRead::Deleted,
            Slot::Live(entry) => match entry.validity(now, self.schema_version) {
                Validity::Valid => MemoryRead::Hit(entry.value.clone()),
                invalid => MemoryRead::Invalid(invalid, entry.seq),
            },
        }
    }

    /// Whether admitting the promoted `entry` would make it one of the
    /// entries evicted to stay within `max_entries`.
    fn promotion_evicts(&self, key: &str, entry: &CacheEntry) -> bool {
        let age = entry.age_key();
        let (others, older) = self
            .memory
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Live(other) if slot.key() != key => Some(other.age_key() < age),
                _ => None,
            })
            .fold((0usize, 0usize), |(n, o), is_older| (n + 1, o + usize::from(is_older)));
        let excess = (others + 1).saturating_sub(self.config.max_entries);
        excess > 0 && older < excess
    }

    /// Evicts the oldest memory entries so that admitting `fresh_key` keeps
    /// the namespace within `max_entries`.
    ///
    /// Only memory slots are counted. After a cold start the durable tier may
    /// hold more valid keys than `max_entries` until the next sweep trims it.
    fn enforce_entry_bound(&self, fresh_key: &str) {
        let max = self.config.max_entries;
        if self.memory.len() <= max {
            return;
        }

        let mut live: Vec<((u64, u64), String)> = self
            .memory
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Live(entry) if slot.key() != fresh_key => {
                    Some((entry.age_key(), slot.key().clone()))
                }
                _ => None,
            })
            .collect();
        let total = live.len() + 1;
        if total <= max {
            return;
        }
        live.sort_unstable();

        let mut evicted = 0u64;
        for (age, victim) in live.into_iter().take(total - max) {
            let seq = self.next_seq();
            let replaced = match self.memory.get_mut(&victim) {
                Some(mut slot) => match slot.value() {
                    Slot::Live(entry) if entry.age_key() == age => {
                        *slot = Slot::Tombstone(seq);
                        true
                    }
                    _ => false,
                },
                None => false,
            };
            if replaced {
                self.sweep_state.mark_dirty(&victim);
                self.writes.remove(&victim, Some(seq), false);
                evicted += 1;
                debug!(namespace = %self.name(), key = %victim, "Evicted oldest entry");
            }
        }
        self.stats.record_evictions(evicted);
    }

    async fn resolve(&self, pending: Option<AckReceiver>) -> WriteOutcome {
        match pending {
            None => WriteOutcome::Queued,
            Some(rx) => match settle(rx).await {
                Ok(_) => WriteOutcome::Persisted,
                Err(_) => WriteOutcome::MemoryOnly,
            },
        }
    }

    fn hit(&self, key: &str, value: Vec<u8>, tier: &str) -> Lookup<Vec<u8>> {
        self.stats.record_hit();
        debug!(namespace = %self.name(), key = %key, tier, "Cache hit");
        Lookup::Hit(value)
    }

    fn miss(&self, key: &str, reason: MissReason) -> Lookup<Vec<u8>> {
        self.stats.record_miss();
        debug!(namespace = %self.name(), key = %key, ?reason, "Cache miss");
        Lookup::Miss(reason)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::cache::envelope::generate_key;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        cache: TieredCache,
    }

    fn fixture(config: NamespaceConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let envelope = config.encrypted.then(|| Envelope::new(&generate_key()));
        let cache = TieredCache::new(config, 1, store.clone(), envelope, clock.clone()).unwrap();
        Fixture {
            store,
            clock,
            cache,
        }
    }

    fn listings() -> NamespaceConfig {
        NamespaceConfig::new("listings").with_ttl_ms(60_000)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let f = fixture(listings());
        let outcome = f.cache.set("1", b"bike".to_vec(), None).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Queued);
        assert_eq!(f.cache.get("1").await, Lookup::Hit(b"bike".to_vec()));
        assert_eq!(f.cache.get("2").await, Lookup::Miss(MissReason::Absent));
    }

    #[tokio::test]
    async fn test_write_behind_reaches_durable_tier() {
        let f = fixture(listings());
        f.cache.set("1", b"bike".to_vec(), None).await.unwrap();
        f.cache.flush().await;
        assert!(f.store.raw_get("listings:1").is_some());
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let f = fixture(listings());
        f.cache.set("1", b"bike".to_vec(), Some(100)).await.unwrap();

        f.clock.advance(99);
        assert!(f.cache.has("1").await);
        f.clock.advance(1);
        assert_eq!(f.cache.get("1").await, Lookup::Miss(MissReason::Expired));
        assert!(!f.cache.has("1").await);
    }

    #[tokio::test]
    async fn test_expired_entry_purged_from_both_tiers() {
        let f = fixture(listings());
        f.cache.set("1", b"bike".to_vec(), Some(100)).await.unwrap();
        f.cache.flush().await;

        f.clock.advance(100);
        assert!(f.cache.get("1").await.is_miss());
        f.cache.flush().await;
        assert!(f.store.raw_get("listings:1").is_none());
        assert_eq!(f.cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_durable_hit_is_promoted() {
        let f = fixture(listings());
        f.cache.set("1", b"bike".to_vec(), None).await.unwrap();
        f.cache.flush().await;

        let cold =
            TieredCache::new(listings(), 1, f.store.clone(), None, f.clock.clone()).unwrap();
        assert_eq!(cold.get("1").await, Lookup::Hit(b"bike".to_vec()));
        assert_eq!(cold.stats().promotions, 1);
        assert_eq!(cold.stats().total_entries, 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_a_miss() {
        let f = fixture(listings());
        f.cache.set("1", b"bike".to_vec(), None).await.unwrap();
        f.cache.flush().await;

        let upgraded =
            TieredCache::new(listings(), 2, f.store.clone(), None, f.clock.clone()).unwrap();
        assert_eq!(upgraded.get("1").await, Lookup::Miss(MissReason::Expired));
        upgraded.flush().await;
        assert!(f.store.raw_get("listings:1").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_durable_record_is_purged() {
        let f = fixture(listings());
        f.store.raw_set("listings:1", b"\xff\xfe".to_vec());

        assert_eq!(f.cache.get("1").await, Lookup::Miss(MissReason::Corrupt));
        f.cache.flush().await;
        assert!(f.store.raw_get("listings:1").is_none());
        assert_eq!(f.cache.stats().corrupt_purges, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_tiers() {
        let f = fixture(listings());
        f.cache.set("1", b"bike".to_vec(), None).await.unwrap();
        f.cache.flush().await;

        f.cache.delete("1").await;
        assert_eq!(f.cache.get("1").await, Lookup::Miss(MissReason::Absent));
        f.cache.flush().await;
        assert!(f.store.raw_get("listings:1").is_none());
        assert_eq!(f.cache.memory.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let f = fixture(listings());
        f.cache.delete("ghost").await;
        assert!(f.cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_eager_eviction_drops_oldest() {
        let f = fixture(listings().with_max_entries(2));
        f.cache.set("a", b"1".to_vec(), None).await.unwrap();
        f.cache.set("b", b"2".to_vec(), None).await.unwrap();
        f.cache.set("c", b"3".to_vec(), None).await.unwrap();

        assert_eq!(f.cache.keys().await, vec!["b".to_string(), "c".to_string()]);
        assert!(f.cache.get("a").await.is_miss());
        assert_eq!(f.cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let f = fixture(listings().with_max_entries(2));
        f.cache.set("a", b"1".to_vec(), None).await.unwrap();
        f.cache.set("b", b"2".to_vec(), None).await.unwrap();
        f.cache.set("a", b"3".to_vec(), None).await.unwrap();

        assert_eq!(f.cache.keys().await.len(), 2);
        assert_eq!(f.cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_promoting_oldest_entry_into_full_tier_evicts_it() {
        let f = fixture(listings().with_max_entries(2));
        f.cache.set("old", b"0".to_vec(), None).await.unwrap();
        f.cache.flush().await;

        let cold =
            TieredCache::new(listings().with_max_entries(2), 1, f.store.clone(), None, f.clock.clone())
                .unwrap();
        f.clock.advance(100);
        cold.set("x", b"1".to_vec(), None).await.unwrap();
        f.clock.advance(1);
        cold.set("y", b"2".to_vec(), None).await.unwrap();

        assert_eq!(cold.get("old").await, Lookup::Hit(b"0".to_vec()));
        cold.flush().await;

        assert_eq!(cold.keys().await, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(cold.stats().total_entries, 2);
        assert_eq!(cold.stats().evictions, 1);
        assert!(f.store.raw_get("listings:old").is_none());
    }

    #[tokio::test]
    async fn test_promoting_newer_entry_evicts_oldest_resident() {
        let f = fixture(listings().with_max_entries(2));
        let cold =
            TieredCache::new(listings().with_max_entries(2), 1, f.store.clone(), None, f.clock.clone())
                .unwrap();
        cold.set("x", b"1".to_vec(), None).await.unwrap();
        f.clock.advance(1);
        cold.set("y", b"2".to_vec(), None).await.unwrap();

        f.clock.advance(1);
        f.cache.set("new", b"3".to_vec(), None).await.unwrap();
        f.cache.flush().await;

        assert_eq!(cold.get("new").await, Lookup::Hit(b"3".to_vec()));
        cold.flush().await;
        assert_eq!(cold.keys().await, vec!["new".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_union_of_tiers() {
        let f = fixture(listings());
        f.store.raw_set("listings:junk", b"junk".to_vec());
        f.cache.set("a", b"1".to_vec(), None).await.unwrap();
        f.cache.flush().await;

        let other = TieredCache::new(listings(), 1, f.store.clone(), None, f.clock.clone()).unwrap();
        other.set("b", b"2".to_vec(), Some(10)).await.unwrap();
        other.flush().await;
        f.clock.advance(10);

        assert_eq!(f.cache.keys().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_and_clear_again() {
        let f = fixture(listings());
        let notified = Arc::new(AtomicUsize::new(0));
        let seen = notified.clone();
        let _sub = f.cache.subscribe("a", move |_, value| {
            assert!(value.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
        });

        f.store.raw_set("other:a", b"keep".to_vec());
        f.cache.clear().await;
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        for key in ["b", "c"] {
            f.cache.set(key, b"v".to_vec(), None).await.unwrap();
        }
        f.cache.clear().await;
        f.cache.clear().await;

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(f.cache.keys().await.is_empty());
        assert!(f.store.raw_get("other:a").is_some());
    }

    #[tokio::test]
    async fn test_versioned_write_rejects_stale() {
        let f = fixture(listings());
        let first = f.cache.set_versioned("1", b"v2".to_vec(), None, 2).await.unwrap();
        let stale = f.cache.set_versioned("1", b"v1".to_vec(), None, 1).await.unwrap();
        let equal = f.cache.set_versioned("1", b"v2'".to_vec(), None, 2).await.unwrap();

        assert!(first.is_applied());
        assert_eq!(stale, WriteOutcome::Stale);
        assert_eq!(equal, WriteOutcome::Stale);
        assert_eq!(f.cache.get("1").await, Lookup::Hit(b"v2".to_vec()));
        assert_eq!(f.cache.stats().stale_writes, 2);
    }

    #[tokio::test]
    async fn test_versioned_write_checks_durable_copy() {
        let f = fixture(listings());
        f.cache.set_versioned("1", b"v5".to_vec(), None, 5).await.unwrap();
        f.cache.flush().await;

        let cold = TieredCache::new(listings(), 1, f.store.clone(), None, f.clock.clone()).unwrap();
        let outcome = cold.set_versioned("1", b"v4".to_vec(), None, 4).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Stale);
    }

    #[tokio::test]
    async fn test_write_through_waits_for_durable() {
        let f = fixture(listings().write_through());
        let outcome = f.cache.set("1", b"bike".to_vec(), None).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Persisted);
        assert!(f.store.raw_get("listings:1").is_some());
        assert_eq!(f.cache.delete("1").await, WriteOutcome::Persisted);
        assert!(f.store.raw_get("listings:1").is_none());
    }

    #[tokio::test]
    async fn test_storage_offline_degrades() {
        let f = fixture(listings().write_through());
        f.store.set_online(false);

        let outcome = f.cache.set("1", b"bike".to_vec(), None).await.unwrap();
        assert_eq!(outcome, WriteOutcome::MemoryOnly);
        assert_eq!(f.cache.get("1").await, Lookup::Hit(b"bike".to_vec()));
        assert_eq!(
            f.cache.get("2").await,
            Lookup::Miss(MissReason::StorageUnavailable)
        );
        assert!(f.cache.stats().storage_errors >= 2);
    }

    #[tokio::test]
    async fn test_encrypted_namespace_requires_envelope() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let result = TieredCache::new(
            NamespaceConfig::new("user-profile").encrypted(),
            1,
            store,
            None,
            clock,
        );
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_a_miss() {
        let config = NamespaceConfig::new("user-profile").encrypted();
        let key = generate_key();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));

        let cache = TieredCache::new(
            config.clone(),
            1,
            store.clone(),
            Some(Envelope::new(&key)),
            clock.clone(),
        )
        .unwrap();
        cache.set("me", b"{\"email\":\"a@b.c\"}".to_vec(), None).await.unwrap();
        cache.flush().await;

        let mut raw = store.raw_get("user-profile:me").unwrap();
        let mid = raw.len() / 2;
        raw[mid] = if raw[mid] == b'A' { b'B' } else { b'A' };
        store.raw_set("user-profile:me", raw);

        let cold =
            TieredCache::new(config, 1, store.clone(), Some(Envelope::new(&key)), clock).unwrap();
        assert_eq!(cold.get("me").await, Lookup::Miss(MissReason::Corrupt));
        cold.flush().await;
        assert!(store.raw_get("user-profile:me").is_none());
    }

    #[tokio::test]
    async fn test_notifications_follow_mutations() {
        let f = fixture(listings());
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = f.cache.subscribe("1", move |key, value| {
            sink.lock().push((key.to_string(), value.map(<[u8]>::to_vec)));
        });

        f.cache.set("1", b"a".to_vec(), None).await.unwrap();
        f.cache.set("2", b"x".to_vec(), None).await.unwrap();
        f.cache.delete("1").await;
        sub.unsubscribe();
        f.cache.set("1", b"b".to_vec(), None).await.unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                ("1".to_string(), Some(b"a".to_vec())),
                ("1".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_touch_on_read_extends_life() {
        let f = fixture(listings().with_ttl_ms(100).touch_on_read());
        f.cache.set("1", b"a".to_vec(), None).await.unwrap();

        f.clock.advance(80);
        assert!(f.cache.has("1").await);
        f.clock.advance(80);
        assert!(f.cache.has("1").await);
        f.clock.advance(100);
        assert!(!f.cache.has("1").await);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let f = fixture(listings());
        assert!(f.cache.set("", b"a".to_vec(), None).await.is_err());
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(f.cache.set(&long, b"a".to_vec(), None).await.is_err());
        assert!(f.cache.set("1", vec![0; MAX_VALUE_SIZE + 1], None).await.is_err());
        assert!(f.cache.set("1", b"a".to_vec(), Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_distinct_keys() {
        let f = fixture(listings());
        let cache = Arc::new(f.cache);
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..10 {
                    let key = format!("{i}-{j}");
                    cache.set(&key, vec![i as u8], None).await.unwrap();
                    assert!(cache.get(&key).await.is_hit());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.keys().await.len(), 160);
    }
}
