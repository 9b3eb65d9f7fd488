//! Maintenance sweep for one namespace.
//!
//! A sweep reads both tiers in batches, drops invalid and corrupt records,
//! then evicts oldest-first until the namespace fits its count and byte
//! bounds. The durable tier is rewritten as a bulk clear followed by a
//! write-back of the survivors. Keys mutated while the sweep runs are marked
//! dirty and re-flushed from memory at the end, so a concurrent set is never
//! lost and a concurrent delete is never resurrected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::tiered::Slot;
use super::{CacheEntry, TieredCache};
use crate::error::{CacheError, Result, StorageError};

// == Sweep Report ==
/// Outcome of one namespace sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub namespace: String,
    /// Distinct entries inspected across both tiers
    pub examined: usize,
    /// Removed for TTL or schema mismatch
    pub expired: usize,
    /// Removed because they failed to decode or decrypt
    pub corrupt: usize,
    /// Valid entries removed to satisfy the bounds
    pub evicted: usize,
    pub retained: usize,
    pub retained_bytes: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.corrupt + self.evicted
    }
}

/// Tracks keys mutated while a sweep is running.
#[derive(Debug, Default)]
pub(crate) struct SweepState {
    active: AtomicBool,
    /// Set when the namespace was cleared under a running sweep
    cleared: AtomicBool,
    dirty: Mutex<HashSet<String>>,
    running: tokio::sync::Mutex<()>,
}

impl SweepState {
    pub(crate) fn mark_dirty(&self, key: &str) {
        if self.active.load(Ordering::SeqCst) {
            self.dirty.lock().insert(key.to_string());
        }
    }

    /// Must be called with the gate held exclusively.
    pub(crate) fn note_clear(&self) {
        if self.active.load(Ordering::SeqCst) {
            self.cleared.store(true, Ordering::SeqCst);
        }
    }

    fn was_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.dirty.lock().clear();
        self.cleared.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    fn end(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.dirty.lock().clear();
    }

    fn is_dirty(&self, key: &str) -> bool {
        self.dirty.lock().contains(key)
    }

    fn dirty_keys(&self) -> Vec<String> {
        self.dirty.lock().iter().cloned().collect()
    }
}

/// A valid entry that may survive the sweep.
struct Candidate {
    entry: CacheEntry,
    in_memory: bool,
    /// Durable bytes, reused on write-back
    raw: Option<Vec<u8>>,
}

impl TieredCache {
    // == Sweep ==
    /// Runs one sweep, processing at most `batch_size` records per step and
    /// yielding to the runtime between steps.
    ///
    /// Concurrent sweeps of the same namespace are serialized. A storage
    /// failure aborts the sweep with [`CacheError::MaintenanceSweepFailure`];
    /// the namespace stays usable and the next sweep starts over.
    pub async fn sweep(&self, batch_size: usize) -> Result<SweepReport> {
        let _running = self.sweep_state.running.lock().await;
        let batch_size = batch_size.max(1);
        {
            let _gate = self.gate.write().await;
            self.sweep_state.begin();
        }
        let now = self.clock.now_ms();

        let result = self.sweep_cycle(batch_size, now).await;
        self.sweep_state.end();
        self.last_sweep_ms.store(now, Ordering::SeqCst);

        match result {
            Ok(report) => {
                if report.removed() > 0 {
                    info!(
                        namespace = %self.name(),
                        expired = report.expired,
                        corrupt = report.corrupt,
                        evicted = report.evicted,
                        retained = report.retained,
                        "Sweep removed entries"
                    );
                } else {
                    debug!(namespace = %self.name(), retained = report.retained, "Sweep found nothing to remove");
                }
                Ok(report)
            }
            Err(e) => {
                self.stats.record_storage_error();
                Err(CacheError::MaintenanceSweepFailure {
                    namespace: self.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn sweep_cycle(
        &self,
        batch_size: usize,
        now: u64,
    ) -> std::result::Result<SweepReport, StorageError> {
        self.writes.flush().await;
        let schema = self.schema_version;
        let mut report = SweepReport {
            namespace: self.name().to_string(),
            ..SweepReport::default()
        };

        // Memory snapshot
        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        let mut in_memory: HashSet<String> = HashSet::new();
        let mut tombstones: Vec<(String, u64)> = Vec::new();
        let mut memory_removals: Vec<(String, u64)> = Vec::new();
        for slot in self.memory.iter() {
            let key = slot.key().clone();
            match slot.value() {
                Slot::Tombstone(seq) => tombstones.push((key, *seq)),
                Slot::Live(entry) => {
                    report.examined += 1;
                    in_memory.insert(key.clone());
                    if entry.is_valid(now, schema) {
                        candidates.insert(
                            key,
                            Candidate {
                                entry: entry.clone(),
                                in_memory: true,
                                raw: None,
                            },
                        );
                    } else {
                        report.expired += 1;
                        memory_removals.push((key, entry.seq));
                    }
                }
            }
        }
        let tombstoned: HashSet<&str> = tombstones.iter().map(|(k, _)| k.as_str()).collect();

        // Durable read-all
        let storage_keys = self.durable.list_storage_keys().await?;
        for chunk in storage_keys.chunks(batch_size) {
            let records = self.durable.read_raw(chunk).await?;
            for (storage_key, raw) in records {
                let Some(key) = self.durable.user_key(&storage_key) else {
                    continue;
                };
                if in_memory.contains(key) || tombstoned.contains(key) {
                    continue;
                }
                report.examined += 1;
                match self.durable.decode(&storage_key, &raw) {
                    Ok(entry) if entry.is_valid(now, schema) => {
                        candidates.insert(
                            key.to_string(),
                            Candidate {
                                entry,
                                in_memory: false,
                                raw: Some(raw),
                            },
                        );
                    }
                    Ok(_) => report.expired += 1,
                    Err(e) => {
                        report.corrupt += 1;
                        debug!(namespace = %self.name(), key = %key, error = %e, "Sweep dropping corrupt record");
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        // Bounds
        let mut survivors: Vec<Candidate> = candidates.into_values().collect();
        survivors.sort_by_key(|c| c.entry.age_key());
        let mut count = survivors.len();
        let mut bytes: usize = survivors.iter().map(|c| c.entry.size_bytes).sum();
        let mut cut = 0;
        while cut < survivors.len()
            && (count > self.config.max_entries || bytes > self.config.max_bytes_total)
        {
            bytes -= survivors[cut].entry.size_bytes;
            count -= 1;
            cut += 1;
        }
        let evicted: Vec<Candidate> = survivors.drain(..cut).collect();
        report.evicted = evicted.len();
        report.retained = survivors.len();
        report.retained_bytes = bytes;
        self.stats.record_expirations(report.expired as u64);
        self.stats.record_evictions(report.evicted as u64);
        for _ in 0..report.corrupt {
            self.stats.record_corrupt_purge();
        }

        // Memory removals
        memory_removals.extend(
            evicted
                .iter()
                .filter(|c| c.in_memory)
                .map(|c| (c.entry.key.clone(), c.entry.seq)),
        );
        for chunk in memory_removals.chunks(batch_size) {
            {
                let _gate = self.gate.write().await;
                for (key, seq) in chunk {
                    self.memory.remove_if(key, |_, slot| slot.is_live_seq(*seq));
                }
            }
            tokio::task::yield_now().await;
        }

        // Durable rewrite: clear what was read, then write back survivors
        for chunk in storage_keys.chunks(batch_size) {
            {
                let _gate = self.gate.write().await;
                self.durable.delete_raw(chunk).await?;
            }
            tokio::task::yield_now().await;
        }
        for chunk in survivors.chunks(batch_size) {
            {
                let _gate = self.gate.write().await;
                // Survivors were read before the clear
                if self.sweep_state.was_cleared() {
                    debug!(namespace = %self.name(), "Namespace cleared during sweep, skipping write-back");
                    break;
                }
                let mut records = Vec::with_capacity(chunk.len());
                for candidate in chunk {
                    let key = &candidate.entry.key;
                    if self.sweep_state.is_dirty(key) || self.is_tombstoned(key) {
                        continue;
                    }
                    let raw = match &candidate.raw {
                        Some(raw) => raw.clone(),
                        None => match self.durable.encode(&candidate.entry) {
                            Ok(raw) => raw,
                            Err(e) => {
                                warn!(namespace = %self.name(), key = %key, error = %e, "Sweep could not encode entry");
                                continue;
                            }
                        },
                    };
                    records.push((self.durable.storage_key(key), raw));
                }
                self.durable.write_raw(records).await?;
            }
            tokio::task::yield_now().await;
        }

        // Keys touched during the sweep: memory holds the latest state
        let dirty = self.sweep_state.dirty_keys();
        for chunk in dirty.chunks(batch_size) {
            {
                let _gate = self.gate.write().await;
                let mut records = Vec::new();
                for key in chunk {
                    let entry = match self.memory.get(key).as_deref() {
                        Some(Slot::Live(entry)) if entry.is_valid(now, schema) => entry.clone(),
                        _ => continue,
                    };
                    match self.durable.encode(&entry) {
                        Ok(raw) => records.push((self.durable.storage_key(key), raw)),
                        Err(e) => {
                            warn!(namespace = %self.name(), key = %key, error = %e, "Sweep could not encode entry")
                        }
                    }
                }
                self.durable.write_raw(records).await?;
            }
            tokio::task::yield_now().await;
        }

        // The rewrite dropped every durable copy the snapshot tombstones masked
        for (key, seq) in &tombstones {
            if !self.sweep_state.is_dirty(key) {
                self.memory.remove_if(key, |_, slot| slot.is_tombstone(*seq));
            }
        }

        Ok(report)
    }

    fn is_tombstoned(&self, key: &str) -> bool {
        matches!(self.memory.get(key).as_deref(), Some(Slot::Tombstone(_)))
    }

    /// Time of the last completed sweep, or of creation before the first.
    pub fn last_sweep_ms(&self) -> u64 {
        self.last_sweep_ms.load(Ordering::SeqCst)
    }
}
