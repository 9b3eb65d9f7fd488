//! Result types returned across the cache boundary.

use serde::Serialize;

/// Why a read produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// Never stored, deleted, or evicted
    Absent,
    /// TTL elapsed or written under an older schema; purged
    Expired,
    /// Could not be decoded or decrypted; purged
    Corrupt,
    /// Durable tier failed; served as a miss
    StorageUnavailable,
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Hit(T),
    Miss(MissReason),
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        !self.is_hit()
    }

    pub fn miss_reason(&self) -> Option<MissReason> {
        match self {
            Lookup::Hit(_) => None,
            Lookup::Miss(reason) => Some(*reason),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::Miss(reason) => Lookup::Miss(reason),
        }
    }
}

/// Outcome of a cache mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Applied to memory and confirmed by the durable tier
    Persisted,
    /// Applied to memory, durable write scheduled
    Queued,
    /// Applied to memory, durable write failed
    MemoryOnly,
    /// Discarded: version not newer than the stored one
    Stale,
}

impl WriteOutcome {
    /// Whether the mutation is visible to readers.
    pub fn is_applied(&self) -> bool {
        !matches!(self, WriteOutcome::Stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_helpers() {
        let hit: Lookup<u32> = Lookup::Hit(7);
        assert!(hit.is_hit());
        assert_eq!(hit.clone().map(|v| v * 2), Lookup::Hit(14));
        assert_eq!(hit.into_option(), Some(7));

        let miss: Lookup<u32> = Lookup::Miss(MissReason::Corrupt);
        assert!(miss.is_miss());
        assert_eq!(miss.miss_reason(), Some(MissReason::Corrupt));
        assert_eq!(miss.into_option(), None);
    }

    #[test]
    fn test_write_outcome_serialize() {
        let json = serde_json::to_string(&WriteOutcome::MemoryOnly).unwrap();
        assert_eq!(json, "\"memory_only\"");
        assert!(!WriteOutcome::Stale.is_applied());
        assert!(WriteOutcome::Queued.is_applied());
    }
}
