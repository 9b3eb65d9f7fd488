//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and their validity check.

// == Validity ==
/// Result of checking an entry against the clock and schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Expired,
    SchemaMismatch,
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key within its namespace
    pub key: String,
    /// Serialized value (plaintext; encryption happens at the durable boundary)
    pub value: Vec<u8>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Time-to-live in milliseconds
    pub ttl_ms: u64,
    /// Record schema the entry was written under
    pub schema_version: u32,
    /// Accounted size: key plus value bytes
    pub size_bytes: usize,
    /// Whether the durable copy is encrypted
    pub encrypted: bool,
    /// Caller-supplied monotonically increasing version
    pub version: Option<u64>,
    /// Per-namespace write sequence, breaks `created_at` ties
    pub seq: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry.
    ///
    /// # Arguments
    /// * `key` - Key within the namespace
    /// * `value` - Serialized value
    /// * `now` - Creation time (Unix milliseconds)
    /// * `ttl_ms` - Time-to-live in milliseconds
    /// * `schema_version` - Current record schema
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        now: u64,
        ttl_ms: u64,
        schema_version: u32,
    ) -> Self {
        let key = key.into();
        let size_bytes = key.len() + value.len();
        Self {
            key,
            value,
            created_at: now,
            ttl_ms,
            schema_version,
            size_bytes,
            encrypted: false,
            version: None,
            seq: 0,
        }
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    // == Validity ==
    /// Checks the entry against the clock and the current schema.
    ///
    /// Boundary condition: an entry is expired once `now - created_at`
    /// reaches `ttl_ms`. A clock that moved backwards counts as zero age.
    pub fn validity(&self, now: u64, schema_version: u32) -> Validity {
        if self.schema_version != schema_version {
            Validity::SchemaMismatch
        } else if self.is_expired(now) {
            Validity::Expired
        } else {
            Validity::Valid
        }
    }

    pub fn is_valid(&self, now: u64, schema_version: u32) -> bool {
        self.validity(now, schema_version) == Validity::Valid
    }

    // == Is Expired ==
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) >= self.ttl_ms
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.ttl_ms
            .saturating_sub(now.saturating_sub(self.created_at))
    }

    /// Restarts the entry's age.
    pub fn touch(&mut self, now: u64) {
        self.created_at = now;
    }

    /// Eviction order: oldest first, write order breaks ties.
    pub fn age_key(&self) -> (u64, u64) {
        (self.created_at, self.seq)
    }
}

/// Whether a write carrying `incoming` may replace an entry carrying `current`.
///
/// Unversioned writes always apply. A versioned write applies only over an
/// unversioned entry or a strictly lower version.
pub fn version_accepts(current: Option<u64>, incoming: Option<u64>) -> bool {
    match (current, incoming) {
        (_, None) | (None, Some(_)) => true,
        (Some(current), Some(incoming)) => incoming > current,
    }
}
