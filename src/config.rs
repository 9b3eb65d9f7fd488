//! Configuration Module
//!
//! Handles loading runtime settings from environment variables and the
//! static per-namespace / per-operation policy map.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::envelope::KEY_SIZE;
use crate::error::{CacheError, Result};

// == Namespace Config ==
/// Policy for one logical cache region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name, also the durable key prefix
    pub name: String,
    /// Default time-to-live for entries
    pub ttl_ms: u64,
    /// Upper bound on entry count
    pub max_entries: usize,
    /// Upper bound on the sum of entry sizes
    pub max_bytes_total: usize,
    /// Encrypt entries at rest
    #[serde(default)]
    pub encrypted: bool,
    /// Minimum time between maintenance sweeps
    pub sweep_interval_ms: u64,
    /// Await durable writes before `set` returns
    #[serde(default)]
    pub write_through: bool,
    /// Reads refresh an entry's age
    #[serde(default)]
    pub touch_on_read: bool,
}

impl NamespaceConfig {
    /// Creates a namespace with conservative defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl_ms: 5 * 60 * 1000,
            max_entries: 1000,
            max_bytes_total: 4 * 1024 * 1024,
            encrypted: false,
            sweep_interval_ms: 60 * 1000,
            write_through: false,
            touch_on_read: false,
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes_total: usize) -> Self {
        self.max_bytes_total = max_bytes_total;
        self
    }

    pub fn with_sweep_interval_ms(mut self, sweep_interval_ms: u64) -> Self {
        self.sweep_interval_ms = sweep_interval_ms;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn write_through(mut self) -> Self {
        self.write_through = true;
        self
    }

    pub fn touch_on_read(mut self) -> Self {
        self.touch_on_read = true;
        self
    }

    /// Rejects policies the cache cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(':') {
            return Err(CacheError::Config(format!(
                "namespace name '{}' must be non-empty and contain no ':'",
                self.name
            )));
        }
        if self.ttl_ms == 0 {
            return Err(CacheError::Config(format!(
                "namespace '{}' has a zero TTL",
                self.name
            )));
        }
        if self.max_entries == 0 || self.max_bytes_total == 0 {
            return Err(CacheError::Config(format!(
                "namespace '{}' must allow at least one entry and one byte",
                self.name
            )));
        }
        Ok(())
    }
}

// == Quota ==
/// Call budget for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Calls admitted per window
    pub max_calls: u64,
    /// Window length
    pub window_ms: u64,
    /// Penalty-box length once the budget is exhausted
    pub cooldown_ms: u64,
}

impl Quota {
    pub fn new(max_calls: u64, window_ms: u64, cooldown_ms: u64) -> Self {
        Self {
            max_calls,
            window_ms,
            cooldown_ms,
        }
    }
}

/// Quotas applied to one operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationQuota {
    /// Budget for each actor
    pub actor: Quota,
    /// Budget shared by all actors, if any
    #[serde(default)]
    pub global: Option<Quota>,
}

impl OperationQuota {
    pub fn per_actor(actor: Quota) -> Self {
        Self {
            actor,
            global: None,
        }
    }

    pub fn with_global(mut self, global: Quota) -> Self {
        self.global = Some(global);
        self
    }
}

/// Rate limiter policy map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Used for operation types with no explicit entry
    pub default_quota: OperationQuota,
    /// Per-operation overrides
    #[serde(default)]
    pub operations: HashMap<String, OperationQuota>,
}

impl RateLimitConfig {
    pub fn new(default_quota: OperationQuota) -> Self {
        Self {
            default_quota,
            operations: HashMap::new(),
        }
    }

    pub fn with_operation(mut self, op_type: impl Into<String>, quota: OperationQuota) -> Self {
        self.operations.insert(op_type.into(), quota);
        self
    }

    /// Quota governing `op_type`.
    pub fn quota_for(&self, op_type: &str) -> &OperationQuota {
        self.operations.get(op_type).unwrap_or(&self.default_quota)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(OperationQuota::per_actor(Quota::new(60, 60_000, 60_000)))
            .with_operation(
                "create-listing",
                OperationQuota::per_actor(Quota::new(10, 60_000, 300_000))
                    .with_global(Quota::new(500, 60_000, 60_000)),
            )
            .with_operation(
                "send-message",
                OperationQuota::per_actor(Quota::new(30, 60_000, 60_000))
                    .with_global(Quota::new(2_000, 60_000, 30_000)),
            )
            .with_operation(
                "claim-reward",
                OperationQuota::per_actor(Quota::new(5, 3_600_000, 3_600_000))
                    .with_global(Quota::new(100, 60_000, 60_000)),
            )
    }
}

/// Namespaces used by the marketplace client.
pub fn default_namespaces() -> Vec<NamespaceConfig> {
    vec![
        NamespaceConfig::new("listings")
            .with_ttl_ms(5 * 60 * 1000)
            .with_max_entries(500)
            .with_max_bytes(5 * 1024 * 1024),
        NamespaceConfig::new("user-profile")
            .with_ttl_ms(30 * 60 * 1000)
            .with_max_entries(200)
            .with_max_bytes(1024 * 1024)
            .encrypted()
            .write_through(),
        NamespaceConfig::new("image-meta")
            .with_ttl_ms(24 * 60 * 60 * 1000)
            .with_max_entries(2_000)
            .with_max_bytes(2 * 1024 * 1024)
            .with_sweep_interval_ms(5 * 60 * 1000),
    ]
}

// == Overrides File ==
#[derive(Debug, Default, Deserialize)]
struct Overrides {
    #[serde(default)]
    namespaces: Vec<NamespaceConfig>,
    #[serde(default)]
    operations: HashMap<String, OperationQuota>,
    #[serde(default)]
    default_quota: Option<OperationQuota>,
}

// == Config ==
/// Runtime configuration parameters.
///
/// Scalar values come from environment variables with sensible defaults;
/// namespace and quota policy can be overridden from a JSON file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Admin HTTP port
    pub server_port: u16,
    /// Maintenance ticker period in milliseconds
    pub maintenance_tick_ms: u64,
    /// Entries processed per sweep batch
    pub sweep_batch_size: usize,
    /// Current record schema; entries written under another version are invalid
    pub schema_version: u32,
    /// Durable store file, in-process store when unset
    pub cache_file: Option<PathBuf>,
    /// Hex-encoded AES-256 key for encrypted namespaces
    pub encryption_key: Option<String>,
    /// Namespace policies
    pub namespaces: Vec<NamespaceConfig>,
    /// Rate limiter policies
    pub limits: RateLimitConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - Admin HTTP port (default: 3000)
    /// - `MAINTENANCE_TICK_MS` - Maintenance ticker period (default: 1000)
    /// - `SWEEP_BATCH_SIZE` - Entries per sweep batch (default: 64)
    /// - `SCHEMA_VERSION` - Current record schema (default: 1)
    /// - `CACHE_FILE` - Durable store path (default: unset, in-process store)
    /// - `CACHE_ENCRYPTION_KEY` - 64 hex characters (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
            maintenance_tick_ms: parse_env("MAINTENANCE_TICK_MS")
                .unwrap_or(defaults.maintenance_tick_ms),
            sweep_batch_size: parse_env("SWEEP_BATCH_SIZE").unwrap_or(defaults.sweep_batch_size),
            schema_version: parse_env("SCHEMA_VERSION").unwrap_or(defaults.schema_version),
            cache_file: env::var("CACHE_FILE").ok().map(PathBuf::from),
            encryption_key: env::var("CACHE_ENCRYPTION_KEY").ok(),
            ..defaults
        }
    }

    /// Merges namespace and quota overrides from a JSON file.
    ///
    /// Namespaces are replaced by name; unknown names are added.
    pub fn apply_overrides_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let overrides: Overrides = serde_json::from_str(&raw).map_err(|e| {
            CacheError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        self.apply(overrides);
        Ok(())
    }

    fn apply(&mut self, overrides: Overrides) {
        for ns in overrides.namespaces {
            match self.namespaces.iter_mut().find(|n| n.name == ns.name) {
                Some(existing) => *existing = ns,
                None => self.namespaces.push(ns),
            }
        }
        self.limits.operations.extend(overrides.operations);
        if let Some(default_quota) = overrides.default_quota {
            self.limits.default_quota = default_quota;
        }
    }

    /// Decodes the configured encryption key, if any.
    pub fn encryption_key(&self) -> Result<Option<[u8; KEY_SIZE]>> {
        let Some(raw) = &self.encryption_key else {
            return Ok(None);
        };
        let bytes = hex::decode(raw.trim())
            .map_err(|e| CacheError::Config(format!("invalid hex encryption key: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            CacheError::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                b.len()
            ))
        })?;
        Ok(Some(key))
    }

    /// Validates every namespace policy.
    pub fn validate(&self) -> Result<()> {
        for ns in &self.namespaces {
            ns.validate()?;
        }
        if self.sweep_batch_size == 0 {
            return Err(CacheError::Config("sweep batch size must be positive".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            maintenance_tick_ms: 1000,
            sweep_batch_size: 64,
            schema_version: 1,
            cache_file: None,
            encryption_key: None,
            namespaces: default_namespaces(),
            limits: RateLimitConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
