//! Cache Module
//!
//! Two-tier (memory + durable) caching with TTL expiration, bounded
//! namespaces, at-rest encryption and per-key change notification.

mod bus;
pub mod codec;
mod durable;
mod entry;
pub mod envelope;
mod locks;
mod manager;
mod outcome;
mod stats;
mod sweep;
mod tiered;
mod typed;
mod writer;


// Re-export public types
pub use bus::{InvalidationBus, Subscription};
pub use codec::{BytesCodec, Codec, JsonCodec};
pub use entry::{CacheEntry, Validity};
pub use envelope::Envelope;
pub use manager::CacheManager;
pub use outcome::{Lookup, MissReason, WriteOutcome};
pub use stats::{CacheStats, StatsSnapshot};
pub use sweep::SweepReport;
pub use tiered::TieredCache;
pub use typed::Cache;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
