//! Market Cache - tiered client cache and call quotas
//!
//! Namespaced memory + durable caching with TTL expiry, bounded sweeps,
//! at-rest encryption and change notification, plus a per-actor rate
//! limiter with a penalty box.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod ratelimit;
pub mod storage;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, CacheManager, Lookup, MissReason, TieredCache, WriteOutcome};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, QuotaExceeded, Result};
pub use ratelimit::{Decision, RateLimiter};
pub use tasks::{IntervalTicker, MaintenanceWorker, Ticker};
