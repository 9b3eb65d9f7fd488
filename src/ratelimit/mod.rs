//! Rate Limiter Module
//!
//! Fixed-window call quotas per actor and per operation type, with a
//! penalty box once a window's budget is exhausted. An operation type may
//! also carry a global quota shared by every actor.

mod bucket;
mod limiter;


use serde::Serialize;

pub use bucket::{BucketState, RateBucket, Verdict};
pub use limiter::{Decision, RateLimiter};

/// Actor key of the bucket shared by all actors.
pub const GLOBAL_ACTOR: &str = "*";

/// Which bucket rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    Actor,
    Global,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaScope::Actor => f.write_str("actor"),
            QuotaScope::Global => f.write_str("global"),
        }
    }
}
