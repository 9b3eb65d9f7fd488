//! Rate Limiter
//!
//! Buckets live in a sharded map keyed by (actor, operation type), each
//! behind its own mutex. A call that needs both the actor bucket and the
//! global bucket locks the global one first, so the pair is checked and
//! counted as a unit without lock-order inversions.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::{BucketState, QuotaScope, RateBucket, Verdict, GLOBAL_ACTOR};
use crate::clock::SharedClock;
use crate::config::{Quota, RateLimitConfig};
use crate::error::QuotaExceeded;

type BucketKey = (String, String);

/// Result of [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Counted; `remaining` is the actor's budget left in this window
    Allowed { remaining: u64 },
    Denied(QuotaExceeded),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn into_result(self) -> Result<u64, QuotaExceeded> {
        match self {
            Decision::Allowed { remaining } => Ok(remaining),
            Decision::Denied(rejection) => Err(rejection),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    buckets: DashMap<BucketKey, Arc<Mutex<RateBucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    // == Can Proceed ==
    /// Checks and, when allowed, counts one call.
    pub fn can_proceed(&self, actor: &str, op_type: &str) -> bool {
        self.check(actor, op_type).is_allowed()
    }

    // == Check ==
    /// Checks and counts one call against the actor and global buckets.
    ///
    /// Neither bucket is counted unless both admit the call. The bucket
    /// that rejects is put in its penalty box when its budget is spent.
    pub fn check(&self, actor: &str, op_type: &str) -> Decision {
        let now = self.clock.now_ms();
        let policy = *self.config.quota_for(op_type);

        if actor == GLOBAL_ACTOR {
            let quota = policy.global.unwrap_or(policy.actor);
            let bucket = self.bucket(GLOBAL_ACTOR, op_type, now);
            let mut guard = bucket.lock();
            return match gate(&mut guard, &quota, now) {
                Ok(()) => {
                    guard.admit();
                    Decision::Allowed {
                        remaining: guard.remaining(&quota, now),
                    }
                }
                Err(retry_after_ms) => self.deny(actor, op_type, QuotaScope::Global, retry_after_ms),
            };
        }

        let global = policy
            .global
            .map(|quota| (quota, self.bucket(GLOBAL_ACTOR, op_type, now)));
        let actor_bucket = self.bucket(actor, op_type, now);

        // Fixed order: global, then actor
        let mut global_guard = global.as_ref().map(|(quota, bucket)| (quota, bucket.lock()));
        let mut actor_guard = actor_bucket.lock();

        if let Err(retry_after_ms) = gate(&mut actor_guard, &policy.actor, now) {
            return self.deny(actor, op_type, QuotaScope::Actor, retry_after_ms);
        }
        if let Some((quota, guard)) = global_guard.as_mut() {
            if let Err(retry_after_ms) = gate(guard, quota, now) {
                return self.deny(actor, op_type, QuotaScope::Global, retry_after_ms);
            }
            guard.admit();
        }
        actor_guard.admit();

        Decision::Allowed {
            remaining: actor_guard.remaining(&policy.actor, now),
        }
    }

    // == Remaining ==
    /// Calls `actor` may still make for `op_type` in the current window.
    ///
    /// Does not create buckets or count anything.
    pub fn remaining(&self, actor: &str, op_type: &str) -> u64 {
        let now = self.clock.now_ms();
        let quota = self.actor_quota(actor, op_type);
        match self.existing(actor, op_type) {
            Some(bucket) => bucket.lock().remaining(&quota, now),
            None => quota.max_calls,
        }
    }

    pub fn state(&self, actor: &str, op_type: &str) -> BucketState {
        let now = self.clock.now_ms();
        let quota = self.actor_quota(actor, op_type);
        match self.existing(actor, op_type) {
            Some(bucket) => bucket.lock().state(&quota, now),
            None => BucketState::Idle,
        }
    }

    // == Reset ==
    /// Drops every bucket held by `actor`. Returns how many were removed.
    pub fn reset(&self, actor: &str) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|(owner, _), _| owner != actor);
        let removed = before.saturating_sub(self.buckets.len());
        debug!(actor = %actor, removed, "Rate buckets reset");
        removed
    }

    fn actor_quota(&self, actor: &str, op_type: &str) -> Quota {
        let policy = self.config.quota_for(op_type);
        if actor == GLOBAL_ACTOR {
            policy.global.unwrap_or(policy.actor)
        } else {
            policy.actor
        }
    }

    fn bucket(&self, actor: &str, op_type: &str, now: u64) -> Arc<Mutex<RateBucket>> {
        self.buckets
            .entry((actor.to_string(), op_type.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(RateBucket::new(now))))
            .clone()
    }

    fn existing(&self, actor: &str, op_type: &str) -> Option<Arc<Mutex<RateBucket>>> {
        self.buckets
            .get(&(actor.to_string(), op_type.to_string()))
            .map(|bucket| Arc::clone(bucket.value()))
    }

    fn deny(&self, actor: &str, op_type: &str, scope: QuotaScope, retry_after_ms: u64) -> Decision {
        debug!(actor = %actor, op_type = %op_type, %scope, retry_after_ms, "Call rejected by quota");
        Decision::Denied(QuotaExceeded {
            op_type: op_type.to_string(),
            scope,
            retry_after_ms,
        })
    }
}

/// Probes one bucket, starting its penalty box if the budget is spent.
/// `Err` carries the retry delay.
fn gate(bucket: &mut RateBucket, quota: &Quota, now: u64) -> Result<(), u64> {
    match bucket.probe(quota, now) {
        Verdict::Allow => Ok(()),
        Verdict::Blocked { retry_after_ms } => Err(retry_after_ms),
        Verdict::Exhausted => Err(bucket.block(quota, now)),
    }
}
