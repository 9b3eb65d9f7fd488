//! Rate Bucket
//!
//! State for one (actor, operation type) pair. A block outlives window
//! resets: a rolled window clears `count` but never `blocked_until`.

use serde::Serialize;

use crate::config::Quota;

/// Outcome of probing a bucket, before anything is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The call fits in the current window
    Allow,
    /// Already in the penalty box
    Blocked { retry_after_ms: u64 },
    /// Window budget used up; the caller should apply the block
    Exhausted,
}

/// Lifecycle state reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketState {
    Idle,
    Active,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateBucket {
    pub window_start: u64,
    pub count: u64,
    pub blocked_until: u64,
}

impl RateBucket {
    pub fn new(now: u64) -> Self {
        Self {
            window_start: now,
            count: 0,
            blocked_until: 0,
        }
    }

    fn window_elapsed(&self, quota: &Quota, now: u64) -> bool {
        now.saturating_sub(self.window_start) > quota.window_ms
    }

    /// Rolls the window if needed and reports whether one more call fits.
    pub fn probe(&mut self, quota: &Quota, now: u64) -> Verdict {
        if now < self.blocked_until {
            return Verdict::Blocked {
                retry_after_ms: self.blocked_until - now,
            };
        }
        if self.window_elapsed(quota, now) {
            self.count = 0;
            self.window_start = now;
        }
        if self.count >= quota.max_calls {
            Verdict::Exhausted
        } else {
            Verdict::Allow
        }
    }

    /// Starts the penalty box. Returns the block length.
    pub fn block(&mut self, quota: &Quota, now: u64) -> u64 {
        self.blocked_until = now.saturating_add(quota.cooldown_ms);
        quota.cooldown_ms
    }

    pub fn admit(&mut self) {
        self.count += 1;
    }

    /// Calls left in the current window; zero while blocked.
    pub fn remaining(&self, quota: &Quota, now: u64) -> u64 {
        if now < self.blocked_until {
            0
        } else if self.window_elapsed(quota, now) {
            quota.max_calls
        } else {
            quota.max_calls.saturating_sub(self.count)
        }
    }

    pub fn state(&self, quota: &Quota, now: u64) -> BucketState {
        if now < self.blocked_until {
            BucketState::Blocked
        } else if self.count == 0 || self.window_elapsed(quota, now) {
            BucketState::Idle
        } else {
            BucketState::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota() -> Quota {
        Quota::new(2, 100, 500)
    }

    #[test]
    fn test_allows_until_budget_spent() {
        let mut bucket = RateBucket::new(0);
        assert_eq!(bucket.probe(&quota(), 0), Verdict::Allow);
        bucket.admit();
        assert_eq!(bucket.state(&quota(), 0), BucketState::Active);
        bucket.admit();
        assert_eq!(bucket.probe(&quota(), 10), Verdict::Exhausted);
        assert_eq!(bucket.remaining(&quota(), 10), 0);
    }

    #[test]
    fn test_block_survives_window_reset() {
        let mut bucket = RateBucket::new(0);
        bucket.admit();
        bucket.admit();
        assert_eq!(bucket.block(&quota(), 10), 500);

        // Window elapsed at 101 but the block runs to 510
        assert_eq!(
            bucket.probe(&quota(), 200),
            Verdict::Blocked {
                retry_after_ms: 310
            }
        );
        assert_eq!(bucket.state(&quota(), 200), BucketState::Blocked);
        assert_eq!(bucket.remaining(&quota(), 200), 0);

        assert_eq!(bucket.probe(&quota(), 510), Verdict::Allow);
        assert_eq!(bucket.count, 0);
        assert_eq!(bucket.window_start, 510);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let mut bucket = RateBucket::new(0);
        bucket.admit();
        bucket.admit();
        assert_eq!(bucket.probe(&quota(), 100), Verdict::Exhausted);
        assert_eq!(bucket.probe(&quota(), 101), Verdict::Allow);
    }

    #[test]
    fn test_remaining_accounts_for_window_reset() {
        let mut bucket = RateBucket::new(0);
        bucket.admit();
        assert_eq!(bucket.remaining(&quota(), 50), 1);
        assert_eq!(bucket.remaining(&quota(), 101), 2);
        assert_eq!(bucket.state(&quota(), 101), BucketState::Idle);
    }
}
