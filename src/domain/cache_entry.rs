// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::time::{Duration, SystemTime};

/// A `(fetched_at, ttl)` pair used to gate repeated expensive lookups
/// (trust bundle refresh, chain revalidation) against an injected clock
/// rather than `SystemTime::now()` directly.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CacheEntry {
    fetched_at: SystemTime,
    ttl: Duration,
}

impl CacheEntry {
    /// Create an entry fetched at `fetched_at` with the given `ttl`. A zero
    /// `ttl` is always expired.
    #[must_use]
    pub const fn new(fetched_at: SystemTime, ttl: Duration) -> Self {
        Self { fetched_at, ttl }
    }

    /// An entry that reports as expired at any `now`, for uninitialized
    /// caches.
    #[must_use]
    pub const fn always_expired() -> Self {
        Self {
            fetched_at: SystemTime::UNIX_EPOCH,
            ttl: Duration::ZERO,
        }
    }

    /// When the entry was fetched.
    #[must_use]
    pub const fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }

    /// Age of the entry relative to `now`; zero if `now` precedes
    /// `fetched_at`.
    #[must_use]
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.fetched_at).unwrap_or(Duration::ZERO)
    }

    /// `true` if the entry is still fresh at `now`: `age_at(now) < ttl`.
    /// A zero `ttl` is never fresh.
    #[must_use]
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        !self.ttl.is_zero() && self.age_at(now) < self.ttl
    }

    /// The inverse of [`Self::is_fresh_at`].
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        !self.is_fresh_at(now)
    }

    /// Time remaining until expiry at `now`, or `Duration::ZERO` if already
    /// expired.
    #[must_use]
    pub fn remaining_at(&self, now: SystemTime) -> Duration {
        self.ttl.saturating_sub(self.age_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_ttl_expired_after() {
        let fetched_at = SystemTime::UNIX_EPOCH;
        let entry = CacheEntry::new(fetched_at, Duration::from_secs(60));
        assert!(entry.is_fresh_at(fetched_at + Duration::from_secs(59)));
        assert!(!entry.is_fresh_at(fetched_at + Duration::from_secs(60)));
        assert!(!entry.is_fresh_at(fetched_at + Duration::from_secs(61)));
    }

    #[test]
    fn zero_ttl_always_expired() {
        let entry = CacheEntry::new(SystemTime::UNIX_EPOCH, Duration::ZERO);
        assert!(entry.is_expired_at(SystemTime::UNIX_EPOCH));
        assert!(entry.is_expired_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1)));
    }

    #[test]
    fn always_expired_constructor() {
        let entry = CacheEntry::always_expired();
        assert!(entry.is_expired_at(SystemTime::now()));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let fetched_at = SystemTime::UNIX_EPOCH;
        let entry = CacheEntry::new(fetched_at, Duration::from_secs(10));
        assert_eq!(
            entry.remaining_at(fetched_at + Duration::from_secs(3)),
            Duration::from_secs(7)
        );
        assert_eq!(
            entry.remaining_at(fetched_at + Duration::from_secs(30)),
            Duration::ZERO
        );
    }
}
