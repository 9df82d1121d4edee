//! Rolling-window rate limiting for transfers

use crate::types::AccountId;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Per-sender rolling window of executed transfer timestamps.
///
/// The check runs during transfer validation, but a slot is only consumed by
/// [`TransferRateLimiter::record`] once the transfer actually executes, so
/// failed attempts cannot lock a sender out. Limits are passed in per call
/// because they come from hot-reload configuration.
#[derive(Debug, Default)]
pub struct TransferRateLimiter {
    windows: DashMap<AccountId, Vec<DateTime<Utc>>>,
}

impl TransferRateLimiter {
    /// Create an empty limiter
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check whether `sender` may execute another transfer at `now`
    pub fn check(
        &self,
        sender: &AccountId,
        now: DateTime<Utc>,
        max_count: u32,
        window_secs: u64,
    ) -> Result<()> {
        let window_start = now - Duration::seconds(window_secs as i64);

        if let Some(mut entry) = self.windows.get_mut(sender) {
            entry.retain(|t| *t >= window_start);
            let count = entry.len() as u32;
            if count >= max_count {
                return Err(Error::RateLimited(count));
            }
        }

        Ok(())
    }

    /// Consume a slot for an executed transfer
    pub fn record(&self, sender: &AccountId, now: DateTime<Utc>) {
        self.windows.entry(sender.clone()).or_default().push(now);
    }

    /// Drop windows with no activity since `window_start`; called from the
    /// periodic maintenance loop so idle senders do not accumulate
    pub fn cleanup(&self, now: DateTime<Utc>, window_secs: u64) {
        let window_start = now - Duration::seconds(window_secs as i64);
        self.windows
            .retain(|_, stamps| stamps.iter().any(|t| *t >= window_start));
    }

    /// Number of senders currently tracked
    pub fn tracked_senders(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_within_window() {
        let limiter = TransferRateLimiter::new();
        let sender = AccountId::new("user-1");
        let now = Utc::now();

        for i in 0..3 {
            limiter.check(&sender, now, 3, 60).unwrap();
            limiter.record(&sender, now + Duration::seconds(i));
        }

        let result = limiter.check(&sender, now + Duration::seconds(5), 3, 60);
        assert!(matches!(result, Err(Error::RateLimited(3))));
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = TransferRateLimiter::new();
        let sender = AccountId::new("user-1");
        let now = Utc::now();

        for _ in 0..3 {
            limiter.record(&sender, now);
        }
        assert!(limiter.check(&sender, now, 3, 60).is_err());

        // All three slots fall out of the window
        assert!(limiter.check(&sender, now + Duration::seconds(61), 3, 60).is_ok());
    }

    #[test]
    fn test_failed_checks_do_not_consume_slots() {
        let limiter = TransferRateLimiter::new();
        let sender = AccountId::new("user-1");
        let now = Utc::now();

        for _ in 0..10 {
            limiter.check(&sender, now, 3, 60).unwrap();
        }
        assert_eq!(limiter.tracked_senders(), 0);
    }

    #[test]
    fn test_cleanup_drops_idle_senders() {
        let limiter = TransferRateLimiter::new();
        let now = Utc::now();

        limiter.record(&AccountId::new("user-1"), now - Duration::seconds(120));
        limiter.record(&AccountId::new("user-2"), now);
        limiter.cleanup(now, 60);

        assert_eq!(limiter.tracked_senders(), 1);
    }
}
