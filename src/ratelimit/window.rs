//! Fixed-window counter state for a single key.

use std::time::Duration;

use crate::clock::Timestamp;

/// Requests observed for one key in its current window.
///
/// Once a window has expired the counter is replaced by a fresh one
/// rather than decremented or repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    /// Requests admitted in this window
    pub count: u64,
    /// Instant at which this window expires
    pub reset_at: Timestamp,
}

impl WindowCounter {
    /// Open a new window at `now` with the first request already counted.
    pub fn fresh(now: Timestamp, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(window.as_millis() as u64),
        }
    }

    /// Whether the window has strictly passed its reset time.
    ///
    /// `now == reset_at` still belongs to the old window.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.reset_at
    }

    /// Count one more request if the quota allows it.
    ///
    /// Returns `false` without touching the count once `max_requests`
    /// have been admitted.
    pub fn try_admit(&mut self, max_requests: u64) -> bool {
        if self.count >= max_requests {
            return false;
        }
        self.count += 1;
        true
    }

    /// Remaining quota in this window.
    pub fn remaining(&self, max_requests: u64) -> u64 {
        max_requests.saturating_sub(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_window_counts_first_request() {
        let counter = WindowCounter::fresh(1_000, Duration::from_secs(2));
        assert_eq!(counter.count, 1);
        assert_eq!(counter.reset_at, 3_000);
    }

    #[test]
    fn test_expiry_is_strict() {
        let counter = WindowCounter::fresh(0, Duration::from_millis(1000));
        assert!(!counter.is_expired(999));
        assert!(!counter.is_expired(1000));
        assert!(counter.is_expired(1001));
    }

    #[test]
    fn test_try_admit_stops_at_max() {
        let mut counter = WindowCounter::fresh(0, Duration::from_secs(1));

        assert!(counter.try_admit(3));
        assert!(counter.try_admit(3));
        assert!(!counter.try_admit(3));
        assert_eq!(counter.count, 3);
        assert_eq!(counter.remaining(3), 0);
    }

    #[test]
    fn test_remaining_never_underflows() {
        let counter = WindowCounter {
            count: 10,
            reset_at: 0,
        };
        assert_eq!(counter.remaining(4), 0);
    }
}
