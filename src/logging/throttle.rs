//! Rate-limited logging utilities.
//!
//! Evaluation runs every cycle for every strategy, so a dead feed or a
//! missing asset would otherwise log the same warning hundreds of times.
//! `LogThrottle` lets one line through per interval per key and counts the rest.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct ThrottleSlot {
    last_emit: Instant,
    suppressed: u64,
}

/// Keyed log rate limiter, safe to share between evaluation tasks.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    slots: DashMap<String, ThrottleSlot>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: DashMap::new(),
        }
    }

    /// Returns `Some(suppressed_since_last)` when a line for `key` should be
    /// emitted now, `None` when it should be swallowed.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        if let Some(mut slot) = self.slots.get_mut(key) {
            if now.duration_since(slot.last_emit) >= self.interval {
                let suppressed = slot.suppressed;
                slot.last_emit = now;
                slot.suppressed = 0;
                return Some(suppressed);
            }
            slot.suppressed += 1;
            return None;
        }
        self.slots.insert(
            key.to_string(),
            ThrottleSlot {
                last_emit: now,
                suppressed: 0,
            },
        );
        Some(0)
    }

    /// Forget a key (e.g. when its strategy is deleted).
    pub fn clear(&self, key: &str) {
        self.slots.remove(key);
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_passes_then_suppressed() {
        let throttle = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(throttle.check("stale"), Some(0));
        assert_eq!(throttle.check("stale"), None);
        assert_eq!(throttle.check("stale"), None);
        // Independent key is not affected
        assert_eq!(throttle.check("missing:ETH"), Some(0));
    }

    #[test]
    fn test_reports_suppressed_count_after_interval() {
        let throttle = LogThrottle::new(Duration::from_millis(5));
        assert_eq!(throttle.check("k"), Some(0));
        assert_eq!(throttle.check("k"), None);
        assert_eq!(throttle.check("k"), None);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(throttle.check("k"), Some(2));
    }
}
