// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-topic debounce.
//!
//! Keys are fully qualified received topics, so concrete topics matched
//! by one wildcard subscription are throttled independently.
//!
//! The key table is never pruned. A wildcard subscription over an
//! unbounded set of topics grows it for the lifetime of the item.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Decides whether an inbound message is processed.
#[derive(Debug, Default)]
pub struct ThrottleGate {
    /// Minimum time between admitted messages for one key.
    min_interval: Option<Duration>,
    /// Instant of the last admitted message per key.
    last_admitted: HashMap<String, Instant>,
}

impl ThrottleGate {
    /// Create a gate. `None` admits everything.
    pub fn new(min_interval: Option<Duration>) -> Self {
        Self {
            min_interval,
            last_admitted: HashMap::new(),
        }
    }

    /// Check whether a message for `key` arriving at `now` is admitted.
    ///
    /// Admission records `now` for `key`; rejection leaves the record alone.
    pub fn admit(&mut self, key: &str, now: Instant) -> bool {
        let Some(min_interval) = self.min_interval else {
            return true;
        };

        if let Some(last) = self.last_admitted.get_mut(key) {
            if now.saturating_duration_since(*last) < min_interval {
                return false;
            }
            *last = now;
            return true;
        }

        self.last_admitted.insert(key.to_string(), now);
        true
    }

    /// Configured interval.
    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    /// Number of keys tracked.
    pub fn tracked_keys(&self) -> usize {
        self.last_admitted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_no_interval_admits_everything() {
        let mut gate = ThrottleGate::new(None);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(gate.admit("a", now));
        }
        assert_eq!(gate.tracked_keys(), 0);
    }

    #[test]
    fn test_drops_messages_inside_interval() {
        let mut gate = ThrottleGate::new(Some(ms(100)));
        let base = Instant::now();

        assert!(gate.admit("myTopic/A", base));
        assert!(!gate.admit("myTopic/A", base + ms(50)));
        assert!(gate.admit("myTopic/A", base + ms(100)));
    }

    #[test]
    fn test_rejection_does_not_reset_interval() {
        let mut gate = ThrottleGate::new(Some(ms(100)));
        let base = Instant::now();

        assert!(gate.admit("t", base));
        assert!(!gate.admit("t", base + ms(60)));
        assert!(!gate.admit("t", base + ms(99)));
        // Measured from the first admission, not from the rejections.
        assert!(gate.admit("t", base + ms(120)));
        assert!(!gate.admit("t", base + ms(200)));
        assert!(gate.admit("t", base + ms(220)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut gate = ThrottleGate::new(Some(ms(100)));
        let base = Instant::now();

        assert!(gate.admit("myTopic/A", base));
        assert!(gate.admit("myTopic/B", base + ms(10)));
        assert!(!gate.admit("myTopic/A", base + ms(20)));
        assert!(!gate.admit("myTopic/B", base + ms(30)));
        assert_eq!(gate.tracked_keys(), 2);
    }

    #[test]
    fn test_zero_interval_admits_everything() {
        let mut gate = ThrottleGate::new(Some(Duration::ZERO));
        let now = Instant::now();
        assert!(gate.admit("a", now));
        assert!(gate.admit("a", now));
    }
}
