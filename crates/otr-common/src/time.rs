// ============================================
// File: crates/otr-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! A conversation answers incoming data with an empty heartbeat when it
//! has been quiet for a while, so the peer keeps rotating keys.
//!
//! ## Main Functionality
//! - `Heartbeat`: tracks when we last sent anything and whether a
//!   heartbeat is due
//!
//! ## ⚠️ Important Note for Next Developer
//! - `*_at` variants take the current instant explicitly; use them in tests
//!   instead of sleeping
//!
//! ## Last Modified
//! v0.1.0 - Initial heartbeat tracker

use std::time::{Duration, Instant};

// ============================================
// Constants
// ============================================

/// Default quiet period before a heartbeat is sent (60 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

// ============================================
// Heartbeat
// ============================================

/// Tracks outgoing activity for heartbeat scheduling.
///
/// # Example
/// ```
/// use otr_common::time::Heartbeat;
/// use std::time::{Duration, Instant};
///
/// let mut hb = Heartbeat::new(Duration::from_secs(60));
/// let start = Instant::now();
/// assert!(hb.due_at(start));
///
/// hb.record_sent_at(start);
/// assert!(!hb.due_at(start + Duration::from_secs(30)));
/// assert!(hb.due_at(start + Duration::from_secs(61)));
/// ```
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last_sent: Option<Instant>,
    interval: Duration,
}

impl Heartbeat {
    /// Creates a tracker that has never sent anything.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            last_sent: None,
            interval,
        }
    }

    /// Returns the configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns when we last sent something, if ever.
    #[must_use]
    pub const fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Returns `true` if a heartbeat should go out now.
    #[must_use]
    pub fn due(&self) -> bool {
        self.due_at(Instant::now())
    }

    /// Returns `true` if a heartbeat should go out at `now`.
    #[must_use]
    pub fn due_at(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    /// Records an outgoing message now.
    pub fn record_sent(&mut self) {
        self.record_sent_at(Instant::now());
    }

    /// Records an outgoing message at `now`.
    pub fn record_sent_at(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Forgets the last send, e.g. when the session is torn down.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_due_when_never_sent() {
        let hb = Heartbeat::default();
        assert!(hb.due());
        assert_eq!(hb.interval(), DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_heartbeat_interval_boundary() {
        let mut hb = Heartbeat::new(Duration::from_secs(10));
        let t0 = Instant::now();
        hb.record_sent_at(t0);

        assert!(!hb.due_at(t0 + Duration::from_secs(10)));
        assert!(hb.due_at(t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_heartbeat_clock_going_backwards() {
        let mut hb = Heartbeat::new(Duration::from_secs(10));
        let t0 = Instant::now();
        hb.record_sent_at(t0 + Duration::from_secs(5));
        assert!(!hb.due_at(t0));
    }

    #[test]
    fn test_heartbeat_reset() {
        let mut hb = Heartbeat::new(Duration::from_secs(10));
        hb.record_sent();
        assert!(!hb.due());
        hb.reset();
        assert!(hb.due());
        assert!(hb.last_sent().is_none());
    }
}
