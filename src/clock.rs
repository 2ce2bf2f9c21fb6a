//! Monotonic millisecond time source
//!
//! All deadlines in the session (token expiry, poll schedule, retry backoff)
//! are plain millisecond instants since boot. The firmware reads them from the
//! ESP high-resolution timer; tests drive a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Milliseconds since boot
pub type Instant = u64;

/// Source of monotonic time
pub trait Clock {
    fn now_ms(&self) -> Instant;
}

/// Instant `delay` after `now`, saturating at the end of time
///
/// Delays come straight from provider responses and may be arbitrarily large.
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

/// Clock advanced by hand. Clones share the same counter, so a test can keep
/// one handle while the state machine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(ms: Instant) -> Self {
        let clock = Self::default();
        clock.set(ms);
        clock
    }

    pub fn set(&self, ms: Instant) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs.saturating_mul(1000));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Instant {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_saturates() {
        assert_eq!(deadline_after(1_000, Duration::from_secs(5)), 6_000);
        assert_eq!(deadline_after(1_000, Duration::from_secs(u64::MAX)), u64::MAX);
        assert_eq!(deadline_after(u64::MAX - 1, Duration::from_millis(10)), u64::MAX);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = ManualClock::starting_at(1_000);
        let handle = clock.clone();
        handle.advance_secs(2);
        assert_eq!(clock.now_ms(), 3_000);
    }
}
