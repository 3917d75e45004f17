//! Time sources and the single-shot timer used by playback.

use std::sync::atomic::{AtomicI64, Ordering};

/// A source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    #[must_use]
    pub const fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A single pending deadline tagged with what it is for.
///
/// Arming replaces any previous deadline, so at most one is ever pending.
/// A deadline fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer<K> {
    armed: Option<(i64, K)>,
}

impl<K> Default for PendingTimer<K> {
    fn default() -> Self {
        Self { armed: None }
    }
}

impl<K: Copy> PendingTimer<K> {
    /// Arms the timer to fire `delay_ms` after `now_ms`.
    pub fn arm(&mut self, now_ms: i64, delay_ms: i64, kind: K) {
        self.armed = Some((now_ms.saturating_add(delay_ms), kind));
    }

    /// Disarms the timer.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// The pending deadline's tag, if armed.
    #[must_use]
    pub fn pending(&self) -> Option<K> {
        self.armed.map(|(_, kind)| kind)
    }

    /// Returns the tag and disarms if the deadline has passed.
    pub fn fire(&mut self, now_ms: i64) -> Option<K> {
        match self.armed {
            Some((due, kind)) if now_ms >= due => {
                self.armed = None;
                Some(kind)
            }
            _ => None,
        }
    }
}
