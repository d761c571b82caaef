//! Damping schedulers: debounce for document diffs, throttle for presence.
//!
//! DESIGN
//! ======
//! Two disciplines, and the choice matters. Outbound document diffs use a
//! trailing-edge *debounce* so rapid edits to the same key collapse into one
//! remote write. Presence broadcasts use a leading-edge *throttle* so cursor
//! updates stay live but rate-capped, with a longer interval while the local
//! user is drawing to keep presence traffic from competing with shape edits.
//!
//! Both schedulers are driven by an injected [`Clock`] so tests never touch
//! wall-clock time.

#[cfg(test)]
#[path = "sched_test.rs"]
mod sched_test;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// =============================================================================
// CLOCK
// =============================================================================

/// Time source for the schedulers.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    /// Move time forward.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// =============================================================================
// DEBOUNCE
// =============================================================================

/// Trailing-edge debounce. Every `schedule` pushes the deadline out; the
/// pending work fires once the quiet period elapses.
#[derive(Debug)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, deadline: None }
    }

    /// Arm (or re-arm) the deadline at `now + delay`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once the quiet period has elapsed.
    #[must_use]
    pub fn ready(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Consume the deadline if it is due. Returns whether it fired.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Force an immediate fire regardless of the deadline. Returns whether
    /// anything was pending.
    pub fn flush(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Drop the pending deadline without firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

// =============================================================================
// THROTTLE
// =============================================================================

/// Leading-edge throttle: the first call passes immediately, later calls
/// pass once the interval has elapsed since the last accepted one.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Change the interval for subsequent calls.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a call at `now` is admitted; admitted calls reset the window.
    pub fn allow(&mut self, now: Instant) -> bool {
        let pass = self
            .last
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if pass {
            self.last = Some(now);
        }
        pass
    }

    /// Forget the last accepted call so the next one passes immediately.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
