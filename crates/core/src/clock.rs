// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
///
/// `now()` is monotonic; `epoch_ms()` is wall-clock. All scheduling decisions
/// (throttle, intervals) use the monotonic side.
pub trait Clock: Clone {
    fn now(&self) -> Instant;
    fn epoch_ms(&self) -> u64;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fake clock for testing with controllable time.
///
/// Single-threaded by design, like the daemon loop it stands in for.
#[derive(Clone)]
pub struct FakeClock {
    current: Rc<RefCell<Instant>>,
    epoch_ms: Rc<RefCell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Rc::new(RefCell::new(Instant::now())),
            epoch_ms: Rc::new(RefCell::new(1_000_000)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.current.borrow_mut() += duration;
        *self.epoch_ms.borrow_mut() += duration.as_millis() as u64;
    }

    /// Set the clock to a specific instant
    pub fn set(&self, instant: Instant) {
        *self.current.borrow_mut() = instant;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.borrow()
    }

    fn epoch_ms(&self) -> u64 {
        *self.epoch_ms.borrow()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
