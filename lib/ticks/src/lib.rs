// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time sources for busy-polled protocol code.
//!
//! The handshake, SPI transport, touch scan, and injector all wait on
//! hardware with a bounded deadline. They are written against [`Clock`]
//! rather than a global timer so that the same code runs against a hardware
//! free-running counter on target and a [`SimClock`] under test.
//!
//! All times are in microseconds since some arbitrary epoch; the counter is
//! 64 bits wide and assumed never to wrap.

#![cfg_attr(not(test), no_std)]

use core::cell::Cell;

pub trait Clock {
    /// Returns the current time in microseconds.
    fn now_us(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// A point in time after which a bounded wait gives up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Deadline {
    at_us: u64,
}

impl Deadline {
    pub fn after_us(clock: &impl Clock, us: u64) -> Self {
        Self {
            at_us: clock.now_us().saturating_add(us),
        }
    }

    pub fn after_ms(clock: &impl Clock, ms: u32) -> Self {
        Self::after_us(clock, u64::from(ms) * 1000)
    }

    pub fn at_us(self) -> u64 {
        self.at_us
    }

    pub fn expired(&self, clock: &impl Clock) -> bool {
        clock.now_us() >= self.at_us
    }

    pub fn remaining_us(&self, clock: &impl Clock) -> u64 {
        self.at_us.saturating_sub(clock.now_us())
    }
}

/// Spins until `us` microseconds have passed.
///
/// This replaces cycle-counted delays: the length of the wait is a duration
/// rather than an instruction count, so it holds across clock speeds.
pub fn busy_wait_us(clock: &impl Clock, us: u64) {
    let deadline = Deadline::after_us(clock, us);
    while !deadline.expired(clock) {
        core::hint::spin_loop();
    }
}

/// A clock for tests.
///
/// Every read advances time by a fixed step, so a loop polling for a
/// condition that never comes true still reaches its deadline. A step of
/// zero freezes time except for explicit [`SimClock::advance_us`] calls.
#[derive(Debug)]
pub struct SimClock {
    now: Cell<u64>,
    step: u64,
}

impl SimClock {
    pub const DEFAULT_STEP_US: u64 = 1;

    pub fn new() -> Self {
        Self::with_step(Self::DEFAULT_STEP_US)
    }

    pub fn with_step(step_us: u64) -> Self {
        Self {
            now: Cell::new(0),
            step: step_us,
        }
    }

    pub fn advance_us(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }

    pub fn set_us(&self, us: u64) {
        self.now.set(us);
    }

    /// Reads the time without advancing it.
    pub fn peek_us(&self) -> u64 {
        self.now.get()
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_clock_steps_on_read() {
        let clock = SimClock::with_step(3);
        assert_eq!(clock.now_us(), 0);
        assert_eq!(clock.now_us(), 3);
        assert_eq!(clock.peek_us(), 6);
    }

    #[test]
    fn frozen_clock_only_moves_when_told() {
        let clock = SimClock::with_step(0);
        let deadline = Deadline::after_ms(&clock, 2);
        assert!(!deadline.expired(&clock));
        assert_eq!(deadline.remaining_us(&clock), 2000);
        clock.advance_us(1999);
        assert!(!deadline.expired(&clock));
        clock.advance_us(1);
        assert!(deadline.expired(&clock));
        assert_eq!(deadline.remaining_us(&clock), 0);
    }

    #[test]
    fn busy_wait_covers_duration() {
        let clock = SimClock::new();
        clock.set_us(500);
        busy_wait_us(&clock, 40);
        assert!(clock.peek_us() >= 540);
    }

    #[test]
    fn deadline_saturates() {
        let clock = SimClock::with_step(0);
        clock.set_us(u64::MAX - 1);
        let deadline = Deadline::after_us(&clock, 10);
        assert_eq!(deadline.at_us(), u64::MAX);
    }
}
