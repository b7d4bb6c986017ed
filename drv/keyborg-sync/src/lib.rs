// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lockstep barrier between the two touch controller chips.
//!
//! Each chip drives one sync line and watches the other's. A round is
//!
//! ```text
//! master: assert own -> wait peer high -> deassert own -> wait peer low
//! slave:                wait peer high -> assert own -> wait peer low
//!                                                     -> deassert own
//! ```
//!
//! so neither side leaves [`Barrier::sync`] before the other has entered
//! it. The first wait is bounded by the caller's timeout; the second only
//! has to cover the peer's reaction time and uses the short timeout from
//! [`SyncConfig`].
//!
//! A failed round leaves our line deasserted and reports which wait
//! expired. Nothing here retries.

#![cfg_attr(not(test), no_std)]

use core::task::Poll;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use ringbuf::*;
use serde::Deserialize;
use ticks::{Clock, Deadline};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    /// Reads the board strap: pulled high on the master, low on the slave.
    ///
    /// This is meant to be read once at startup and kept for the life of
    /// the firmware.
    pub fn probe<P: InputPin>(strap: &P) -> Result<Role, SyncError> {
        let role = if strap.is_high().map_err(|_| SyncError::Pin)? {
            Role::Master
        } else {
            Role::Slave
        };
        ringbuf_entry!(Trace::Probed(role));
        Ok(role)
    }
}

/// The wait that was in progress when a round failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncPhase {
    PeerAssert,
    PeerDeassert,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncError {
    Timeout { phase: SyncPhase },
    /// A GPIO operation failed.
    Pin,
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Probed(Role),
    Timeout { role: Role, phase: SyncPhase },
    Pin,
}
ringbuf!(Trace, 16, Trace::None);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bound on the second half of a round, once the peer has shown up.
    pub short_timeout_ms: u32,
    /// Bound on the first round after boot, while the peer may still be
    /// starting.
    pub initial_timeout_ms: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            short_timeout_ms: 5,
            initial_timeout_ms: 1000,
        }
    }
}

/// Our output line and the peer's input line.
pub struct SyncLines<O, I> {
    pub own: O,
    pub peer: I,
}

impl<O: OutputPin, I: InputPin> SyncLines<O, I> {
    fn set_own(&mut self, asserted: bool) -> Result<(), SyncError> {
        let r = if asserted {
            self.own.set_high()
        } else {
            self.own.set_low()
        };
        r.map_err(|_| SyncError::Pin)
    }

    fn peer_asserted(&self) -> Result<bool, SyncError> {
        self.peer.is_high().map_err(|_| SyncError::Pin)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Step {
    AssertOwn,
    WaitPeerAssert,
    DeassertOwn,
    WaitPeerDeassert,
    Done,
    Failed(SyncError),
}

/// One sync round, advanced by [`SyncRound::poll`].
///
/// The blocking [`Handshake`] is a loop around this; tests step two rounds
/// against each other directly.
#[derive(Clone, Debug)]
pub struct SyncRound {
    role: Role,
    step: Step,
    deadline: Deadline,
    short_timeout_ms: u32,
}

impl SyncRound {
    pub fn new(
        role: Role,
        clock: &impl Clock,
        timeout_ms: u32,
        short_timeout_ms: u32,
    ) -> Self {
        let step = match role {
            Role::Master => Step::AssertOwn,
            Role::Slave => Step::WaitPeerAssert,
        };
        Self {
            role,
            step,
            deadline: Deadline::after_ms(clock, timeout_ms),
            short_timeout_ms,
        }
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    /// Takes every step that can be taken right now.
    ///
    /// Returns `Ready` once the round has finished or failed, and keeps
    /// returning the same result if polled again.
    pub fn poll<O: OutputPin, I: InputPin>(
        &mut self,
        lines: &mut SyncLines<O, I>,
        clock: &impl Clock,
    ) -> Poll<Result<(), SyncError>> {
        match self.advance(lines, clock) {
            Ok(true) => Poll::Ready(Ok(())),
            Ok(false) => Poll::Pending,
            Err(e) => {
                self.step = Step::Failed(e);
                // Best effort: we are already reporting a failure.
                let _ = lines.set_own(false);
                Poll::Ready(Err(e))
            }
        }
    }

    fn advance<O: OutputPin, I: InputPin>(
        &mut self,
        lines: &mut SyncLines<O, I>,
        clock: &impl Clock,
    ) -> Result<bool, SyncError> {
        loop {
            match self.step {
                Step::AssertOwn => {
                    lines.set_own(true)?;
                    self.step = match self.role {
                        Role::Master => Step::WaitPeerAssert,
                        Role::Slave => {
                            self.deadline = self.short_deadline(clock);
                            Step::WaitPeerDeassert
                        }
                    };
                }
                Step::WaitPeerAssert => {
                    if lines.peer_asserted()? {
                        self.step = match self.role {
                            Role::Master => Step::DeassertOwn,
                            Role::Slave => Step::AssertOwn,
                        };
                    } else if self.deadline.expired(clock) {
                        return Err(self.timeout(SyncPhase::PeerAssert));
                    } else {
                        return Ok(false);
                    }
                }
                Step::DeassertOwn => {
                    lines.set_own(false)?;
                    self.step = match self.role {
                        Role::Master => {
                            self.deadline = self.short_deadline(clock);
                            Step::WaitPeerDeassert
                        }
                        Role::Slave => Step::Done,
                    };
                }
                Step::WaitPeerDeassert => {
                    if !lines.peer_asserted()? {
                        self.step = match self.role {
                            Role::Master => Step::Done,
                            Role::Slave => Step::DeassertOwn,
                        };
                    } else if self.deadline.expired(clock) {
                        return Err(self.timeout(SyncPhase::PeerDeassert));
                    } else {
                        return Ok(false);
                    }
                }
                Step::Done => return Ok(true),
                Step::Failed(e) => return Err(e),
            }
        }
    }

    fn short_deadline(&self, clock: &impl Clock) -> Deadline {
        Deadline::after_ms(clock, self.short_timeout_ms)
    }

    fn timeout(&self, phase: SyncPhase) -> SyncError {
        ringbuf_entry!(Trace::Timeout {
            role: self.role,
            phase
        });
        SyncError::Timeout { phase }
    }
}

/// A lockstep point shared with the other chip.
pub trait Barrier {
    fn sync(&mut self, timeout_ms: u32) -> Result<(), SyncError>;
}

impl<B: Barrier + ?Sized> Barrier for &mut B {
    fn sync(&mut self, timeout_ms: u32) -> Result<(), SyncError> {
        (**self).sync(timeout_ms)
    }
}

/// Blocking sync rounds over a pair of GPIO lines.
pub struct Handshake<O, I, C> {
    role: Role,
    lines: SyncLines<O, I>,
    clock: C,
    config: SyncConfig,
}

impl<O: OutputPin, I: InputPin, C: Clock> Handshake<O, I, C> {
    /// Takes the lines and drives our own low.
    pub fn new(
        role: Role,
        lines: SyncLines<O, I>,
        clock: C,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let mut this = Self {
            role,
            lines,
            clock,
            config,
        };
        if let Err(e) = this.lines.set_own(false) {
            ringbuf_entry!(Trace::Pin);
            return Err(e);
        }
        Ok(this)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// First round after boot, with the long timeout.
    pub fn establish(&mut self) -> Result<(), SyncError> {
        self.sync(self.config.initial_timeout_ms)
    }

    pub fn release(self) -> (SyncLines<O, I>, C) {
        (self.lines, self.clock)
    }
}

impl<O: OutputPin, I: InputPin, C: Clock> Barrier for Handshake<O, I, C> {
    fn sync(&mut self, timeout_ms: u32) -> Result<(), SyncError> {
        let mut round = SyncRound::new(
            self.role,
            &self.clock,
            timeout_ms,
            self.config.short_timeout_ms,
        );
        loop {
            match round.poll(&mut self.lines, &self.clock) {
                Poll::Ready(r) => return r,
                Poll::Pending => core::hint::spin_loop(),
            }
        }
    }
}
