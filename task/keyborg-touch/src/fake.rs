// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted column drivers, samplers and links that log what the scanner
//! asked of them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use drv_keyborg_msg::Packet;
use drv_keyborg_spi::{MasterLink, SlaveLink, SpiError};
use drv_keyborg_sync::{Barrier, SyncError, SyncPhase};

use crate::{ColumnDriver, RowSampler};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ev {
    Enable(usize),
    Disable(usize),
    Sample,
    Sync,
    Command(u8),
    Async,
    Done,
    Flush,
    Respond(u8, Vec<u8>),
}

pub type Log = Rc<RefCell<Vec<Ev>>>;

pub fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub struct FakeDriver(pub Log);

impl ColumnDriver for FakeDriver {
    fn enable(&mut self, col: usize) {
        self.0.borrow_mut().push(Ev::Enable(col));
    }

    fn disable(&mut self, col: usize) {
        self.0.borrow_mut().push(Ev::Disable(col));
    }
}

/// Fills every row of the n-th sample (from 1) with n.
pub struct FakeSampler {
    pub log: Log,
    pub next: u8,
}

impl FakeSampler {
    pub fn new(log: Log) -> Self {
        Self { log, next: 1 }
    }
}

impl<const ROWS: usize> RowSampler<ROWS> for FakeSampler {
    fn sample(&mut self, rows: &mut [u8; ROWS]) {
        self.log.borrow_mut().push(Ev::Sample);
        rows.fill(self.next);
        self.next = self.next.wrapping_add(1);
    }
}

/// Shared sync behaviour: every round succeeds except the n-th (from 0).
struct Rounds {
    log: Log,
    calls: u32,
    fail_at: Option<u32>,
}

impl Rounds {
    fn sync(&mut self) -> Result<(), SyncError> {
        let n = self.calls;
        self.calls += 1;
        if self.fail_at == Some(n) {
            return Err(SyncError::Timeout {
                phase: SyncPhase::PeerAssert,
            });
        }
        self.log.borrow_mut().push(Ev::Sync);
        Ok(())
    }
}

/// Master side of the link; the n-th response (from 0) carries
/// `[10 + n, 20 + n]`.
pub struct FakeMaster {
    rounds: Rounds,
    responses: u8,
    pub fail_command: Option<SpiError>,
    /// Response index and the status the slave answers it with.
    pub status_at: Option<(u8, u8)>,
}

impl FakeMaster {
    pub fn new(log: Log) -> Self {
        Self {
            rounds: Rounds {
                log,
                calls: 0,
                fail_at: None,
            },
            responses: 0,
            fail_command: None,
            status_at: None,
        }
    }

    pub fn failing_sync_at(mut self, n: u32) -> Self {
        self.rounds.fail_at = Some(n);
        self
    }

    fn push(&self, ev: Ev) {
        self.rounds.log.borrow_mut().push(ev);
    }
}

impl Barrier for FakeMaster {
    fn sync(&mut self, _timeout_ms: u32) -> Result<(), SyncError> {
        self.rounds.sync()
    }
}

impl MasterLink for FakeMaster {
    fn send_command(&mut self, cmd: &Packet) -> Result<(), SpiError> {
        if let Some(e) = self.fail_command {
            return Err(e);
        }
        self.push(Ev::Command(cmd.cmd_status));
        Ok(())
    }

    fn wait_response_async(&mut self) -> Result<(), SpiError> {
        self.push(Ev::Async);
        Ok(())
    }

    fn wait_response_done(&mut self) -> Result<Packet, SpiError> {
        self.push(Ev::Done);
        let n = self.responses;
        self.responses += 1;
        match self.status_at {
            Some((at, status)) if at == n => Err(SpiError::SlaveError(status)),
            _ => Ok(Packet::new(0, &[10 + n, 20 + n])?),
        }
    }
}

/// Slave side of the link, fed a queue of incoming commands.
pub struct FakeSlave {
    rounds: Rounds,
    pub commands: VecDeque<Result<Packet, SpiError>>,
    flushes: u32,
    pub fail_flush_at: Option<u32>,
}

impl FakeSlave {
    pub fn new(log: Log) -> Self {
        Self {
            rounds: Rounds {
                log,
                calls: 0,
                fail_at: None,
            },
            commands: VecDeque::new(),
            flushes: 0,
            fail_flush_at: None,
        }
    }

    pub fn failing_sync_at(mut self, n: u32) -> Self {
        self.rounds.fail_at = Some(n);
        self
    }

    fn push(&self, ev: Ev) {
        self.rounds.log.borrow_mut().push(ev);
    }
}

impl Barrier for FakeSlave {
    fn sync(&mut self, _timeout_ms: u32) -> Result<(), SyncError> {
        self.rounds.sync()
    }
}

impl SlaveLink for FakeSlave {
    fn wait_command(&mut self, _timeout_ms: u32) -> Result<Packet, SpiError> {
        self.commands.pop_front().unwrap_or(Err(SpiError::Timeout))
    }

    fn send_response_async(&mut self, resp: &Packet) -> Result<(), SpiError> {
        self.push(Ev::Respond(resp.cmd_status, resp.data.to_vec()));
        Ok(())
    }

    fn send_response_flush(&mut self) -> Result<(), SpiError> {
        let n = self.flushes;
        self.flushes += 1;
        if self.fail_flush_at == Some(n) {
            return Err(SpiError::Timeout);
        }
        self.push(Ev::Flush);
        Ok(())
    }
}
