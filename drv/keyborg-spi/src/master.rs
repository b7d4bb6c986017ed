// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_keyborg_msg::{
    parse_packet, Command, Packet, WireProfile, HEADER_SIZE, MAX_DATA_SIZE,
    MAX_PACKET_SIZE, TRAILER_SIZE,
};
use drv_keyborg_sync::{Barrier, SyncError};
use embedded_hal::digital::v2::{InputPin, OutputPin};
use ringbuf::*;
use ticks::{Clock, Deadline};

use crate::{MasterLink, SpiBus, SpiConfig, SpiError, SpiStats, DUMMY};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Sent { cmd: u8, size: u8 },
    Received { size: u8 },
    ReadyTimeout { want: bool },
    DmaTimeout,
    Error(SpiError),
    Retry { attempts_left: u16 },
    FailedRetries { retries: u16, last: SpiError },
    Hello { passed: u32, failed: u32 },
}
ringbuf!(Trace, 32, Trace::None);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HelloReport {
    pub passed: u32,
    pub failed: u32,
}

/// Master end of the link.
///
/// `cs` is the slave's active-low chip select; `ready` is the slave's
/// active-high ready line.
pub struct SpiMaster<B, S, O, I, C> {
    bus: B,
    sync: S,
    cs: O,
    ready: I,
    clock: C,
    config: SpiConfig,
    stats: SpiStats,
    rx: [u8; MAX_PACKET_SIZE],
    /// Data length of the response being received, between
    /// `wait_response_async` and `wait_response_done`.
    pending: Option<usize>,
}

impl<B, S, O, I, C> SpiMaster<B, S, O, I, C>
where
    B: SpiBus,
    S: Barrier,
    O: OutputPin,
    I: InputPin,
    C: Clock,
{
    pub fn new(
        bus: B,
        sync: S,
        cs: O,
        ready: I,
        clock: C,
        config: SpiConfig,
    ) -> Result<Self, SpiError> {
        let mut this = Self {
            bus,
            sync,
            cs,
            ready,
            clock,
            config,
            stats: SpiStats::default(),
            rx: [0; MAX_PACKET_SIZE],
            pending: None,
        };
        this.set_cs(false)?;
        Ok(this)
    }

    pub fn stats(&self) -> &SpiStats {
        &self.stats
    }

    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    fn set_cs(&mut self, asserted: bool) -> Result<(), SpiError> {
        let r = if asserted {
            self.cs.set_low()
        } else {
            self.cs.set_high()
        };
        r.map_err(|_| SpiError::Pin)
    }

    // Poll the slave's ready line until it reads `want`.
    fn wait_ready(
        &mut self,
        want: bool,
        timeout_ms: u32,
    ) -> Result<(), SpiError> {
        let deadline = Deadline::after_ms(&self.clock, timeout_ms);
        while self.ready.is_high().map_err(|_| SpiError::Pin)? != want {
            if deadline.expired(&self.clock) {
                ringbuf_entry!(Trace::ReadyTimeout { want });
                return Err(SpiError::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    fn wait_dma(&mut self) -> Result<(), SpiError> {
        let deadline =
            Deadline::after_ms(&self.clock, self.config.dma_timeout_ms);
        while !self.bus.is_done() {
            if deadline.expired(&self.clock) {
                ringbuf_entry!(Trace::DmaTimeout);
                return Err(SpiError::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    fn fail(&mut self, err: SpiError) {
        ringbuf_entry!(Trace::Error(err));
        self.stats.record(err);
    }

    fn do_send_command(&mut self, cmd: &Packet) -> Result<(), SpiError> {
        // Checked before touching any line.
        let frame = cmd.encode(WireProfile::Spi)?;
        let (&size, body) = frame.split_first().ok_or(SpiError::Length)?;

        self.wait_ready(false, self.config.ready_timeout_ms)?;
        self.set_cs(true)?;

        let r = self.clock_out(size, body);
        self.bus.stop();
        let released = self.set_cs(false);
        r.and(released)
    }

    fn clock_out(&mut self, size: u8, body: &[u8]) -> Result<(), SpiError> {
        let short = self.config.short_timeout_ms;
        self.sync.sync(short)?;
        // Whatever the slave shifts back during the size byte is garbage.
        self.bus.exchange(size)?;
        self.sync.sync(short)?;
        self.bus.start_write(body);
        self.wait_dma()
    }

    fn do_wait_response_async(&mut self) -> Result<(), SpiError> {
        let timeout = self.config.response_timeout_ms;
        self.sync.sync(timeout)?;
        self.wait_ready(true, timeout)?;
        self.set_cs(true)?;

        let size = self.bus.exchange(DUMMY)?;
        let len = usize::from(size);
        if len > MAX_DATA_SIZE {
            return Err(SpiError::Overflow);
        }

        self.sync.sync(self.config.short_timeout_ms)?;

        self.rx[0] = size;
        // Status byte, data, trailer.
        self.bus.start_read(HEADER_SIZE - 1 + len + TRAILER_SIZE);
        self.pending = Some(len);
        Ok(())
    }

    fn do_wait_response_done(&mut self) -> Result<Packet, SpiError> {
        let len = self.pending.take().ok_or(SpiError::NotStarted)?;
        self.wait_dma()?;

        let total = HEADER_SIZE + len + TRAILER_SIZE;
        self.bus.take_read(&mut self.rx[1..total])?;
        let resp = parse_packet(WireProfile::Spi, &self.rx[..total])?;
        if !resp.is_ok() {
            return Err(SpiError::SlaveError(resp.cmd_status));
        }
        Ok(resp)
    }

    /// One HELLO request/response pair.
    pub fn hello(&mut self) -> Result<(), SpiError> {
        self.send_command(&Packet::command(Command::Hello))?;
        self.wait_response_async()?;
        self.wait_response_done().map(|_| ())
    }

    // Repeat the whole pair, never a piece of it: a failure anywhere
    // leaves the slave in an unknown phase of its own loop.
    fn hello_retries(&mut self) -> Result<(), SpiError> {
        let retries = self.config.hello_retries.max(1);
        let mut attempts_left = retries;

        loop {
            let err = match self.hello() {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            attempts_left -= 1;
            if !err.is_recoverable() || attempts_left == 0 {
                ringbuf_entry!(Trace::FailedRetries { retries, last: err });
                return Err(err);
            }

            self.stats.retries = self.stats.retries.wrapping_add(1);
            ringbuf_entry!(Trace::Retry { attempts_left });
        }
    }

    /// Link self-test: `iterations` hello pairs, each retried up to the
    /// configured count.
    pub fn hello_test(&mut self, iterations: u32) -> HelloReport {
        let mut report = HelloReport::default();
        for _ in 0..iterations {
            match self.hello_retries() {
                Ok(()) => report.passed += 1,
                Err(_) => report.failed += 1,
            }
        }
        ringbuf_entry!(Trace::Hello {
            passed: report.passed,
            failed: report.failed
        });
        report
    }
}

impl<B, S, O, I, C> Barrier for SpiMaster<B, S, O, I, C>
where
    S: Barrier,
{
    fn sync(&mut self, timeout_ms: u32) -> Result<(), SyncError> {
        self.sync.sync(timeout_ms)
    }
}

impl<B, S, O, I, C> MasterLink for SpiMaster<B, S, O, I, C>
where
    B: SpiBus,
    S: Barrier,
    O: OutputPin,
    I: InputPin,
    C: Clock,
{
    fn send_command(&mut self, cmd: &Packet) -> Result<(), SpiError> {
        match self.do_send_command(cmd) {
            Ok(()) => {
                self.stats.commands = self.stats.commands.wrapping_add(1);
                ringbuf_entry!(Trace::Sent {
                    cmd: cmd.cmd_status,
                    size: cmd.size()
                });
                Ok(())
            }
            Err(e) => {
                self.fail(e);
                Err(e)
            }
        }
    }

    fn wait_response_async(&mut self) -> Result<(), SpiError> {
        let r = self.do_wait_response_async();
        if let Err(e) = r {
            self.pending = None;
            self.bus.stop();
            // Already failing; report the first error.
            let _ = self.set_cs(false);
            self.fail(e);
        }
        r
    }

    fn wait_response_done(&mut self) -> Result<Packet, SpiError> {
        let r = self.do_wait_response_done();
        self.bus.stop();
        let r = r.and_then(|resp| self.set_cs(false).map(|()| resp));
        match r {
            Ok(resp) => {
                self.stats.responses = self.stats.responses.wrapping_add(1);
                ringbuf_entry!(Trace::Received { size: resp.size() });
                Ok(resp)
            }
            Err(e) => {
                let _ = self.set_cs(false);
                self.fail(e);
                Err(e)
            }
        }
    }
}
