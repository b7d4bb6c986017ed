// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_keyborg_msg::{
    parse_packet, Packet, WireProfile, HEADER_SIZE, MAX_DATA_SIZE,
    MAX_PACKET_SIZE, TRAILER_SIZE,
};
use drv_keyborg_sync::{Barrier, SyncError};
use embedded_hal::digital::v2::{InputPin, OutputPin};
use ringbuf::*;
use ticks::{Clock, Deadline};

use crate::{SlaveLink, SpiBus, SpiConfig, SpiError, SpiStats, DUMMY};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Command { cmd: u8, size: u8 },
    ResponseQueued { status: u8, size: u8 },
    Flushed,
    CsTimeout { want: bool },
    DmaTimeout,
    Error(SpiError),
}
ringbuf!(Trace, 32, Trace::None);

/// Slave end of the link.
///
/// `ready` is our active-high ready line; `cs` is the master's active-low
/// chip select.
pub struct SpiSlave<B, S, O, I, C> {
    bus: B,
    sync: S,
    ready: O,
    cs: I,
    clock: C,
    config: SpiConfig,
    stats: SpiStats,
    rx: [u8; MAX_PACKET_SIZE],
    /// A response is loaded and the master has not finished clocking it.
    in_flight: bool,
}

impl<B, S, O, I, C> SpiSlave<B, S, O, I, C>
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
        ready: O,
        cs: I,
        clock: C,
        config: SpiConfig,
    ) -> Result<Self, SpiError> {
        let mut this = Self {
            bus,
            sync,
            ready,
            cs,
            clock,
            config,
            stats: SpiStats::default(),
            rx: [0; MAX_PACKET_SIZE],
            in_flight: false,
        };
        this.set_ready(false)?;
        Ok(this)
    }

    pub fn stats(&self) -> &SpiStats {
        &self.stats
    }

    fn set_ready(&mut self, ready: bool) -> Result<(), SpiError> {
        let r = if ready {
            self.ready.set_high()
        } else {
            self.ready.set_low()
        };
        r.map_err(|_| SpiError::Pin)
    }

    fn wait_cs(
        &mut self,
        asserted: bool,
        timeout_ms: u32,
    ) -> Result<(), SpiError> {
        let deadline = Deadline::after_ms(&self.clock, timeout_ms);
        while self.cs.is_low().map_err(|_| SpiError::Pin)? != asserted {
            if deadline.expired(&self.clock) {
                ringbuf_entry!(Trace::CsTimeout { want: asserted });
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

    /// Waits for the master to select us. Not being called is the normal
    /// idle case, so a timeout here is neither traced nor counted.
    fn wait_selected(&mut self, timeout_ms: u32) -> Result<(), SpiError> {
        let deadline = Deadline::after_ms(&self.clock, timeout_ms);
        while !self.cs.is_low().map_err(|_| SpiError::Pin)? {
            if deadline.expired(&self.clock) {
                return Err(SpiError::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    fn do_wait_command(&mut self) -> Result<Packet, SpiError> {
        let short = self.config.short_timeout_ms;
        self.sync.sync(short)?;
        let size = self.bus.exchange(DUMMY)?;
        let len = usize::from(size);
        if len > MAX_DATA_SIZE {
            return Err(SpiError::Overflow);
        }
        self.sync.sync(short)?;

        let total = HEADER_SIZE + len + TRAILER_SIZE;
        self.bus.start_read(total - 1);
        self.wait_dma()?;
        self.rx[0] = size;
        self.bus.take_read(&mut self.rx[1..total])?;
        parse_packet(WireProfile::Spi, &self.rx[..total]).map_err(Into::into)
    }

    fn do_send_response_async(
        &mut self,
        resp: &Packet,
    ) -> Result<(), SpiError> {
        let frame = resp.encode(WireProfile::Spi)?;
        let (&size, body) = frame.split_first().ok_or(SpiError::Length)?;

        self.sync.sync(self.config.slave_response_timeout_ms)?;

        // The size byte sits in the shift register before we say we are
        // ready, so the master's first clock picks it up.
        self.set_ready(true)?;
        self.bus.exchange(size)?;
        self.bus.start_write(body);
        self.in_flight = true;

        self.sync.sync(self.config.short_timeout_ms)?;
        Ok(())
    }

    fn do_send_response_flush(&mut self) -> Result<(), SpiError> {
        if !self.in_flight {
            return Err(SpiError::NotStarted);
        }
        // The master releases CS once it has the whole response.
        self.wait_cs(false, self.config.flush_timeout_ms)?;
        self.wait_dma()
    }
}

impl<B, S, O, I, C> Barrier for SpiSlave<B, S, O, I, C>
where
    S: Barrier,
{
    fn sync(&mut self, timeout_ms: u32) -> Result<(), SyncError> {
        self.sync.sync(timeout_ms)
    }
}

impl<B, S, O, I, C> SlaveLink for SpiSlave<B, S, O, I, C>
where
    B: SpiBus,
    S: Barrier,
    O: OutputPin,
    I: InputPin,
    C: Clock,
{
    fn wait_command(&mut self, timeout_ms: u32) -> Result<Packet, SpiError> {
        self.wait_selected(timeout_ms)?;
        let r = self.do_wait_command();
        self.bus.stop();
        match r {
            Ok(cmd) => {
                self.stats.commands = self.stats.commands.wrapping_add(1);
                ringbuf_entry!(Trace::Command {
                    cmd: cmd.cmd_status,
                    size: cmd.size()
                });
                Ok(cmd)
            }
            Err(e) => {
                self.fail(e);
                Err(e)
            }
        }
    }

    fn send_response_async(&mut self, resp: &Packet) -> Result<(), SpiError> {
        let r = self.do_send_response_async(resp);
        match r {
            Ok(()) => {
                ringbuf_entry!(Trace::ResponseQueued {
                    status: resp.cmd_status,
                    size: resp.size()
                });
            }
            Err(e) => {
                self.in_flight = false;
                self.bus.stop();
                let _ = self.set_ready(false);
                self.fail(e);
            }
        }
        r
    }

    fn send_response_flush(&mut self) -> Result<(), SpiError> {
        let r = self.do_send_response_flush();
        self.in_flight = false;
        self.bus.stop();
        let r = r.and(self.set_ready(false));
        match r {
            Ok(()) => {
                self.stats.responses = self.stats.responses.wrapping_add(1);
                ringbuf_entry!(Trace::Flushed);
            }
            Err(e) => self.fail(e),
        }
        r
    }
}
