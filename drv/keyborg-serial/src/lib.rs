// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host end of the touch controller's serial debug link.
//!
//! The host sends a command framed with [`WireProfile::Serial`] and reads
//! back one response in the same framing. There is no handshake: bytes are
//! polled out of and into the UART against a deadline.

#![cfg_attr(not(test), no_std)]

use drv_keyborg_msg::{
    parse_packet, Command, FrameError, Packet, WireProfile, HEADER_SIZE,
    MAX_DATA_SIZE, MAX_PACKET_SIZE, TRAILER_SIZE,
};
use embedded_hal::serial::{Read, Write};
use ringbuf::*;
use serde::Deserialize;
use ticks::{Clock, Deadline};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SerialError {
    /// Command too large to frame.
    Overflow,
    /// The device did not answer, or stopped partway.
    Timeout,
    /// The UART reported an error.
    Uart,
    Length,
    Checksum,
    /// The device answered with a non-zero status.
    SlaveError(u8),
}

impl From<FrameError> for SerialError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Overflow => SerialError::Overflow,
            FrameError::Length => SerialError::Length,
            FrameError::Checksum => SerialError::Checksum,
        }
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Sent { cmd: u8, len: u8 },
    Received { status: u8, len: u8 },
    Error(SerialError),
}
ringbuf!(Trace, 16, Trace::None);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Bound on sending the whole command.
    pub write_timeout_ms: u32,
    /// Bound on the first response byte.
    pub response_timeout_ms: u32,
    /// Bound on the rest of the response once it has started.
    pub body_timeout_ms: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 10,
            response_timeout_ms: 100,
            body_timeout_ms: 20,
        }
    }
}

pub struct SerialHost<U, C> {
    uart: U,
    clock: C,
    config: SerialConfig,
    rx: [u8; MAX_PACKET_SIZE],
}

impl<U, C> SerialHost<U, C>
where
    U: Read<u8> + Write<u8>,
    C: Clock,
{
    pub fn new(uart: U, clock: C, config: SerialConfig) -> Self {
        Self {
            uart,
            clock,
            config,
            rx: [0; MAX_PACKET_SIZE],
        }
    }

    pub fn uart(&self) -> &U {
        &self.uart
    }

    /// Sends `cmd` and returns the device's response.
    pub fn transact(&mut self, cmd: &Packet) -> Result<Packet, SerialError> {
        let r = self.do_transact(cmd);
        match &r {
            Ok(resp) => ringbuf_entry!(Trace::Received {
                status: resp.cmd_status,
                len: resp.size()
            }),
            Err(e) => ringbuf_entry!(Trace::Error(*e)),
        }
        r
    }

    /// A HELLO round trip.
    pub fn hello(&mut self) -> Result<(), SerialError> {
        self.transact(&Packet::command(Command::Hello)).map(|_| ())
    }

    fn do_transact(&mut self, cmd: &Packet) -> Result<Packet, SerialError> {
        let frame = cmd.encode(WireProfile::Serial)?;

        let deadline =
            Deadline::after_ms(&self.clock, self.config.write_timeout_ms);
        for &b in frame.iter() {
            block(&self.clock, deadline, || self.uart.write(b))?;
        }
        block(&self.clock, deadline, || self.uart.flush())?;
        ringbuf_entry!(Trace::Sent {
            cmd: cmd.cmd_status,
            len: cmd.size()
        });

        let deadline =
            Deadline::after_ms(&self.clock, self.config.response_timeout_ms);
        let size = block(&self.clock, deadline, || self.uart.read())?;
        let len = WireProfile::Serial
            .data_len(size)
            .filter(|&len| len <= MAX_DATA_SIZE)
            .ok_or(SerialError::Length)?;

        let total = HEADER_SIZE + len + TRAILER_SIZE;
        self.rx[0] = size;
        let deadline =
            Deadline::after_ms(&self.clock, self.config.body_timeout_ms);
        for slot in self.rx[1..total].iter_mut() {
            *slot = block(&self.clock, deadline, || self.uart.read())?;
        }

        let resp = parse_packet(WireProfile::Serial, &self.rx[..total])?;
        if !resp.is_ok() {
            return Err(SerialError::SlaveError(resp.cmd_status));
        }
        Ok(resp)
    }
}

// Retry a non-blocking UART operation until it completes or `deadline`
// passes.
fn block<T, E>(
    clock: &impl Clock,
    deadline: Deadline,
    mut op: impl FnMut() -> nb::Result<T, E>,
) -> Result<T, SerialError> {
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(nb::Error::Other(_)) => return Err(SerialError::Uart),
            Err(nb::Error::WouldBlock) => {
                if deadline.expired(clock) {
                    return Err(SerialError::Timeout);
                }
                core::hint::spin_loop();
            }
        }
    }
}
