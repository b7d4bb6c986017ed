// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SPI link between the master and slave touch controller chips.
//!
//! The master owns the clock and a chip select; the slave owns a "ready"
//! line it raises when it has a response loaded. Every transfer is gated
//! by sync rounds (see `drv-keyborg-sync`) so that the slave's DMA is
//! armed before the master starts clocking:
//!
//! ```text
//! command:  wait ready low, assert CS, sync, size byte, sync, body (DMA),
//!           release CS
//! response: sync, wait ready high, assert CS, size byte, sync,
//!           body (DMA) ... wait done, check CRC/checksum/status, release CS
//! ```
//!
//! The response is split into [`MasterLink::wait_response_async`] and
//! [`MasterLink::wait_response_done`] so the touch scan can sample the next
//! column while the previous one is still on the wire.
//!
//! Frames use the XOR-trailed [`WireProfile::Spi`] framing; the SPI block
//! also appends and checks its own hardware CRC, which [`SpiBus`] reports.

#![cfg_attr(not(test), no_std)]

use drv_keyborg_msg::{FrameError, Packet};
use drv_keyborg_sync::{Barrier, SyncError, SyncPhase};
use serde::Deserialize;

mod master;
mod slave;

#[cfg(test)]
mod fake;

pub use drv_keyborg_msg::WireProfile;
pub use master::{HelloReport, SpiMaster};
pub use slave::SpiSlave;

/// Byte clocked out while we only care about what comes back.
pub const DUMMY: u8 = 0xda;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpiError {
    /// Packet does not fit; rejected before any I/O.
    Overflow,
    /// The peer never raised or dropped its ready line, or a DMA transfer
    /// did not finish.
    Timeout,
    /// The SPI block flagged a hardware CRC mismatch.
    Crc,
    /// The packet's own trailer did not match.
    Checksum,
    /// The length byte is not one we can receive.
    Length,
    /// The slave answered with a non-zero status.
    SlaveError(u8),
    /// A sync round failed.
    Sync(SyncPhase),
    /// A GPIO operation failed.
    Pin,
    /// `wait_response_done` without a matching `wait_response_async`.
    NotStarted,
}

impl SpiError {
    /// Whether repeating the whole request/response pair might succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SpiError::Overflow | SpiError::Pin | SpiError::NotStarted
        )
    }
}

impl From<FrameError> for SpiError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Overflow => SpiError::Overflow,
            FrameError::Length => SpiError::Length,
            FrameError::Checksum => SpiError::Checksum,
        }
    }
}

impl From<SyncError> for SpiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Timeout { phase } => SpiError::Sync(phase),
            SyncError::Pin => SpiError::Pin,
        }
    }
}

impl From<BusError> for SpiError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Timeout => SpiError::Timeout,
            BusError::Crc => SpiError::Crc,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    Timeout,
    Crc,
}

/// The SPI block and its DMA channels.
///
/// The same interface serves both roles: on the master an exchange clocks
/// a byte, on the slave it loads a byte and waits for the master to clock
/// it out.
pub trait SpiBus {
    /// Swaps one byte with the peer.
    fn exchange(&mut self, byte: u8) -> Result<u8, BusError>;

    /// Starts transmitting `bytes`, followed by the hardware CRC.
    fn start_write(&mut self, bytes: &[u8]);

    /// Starts receiving `len` bytes, followed by the hardware CRC.
    fn start_read(&mut self, len: usize);

    /// Whether the transfer started last has finished.
    fn is_done(&self) -> bool;

    /// Copies out a finished receive. Fails with [`BusError::Crc`] if the
    /// hardware CRC did not match.
    fn take_read(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Shuts down DMA and clears any transfer state.
    fn stop(&mut self);
}

/// Master side of the link, as the touch scan sees it.
pub trait MasterLink: Barrier {
    fn send_command(&mut self, cmd: &Packet) -> Result<(), SpiError>;
    fn wait_response_async(&mut self) -> Result<(), SpiError>;
    fn wait_response_done(&mut self) -> Result<Packet, SpiError>;
}

/// Slave side of the link.
pub trait SlaveLink: Barrier {
    fn wait_command(&mut self, timeout_ms: u32) -> Result<Packet, SpiError>;
    fn send_response_async(&mut self, resp: &Packet) -> Result<(), SpiError>;
    fn send_response_flush(&mut self) -> Result<(), SpiError>;

    fn send_response(&mut self, resp: &Packet) -> Result<(), SpiError> {
        self.send_response_async(resp)?;
        self.send_response_flush()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    /// Master: how long the slave may hold ready before a command.
    pub ready_timeout_ms: u32,
    /// Master: bound on the sync and ready wait before a response.
    pub response_timeout_ms: u32,
    /// Slave: bound on the sync before a response.
    pub slave_response_timeout_ms: u32,
    /// Sync rounds inside a transfer, once both sides are engaged.
    pub short_timeout_ms: u32,
    /// Slave: how long the master may take to clock a response out.
    pub flush_timeout_ms: u32,
    /// Any single DMA transfer.
    pub dma_timeout_ms: u32,
    /// Attempts per request/response pair in the hello test.
    pub hello_retries: u16,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 10,
            response_timeout_ms: 40,
            slave_response_timeout_ms: 100,
            short_timeout_ms: 5,
            flush_timeout_ms: 20,
            dma_timeout_ms: 10,
            hello_retries: 3,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SpiStats {
    // Commands sent successfully
    pub commands: u32,
    // Responses received (master) or sent (slave) successfully
    pub responses: u32,
    // Transfers that timed out, including sync rounds
    pub timeouts: u32,
    // Hardware CRC mismatches
    pub crc_errors: u32,
    // Packet trailer or length mismatches
    pub invalid: u32,
    // Responses carrying a non-zero status
    pub slave_errors: u32,
    // Packets refused for size
    pub overflows: u32,
    // Request/response pairs repeated after a failure
    pub retries: u32,
}

impl SpiStats {
    fn record(&mut self, err: SpiError) {
        let counter = match err {
            SpiError::Timeout | SpiError::Sync(_) => &mut self.timeouts,
            SpiError::Crc => &mut self.crc_errors,
            SpiError::Checksum | SpiError::Length => &mut self.invalid,
            SpiError::SlaveError(_) => &mut self.slave_errors,
            SpiError::Overflow => &mut self.overflows,
            SpiError::Pin | SpiError::NotStarted => return,
        };
        *counter = counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_conversions() {
        assert_eq!(SpiError::from(FrameError::Checksum), SpiError::Checksum);
        assert_eq!(
            SpiError::from(SyncError::Timeout {
                phase: SyncPhase::PeerDeassert
            }),
            SpiError::Sync(SyncPhase::PeerDeassert)
        );
        assert_eq!(SpiError::from(BusError::Crc), SpiError::Crc);
    }

    #[test]
    fn recoverability() {
        assert!(SpiError::Timeout.is_recoverable());
        assert!(SpiError::Crc.is_recoverable());
        assert!(SpiError::SlaveError(1).is_recoverable());
        assert!(!SpiError::Overflow.is_recoverable());
        assert!(!SpiError::NotStarted.is_recoverable());
    }

    #[test]
    fn stats_bucket_errors() {
        let mut stats = SpiStats::default();
        stats.record(SpiError::Sync(SyncPhase::PeerAssert));
        stats.record(SpiError::Timeout);
        stats.record(SpiError::Length);
        stats.record(SpiError::Pin);
        assert_eq!(stats.timeouts, 2);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.crc_errors, 0);
    }

    #[test]
    fn config_from_toml() {
        let cfg: SpiConfig =
            toml::from_str("dma_timeout_ms = 3\nhello_retries = 5").unwrap();
        assert_eq!(cfg.dma_timeout_ms, 3);
        assert_eq!(cfg.hello_retries, 5);
        assert_eq!(cfg.response_timeout_ms, 40);
    }
}
