// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Touch matrix scanning split across two chips.
//!
//! Each chip drives half of the columns and senses half of the rows. A full
//! frame is scanned in `2 * COLS` steps: in the first `COLS` steps the
//! master drives a column, in the rest the slave does, and in every step
//! both chips sample their rows at the same time. The slave relays its
//! samples over SPI so the master can assemble complete columns and hand
//! them to a [`FrameEncoder`].
//!
//! Both chips run the same loop, separated by sync rounds:
//!
//! ```text
//! enable column (if ours)
//! sync
//! sample rows into buf[col & 1]
//! sync
//! master: finish previous response, emit previous column, start next one
//! slave:  flush previous response, queue this one
//! disable column
//! ```
//!
//! so the master is always sampling column `n` while column `n - 1` is still
//! in flight.

#![cfg_attr(not(test), no_std)]

use drv_keyborg_spi::SpiError;
use drv_keyborg_sync::SyncError;
use serde::Deserialize;
use static_assertions::const_assert;

mod frame;
mod scan;
mod service;

#[cfg(test)]
mod fake;
#[cfg(test)]
mod pair;

pub use frame::{Column, FrameBuffer, FrameEncoder, FrameState};
pub use scan::{AdcRows, ColumnDriver, RowAdc, RowSampler, TouchScanner};
pub use service::{Served, SlaveService};

/// Rows sensed by each chip.
pub const ROW_COUNT: usize = 41;
/// Columns driven by each chip.
pub const COL_COUNT: usize = 30;

// A half column has to fit in one response packet.
const_assert!(ROW_COUNT <= drv_keyborg_msg::MAX_DATA_SIZE);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bound on the sync rounds around each sample.
    pub sync_timeout_ms: u32,
    /// Settling time between selecting a row and converting it.
    pub settle_us: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 20,
            settle_us: 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cause {
    Sync(SyncError),
    Transport(SpiError),
    /// The peer answered with a non-zero status.
    Protocol(u8),
}

/// A scan that stopped early. The partial frame has been discarded.
///
/// Failures outside a scan, such as answering a HELLO, report column 0.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanError {
    /// Step of the scan loop that failed.
    pub column: usize,
    pub cause: Cause,
}

impl ScanError {
    fn at(column: usize) -> impl FnOnce(Cause) -> Self {
        move |cause| Self { column, cause }
    }
}

impl From<SyncError> for Cause {
    fn from(e: SyncError) -> Self {
        Cause::Sync(e)
    }
}

impl From<SpiError> for Cause {
    fn from(e: SpiError) -> Self {
        match e {
            // The transport reports its own sync rounds as link errors.
            SpiError::Sync(phase) => Cause::Sync(SyncError::Timeout { phase }),
            SpiError::SlaveError(status) => Cause::Protocol(status),
            e => Cause::Transport(e),
        }
    }
}
