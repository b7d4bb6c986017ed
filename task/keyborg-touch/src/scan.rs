// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_keyborg_msg::{Command, Packet, STATUS_OK};
use drv_keyborg_spi::{MasterLink, SlaveLink, SpiError};
use ringbuf::*;
use ticks::Clock;

use crate::{Cause, Column, FrameEncoder, ScanConfig, ScanError};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Start { master: bool },
    Complete { scans: u32 },
    Abort { column: u16, cause: Cause },
}
ringbuf!(Trace, 16, Trace::None);

/// Drives one of this chip's columns.
pub trait ColumnDriver {
    fn enable(&mut self, col: usize);
    fn disable(&mut self, col: usize);
}

/// One ADC channel per row, behind a multiplexer.
pub trait RowAdc {
    fn select_row(&mut self, row: usize);
    fn convert(&mut self) -> u8;
}

/// Reads every row this chip senses while a column is driven.
pub trait RowSampler<const ROWS: usize> {
    fn sample(&mut self, rows: &mut [u8; ROWS]);
}

/// Samples rows one after another through a [`RowAdc`], letting each
/// selection settle before converting.
pub struct AdcRows<A, C> {
    adc: A,
    clock: C,
    settle_us: u32,
}

impl<A: RowAdc, C: Clock> AdcRows<A, C> {
    pub fn new(adc: A, clock: C, config: &ScanConfig) -> Self {
        Self {
            adc,
            clock,
            settle_us: config.settle_us,
        }
    }

    pub fn adc(&self) -> &A {
        &self.adc
    }
}

impl<A, C, const ROWS: usize> RowSampler<ROWS> for AdcRows<A, C>
where
    A: RowAdc,
    C: Clock,
{
    fn sample(&mut self, rows: &mut [u8; ROWS]) {
        for (row, out) in rows.iter_mut().enumerate() {
            self.adc.select_row(row);
            ticks::busy_wait_us(&self.clock, u64::from(self.settle_us));
            *out = self.adc.convert();
        }
    }
}

/// Runs one chip's half of the lockstep matrix scan.
///
/// `buf` is double buffered: step `n` samples into `buf[n & 1]` while the
/// column sampled at step `n - 1` is still being relayed.
pub struct TouchScanner<D, S, const ROWS: usize, const COLS: usize> {
    driver: D,
    sampler: S,
    config: ScanConfig,
    buf: [Column<ROWS>; 2],
    scans: u32,
}

impl<D, S, const ROWS: usize, const COLS: usize>
    TouchScanner<D, S, ROWS, COLS>
where
    D: ColumnDriver,
    S: RowSampler<ROWS>,
{
    pub fn new(driver: D, sampler: S, config: ScanConfig) -> Self {
        Self {
            driver,
            sampler,
            config,
            buf: [Column::ZERO; 2],
            scans: 0,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans that ran to completion on this chip.
    pub fn scans(&self) -> u32 {
        self.scans
    }

    /// Scans the whole matrix from the master and hands every merged
    /// column to `enc`.
    ///
    /// On failure `enc` is aborted, so a partial frame is never reported.
    pub fn scan_full_matrix<L, E>(
        &mut self,
        link: &mut L,
        enc: &mut E,
    ) -> Result<(), ScanError>
    where
        L: MasterLink,
        E: FrameEncoder<ROWS>,
    {
        ringbuf_entry!(Trace::Start { master: true });
        enc.begin();
        let r = self.master_frame(link, enc);
        match r {
            Ok(()) => enc.done(),
            Err(_) => enc.abort(),
        }
        self.finish(r)
    }

    /// The slave's side of [`TouchScanner::scan_full_matrix`], entered
    /// once the FULL_SCAN command has been received.
    pub fn scan_slave<L: SlaveLink>(
        &mut self,
        link: &mut L,
    ) -> Result<(), ScanError> {
        ringbuf_entry!(Trace::Start { master: false });
        let r = self.slave_frame(link);
        self.finish(r)
    }

    fn finish(
        &mut self,
        r: Result<(), ScanError>,
    ) -> Result<(), ScanError> {
        match r {
            Ok(()) => {
                self.scans = self.scans.wrapping_add(1);
                ringbuf_entry!(Trace::Complete { scans: self.scans });
            }
            Err(e) => ringbuf_entry!(Trace::Abort {
                column: e.column as u16,
                cause: e.cause,
            }),
        }
        r
    }

    fn master_frame<L, E>(
        &mut self,
        link: &mut L,
        enc: &mut E,
    ) -> Result<(), ScanError>
    where
        L: MasterLink,
        E: FrameEncoder<ROWS>,
    {
        link.send_command(&Packet::command(Command::FullScan))
            .map_err(|e| ScanError::at(0)(e.into()))?;

        for col in 0..2 * COLS {
            let ours = col < COLS;
            if ours {
                self.driver.enable(col);
            }
            let r = self.master_step(link, enc, col);
            if ours {
                self.driver.disable(col);
            }
            r.map_err(ScanError::at(col))?;
        }

        let last = 2 * COLS;
        self.relay(link, enc, last - 1)
            .map_err(ScanError::at(last))?;
        link.sync(self.config.sync_timeout_ms)
            .map_err(|e| ScanError::at(last)(e.into()))
    }

    fn master_step<L, E>(
        &mut self,
        link: &mut L,
        enc: &mut E,
        col: usize,
    ) -> Result<(), Cause>
    where
        L: MasterLink,
        E: FrameEncoder<ROWS>,
    {
        let timeout = self.config.sync_timeout_ms;
        link.sync(timeout)?;
        self.sampler.sample(&mut self.buf[col & 1].local);
        link.sync(timeout)?;

        if col > 0 {
            self.relay(link, enc, col - 1)?;
        }
        link.wait_response_async()?;
        Ok(())
    }

    /// Collects the slave's half of `col` and emits the merged column.
    fn relay<L, E>(
        &mut self,
        link: &mut L,
        enc: &mut E,
        col: usize,
    ) -> Result<(), Cause>
    where
        L: MasterLink,
        E: FrameEncoder<ROWS>,
    {
        let resp = link.wait_response_done()?;
        let column = &mut self.buf[col & 1];
        column.relay(&resp.data);
        enc.add_column(col, column);
        Ok(())
    }

    fn slave_frame<L: SlaveLink>(
        &mut self,
        link: &mut L,
    ) -> Result<(), ScanError> {
        for col in 0..2 * COLS {
            let ours = col >= COLS;
            if ours {
                self.driver.enable(col - COLS);
            }
            let r = self.slave_step(link, col);
            if ours {
                self.driver.disable(col - COLS);
            }
            r.map_err(ScanError::at(col))?;
        }

        let last = 2 * COLS;
        link.send_response_flush()
            .map_err(|e| ScanError::at(last)(e.into()))?;
        link.sync(self.config.sync_timeout_ms)
            .map_err(|e| ScanError::at(last)(e.into()))
    }

    fn slave_step<L: SlaveLink>(
        &mut self,
        link: &mut L,
        col: usize,
    ) -> Result<(), Cause> {
        let timeout = self.config.sync_timeout_ms;
        link.sync(timeout)?;
        let rows = &mut self.buf[col & 1].local;
        self.sampler.sample(rows);
        link.sync(timeout)?;

        // The master only takes the previous column once both sides are
        // past the second sync.
        if col > 0 {
            link.send_response_flush()?;
        }
        let resp = Packet::new(STATUS_OK, &self.buf[col & 1].local)
            .map_err(SpiError::from)?;
        link.send_response_async(&resp)?;
        Ok(())
    }
}
