// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_keyborg_msg::{Command, FromPrimitive, Packet, STATUS_OK};
use drv_keyborg_spi::{SlaveLink, SpiError};
use ec_error::EcError;
use ringbuf::*;

use crate::{ColumnDriver, RowSampler, ScanError, TouchScanner};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Unknown(u8),
}
ringbuf!(Trace, 8, Trace::None);

/// What one pass of [`SlaveService::serve_one`] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Served {
    /// The master did not call.
    Idle,
    Hello,
    Scan,
    /// Answered with `EcError::Unimplemented`.
    Unknown(u8),
}

/// The slave chip's main loop body: take one command and carry it out.
pub struct SlaveService<L, D, S, const ROWS: usize, const COLS: usize> {
    link: L,
    scanner: TouchScanner<D, S, ROWS, COLS>,
}

impl<L, D, S, const ROWS: usize, const COLS: usize>
    SlaveService<L, D, S, ROWS, COLS>
where
    L: SlaveLink,
    D: ColumnDriver,
    S: RowSampler<ROWS>,
{
    pub fn new(link: L, scanner: TouchScanner<D, S, ROWS, COLS>) -> Self {
        Self { link, scanner }
    }

    pub fn scanner(&self) -> &TouchScanner<D, S, ROWS, COLS> {
        &self.scanner
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn serve_one(&mut self, timeout_ms: u32) -> Result<Served, ScanError> {
        let cmd = match self.link.wait_command(timeout_ms) {
            Ok(cmd) => cmd,
            Err(SpiError::Timeout) => return Ok(Served::Idle),
            Err(e) => return Err(ScanError::at(0)(e.into())),
        };

        match Command::from_u8(cmd.cmd_status) {
            Some(Command::Hello) => {
                self.respond(STATUS_OK)?;
                Ok(Served::Hello)
            }
            Some(Command::FullScan) => {
                self.scanner.scan_slave(&mut self.link)?;
                Ok(Served::Scan)
            }
            None => {
                ringbuf_entry!(Trace::Unknown(cmd.cmd_status));
                self.respond(EcError::Unimplemented.code() as u8)?;
                Ok(Served::Unknown(cmd.cmd_status))
            }
        }
    }

    fn respond(&mut self, status: u8) -> Result<(), ScanError> {
        let resp = Packet {
            cmd_status: status,
            ..Packet::default()
        };
        self.link
            .send_response(&resp)
            .map_err(|e| ScanError::at(0)(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::*;
    use crate::{Cause, ScanConfig};

    type Service = SlaveService<FakeSlave, FakeDriver, FakeSampler, 2, 1>;

    fn service(log: &Log, cmds: &[Result<Packet, SpiError>]) -> Service {
        let mut link = FakeSlave::new(log.clone());
        link.commands.extend(cmds.iter().cloned());
        let scanner = TouchScanner::new(
            FakeDriver(log.clone()),
            FakeSampler::new(log.clone()),
            ScanConfig::default(),
        );
        SlaveService::new(link, scanner)
    }

    fn raw(cmd: u8) -> Packet {
        Packet {
            cmd_status: cmd,
            ..Packet::default()
        }
    }

    #[test]
    fn quiet_link_is_idle() {
        let log = log();
        let mut svc = service(&log, &[]);
        assert_eq!(svc.serve_one(10), Ok(Served::Idle));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn hello_gets_empty_ok() {
        let log = log();
        let mut svc = service(&log, &[Ok(Packet::command(Command::Hello))]);
        assert_eq!(svc.serve_one(10), Ok(Served::Hello));
        assert_eq!(
            *log.borrow(),
            [Ev::Respond(STATUS_OK, vec![]), Ev::Flush]
        );
    }

    #[test]
    fn full_scan_runs_slave_loop() {
        let log = log();
        let mut svc =
            service(&log, &[Ok(Packet::command(Command::FullScan))]);
        assert_eq!(svc.serve_one(10), Ok(Served::Scan));
        assert_eq!(svc.scanner().scans(), 1);
        assert_eq!(log.borrow().last(), Some(&Ev::Sync));
    }

    #[test]
    fn unknown_command_is_refused() {
        let log = log();
        let mut svc = service(&log, &[Ok(raw(0x7f))]);
        assert_eq!(svc.serve_one(10), Ok(Served::Unknown(0x7f)));
        let status = EcError::Unimplemented.code() as u8;
        assert_eq!(*log.borrow(), [Ev::Respond(status, vec![]), Ev::Flush]);
    }

    #[test]
    fn broken_command_is_an_error() {
        let log = log();
        let mut svc = service(&log, &[Err(SpiError::Crc), Ok(raw(0))]);
        assert_eq!(
            svc.serve_one(10),
            Err(ScanError {
                column: 0,
                cause: Cause::Transport(SpiError::Crc)
            })
        );
        // The next command is still served.
        assert_eq!(svc.serve_one(10), Ok(Served::Hello));
    }
}
