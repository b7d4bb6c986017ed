// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB-PD message injector.
//!
//! A small interpreter over a 128-word program buffer that drives the CC
//! lines of a sniffer board: it can send well formed or hand built PD
//! traffic, flip terminations, and wait for the port partner's reaction.
//! Programs are written into the buffer over the console (`bufwr`) and
//! started with `fsm <index>`.
//!
//! Everything that touches hardware goes through [`PdFrontEnd`], and the
//! watchdog through [`Keepalive`], so programs run unchanged against the
//! fakes in the tests.

#![cfg_attr(not(test), no_std)]

use derive_more::From;
use enum_map::Enum;
use num_derive::FromPrimitive;
use pd_phy::{BitBuffer, EncodeError};
use serde::Deserialize;

pub mod console;
mod fsm;
pub mod isa;

#[cfg(test)]
mod fake;

pub use fsm::Injector;
pub use isa::{Instruction, Opcode, PROGRAM_WORDS};

/// Full scale of the RX comparator DAC.
pub const DAC_MAX: u16 = 0xfff;
/// DAC reference voltage.
pub const DAC_VREF_MV: u32 = 3300;

/// DAC code for a comparator threshold of `mv`.
pub fn dac_code(mv: u32) -> u16 {
    (mv.saturating_mul(u32::from(DAC_MAX)) / DAC_VREF_MV)
        .min(u32::from(DAC_MAX)) as u16
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
pub enum Cc {
    Cc1,
    Cc2,
}

impl Cc {
    pub fn from_index(n: u32) -> Option<Self> {
        match n {
            0 => Some(Cc::Cc1),
            1 => Some(Cc::Cc2),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Termination applied to one CC line.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Resistor {
    #[default]
    None = 0,
    Ra = 1,
    Rd = 2,
    RpUsb = 3,
    Rp1A5 = 4,
    Rp3A0 = 5,
}

impl Resistor {
    pub const ALL: [Resistor; 6] = [
        Resistor::None,
        Resistor::Ra,
        Resistor::Rd,
        Resistor::RpUsb,
        Resistor::Rp1A5,
        Resistor::Rp3A0,
    ];

    /// Console name.
    pub fn name(self) -> &'static str {
        match self {
            Resistor::None => "NONE",
            Resistor::Ra => "RA",
            Resistor::Rd => "RD",
            Resistor::RpUsb => "RPUSB",
            Resistor::Rp1A5 => "RP1A5",
            Resistor::Rp3A0 => "RP3A0",
        }
    }

    /// A source pull-up, in any current advertisement.
    pub fn is_rp(self) -> bool {
        matches!(self, Resistor::RpUsb | Resistor::Rp1A5 | Resistor::Rp3A0)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
    }
}

#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, FromPrimitive, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TraceMode {
    #[default]
    Off = 0,
    /// One entry per executed instruction.
    On = 1,
    /// The raw program word as well.
    Raw = 2,
}

/// What the interpreter does with an instruction it cannot carry out.
///
/// `Lenient` skips such words and carries on, which is what programs
/// written for the console have always relied on. The default is `Strict`
/// so a broken program stops where it broke; select `lenient` in the
/// config to get the skipping behavior.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Stop and report it.
    #[default]
    Strict,
    /// Note it in the trace and move on to the next word.
    Lenient,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    pub tx_clock_hz: u32,
    pub rx_threshold_mv: u32,
    pub mode: Mode,
    /// Stop a program after this many instructions.
    pub step_limit: Option<u32>,
    pub trace: TraceMode,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            tx_clock_hz: pd_phy::CELL_RATE_HZ,
            rx_threshold_mv: 550,
            mode: Mode::Strict,
            step_limit: None,
            trace: TraceMode::Off,
        }
    }
}

/// The transmitter refused a waveform.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxError {
    /// The line was not idle.
    Busy,
    /// The waveform does not fit the transmit buffer.
    TooLong,
}

/// Everything the injector needs from the board.
pub trait PdFrontEnd {
    /// Sends `cells` on `cc` at the current TX clock.
    fn transmit(&mut self, cc: Cc, cells: &BitBuffer) -> Result<(), TxError>;

    /// Returns the next capture from the receiver on `cc`, if one arrived.
    fn receive(&mut self, cc: Cc) -> Option<BitBuffer>;

    /// Running count of edges seen on `cc`, or `None` if this build cannot
    /// count them.
    fn edges(&mut self, cc: Cc) -> Option<u32>;

    fn set_resistor(&mut self, cc: Cc, r: Resistor);
    fn set_recording(&mut self, on: bool);
    fn set_tx_clock(&mut self, hz: u32);
    fn set_rx_dac(&mut self, code: u16);

    fn cc_mv(&mut self, cc: Cc) -> u16;
    /// VBUS as (mV, mA).
    fn vbus(&mut self) -> (u16, u16);
    /// VCONN as (mV, mA).
    fn vconn(&mut self) -> (u16, u16);
}

/// Fed once per executed instruction, and while waiting.
pub trait Keepalive {
    fn kick(&mut self);
}

impl<F: FnMut()> Keepalive for F {
    fn kick(&mut self) {
        self()
    }
}

/// Why an instruction could not be carried out.
#[derive(Copy, Clone, Debug, Eq, PartialEq, From)]
pub enum Fault {
    #[from(ignore)]
    BadOpcode(u8),
    #[from(ignore)]
    BadParam(u8),
    #[from(ignore)]
    BadValue(u16),
    /// A buffer index or length runs off the end of the program.
    #[from(ignore)]
    Range,
    /// WAIT or EXPCT ran out of time.
    #[from(ignore)]
    Timeout,
    /// Auto polarity found neither CC line above the sink threshold.
    #[from(ignore)]
    NoPartner,
    /// The program ran for its configured number of steps.
    #[from(ignore)]
    StepLimit,
    Encode(EncodeError),
    Tx(TxError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InjectorError {
    /// Index of the instruction that failed.
    pub index: usize,
    pub fault: Fault,
}

impl From<Fault> for ec_error::EcError {
    fn from(f: Fault) -> Self {
        use ec_error::EcError;
        match f {
            Fault::BadOpcode(_) => EcError::Unimplemented,
            Fault::BadParam(_) | Fault::BadValue(_) => EcError::Inval,
            Fault::Range => EcError::Overflow,
            Fault::Timeout | Fault::StepLimit => EcError::Timeout,
            Fault::NoPartner => EcError::NotPowered,
            Fault::Encode(_) => EcError::Overflow,
            Fault::Tx(TxError::Busy) => EcError::Busy,
            Fault::Tx(TxError::TooLong) => EcError::Overflow,
        }
    }
}
