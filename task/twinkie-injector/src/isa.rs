// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Program word layout.
//!
//! ```text
//!  31    28 27    24 23          16 15                          0
//! +--------+--------+--------------+-----------------------------+
//! |   op   |  arg2  |     arg1     |            arg0             |
//! +--------+--------+--------------+-----------------------------+
//!          |         arg12         |
//! ```

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Words in the program buffer.
pub const PROGRAM_WORDS: usize = 128;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    End = 0x0,
    Send = 0x1,
    Wave = 0x2,
    Hrst = 0x3,
    Wait = 0x4,
    Get = 0x8,
    Set = 0x9,
    Jump = 0xA,
    Expct = 0xC,
    Nop = 0xF,
}

pub const fn opcode(w: u32) -> u8 {
    (w >> 28) as u8
}

pub const fn arg0(w: u32) -> u16 {
    w as u16
}

pub const fn arg1(w: u32) -> u8 {
    (w >> 16) as u8
}

pub const fn arg2(w: u32) -> u8 {
    ((w >> 24) & 0xf) as u8
}

pub const fn arg12(w: u32) -> u16 {
    ((w >> 16) & 0xfff) as u16
}

const fn word(op: Opcode, arg2: u8, arg1: u8, arg0: u16) -> u32 {
    (op as u32) << 28
        | ((arg2 as u32) & 0xf) << 24
        | (arg1 as u32) << 16
        | arg0 as u32
}

/// Targets of the SET instruction, carried in `arg2`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum SetParam {
    Resistor1 = 0,
    Resistor2 = 1,
    Record = 2,
    /// In kHz.
    TxSpeed = 3,
    /// In mV.
    RxThresh = 4,
    Polarity = 5,
    Trace = 6,
}

/// Sources of the GET instruction, carried in `arg2`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum GetParam {
    /// CC1 mV in the low half, CC2 mV in the high half.
    Cc = 0,
    /// mV in the low half, mA in the high half.
    Vbus = 1,
    Vconn = 2,
    Polarity = 3,
}

/// Value of a SET POLARITY that asks for detection.
pub const POLARITY_AUTO: u16 = 0xffff;

/// One decoded program word.
///
/// SET and GET keep their parameter selectors raw; it is the interpreter's
/// call whether an unknown one is an error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    End,
    Send { header: u16, index: u8, count: u8 },
    Wave { bits: u16, index: u8 },
    HardReset,
    Wait { timeout_ms: u16, edges: u16 },
    Get { index: u16, param: u8 },
    Set { param: u8, value: u16 },
    Jump { target: u16 },
    Expect { timeout_ms: u16, msg_type: u8 },
    Nop,
}

impl Instruction {
    /// Decodes `w`, or hands back its opcode if nothing is assigned to it.
    pub fn decode(w: u32) -> Result<Self, u8> {
        let op = Opcode::from_u8(opcode(w)).ok_or(opcode(w))?;
        Ok(match op {
            Opcode::End => Self::End,
            Opcode::Send => Self::Send {
                header: arg0(w),
                index: arg1(w),
                count: arg2(w),
            },
            Opcode::Wave => Self::Wave {
                bits: arg0(w),
                index: arg1(w),
            },
            Opcode::Hrst => Self::HardReset,
            Opcode::Wait => Self::Wait {
                timeout_ms: arg0(w),
                edges: arg12(w),
            },
            Opcode::Get => Self::Get {
                index: arg0(w),
                param: arg2(w),
            },
            Opcode::Set => Self::Set {
                param: arg2(w),
                value: arg0(w),
            },
            Opcode::Jump => Self::Jump { target: arg0(w) },
            Opcode::Expct => Self::Expect {
                timeout_ms: arg0(w),
                msg_type: arg2(w),
            },
            Opcode::Nop => Self::Nop,
        })
    }

    /// Encodes into a program word. Fields wider than their slot are
    /// truncated.
    pub const fn encode(self) -> u32 {
        match self {
            Self::End => word(Opcode::End, 0, 0, 0),
            Self::Send {
                header,
                index,
                count,
            } => word(Opcode::Send, count, index, header),
            Self::Wave { bits, index } => word(Opcode::Wave, 0, index, bits),
            Self::HardReset => word(Opcode::Hrst, 0, 0, 0),
            Self::Wait { timeout_ms, edges } => {
                word(Opcode::Wait, (edges >> 8) as u8, edges as u8, timeout_ms)
            }
            Self::Get { index, param } => word(Opcode::Get, param, 0, index),
            Self::Set { param, value } => word(Opcode::Set, param, 0, value),
            Self::Jump { target } => word(Opcode::Jump, 0, 0, target),
            Self::Expect {
                timeout_ms,
                msg_type,
            } => word(Opcode::Expct, msg_type, 0, timeout_ms),
            Self::Nop => word(Opcode::Nop, 0, 0, 0),
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            Self::End => Opcode::End,
            Self::Send { .. } => Opcode::Send,
            Self::Wave { .. } => Opcode::Wave,
            Self::HardReset => Opcode::Hrst,
            Self::Wait { .. } => Opcode::Wait,
            Self::Get { .. } => Opcode::Get,
            Self::Set { .. } => Opcode::Set,
            Self::Jump { .. } => Opcode::Jump,
            Self::Expect { .. } => Opcode::Expct,
            Self::Nop => Opcode::Nop,
        }
    }
}
