// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Receive side: biphase-mark cells back to messages.

use heapless::Vec;

use crate::bmc::{BitBuffer, ENC_4B5B};
use crate::{header_count, kcode, message_crc, MAX_DATA_OBJECTS};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decoded {
    Message {
        header: u16,
        payload: Vec<u32, MAX_DATA_OBJECTS>,
    },
    HardReset,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// No SOP or hard reset ordered set anywhere in the capture.
    NoSync,
    /// A 5-bit group that is not a data symbol where data was expected.
    BadSymbol,
    /// The capture ends before the message does.
    Truncated,
    Crc,
    /// Something other than EOP after the CRC.
    NoEop,
}

/// Bits recovered from cells, starting at a fixed cell phase.
struct Bits<'a> {
    raw: &'a BitBuffer,
    phase: usize,
}

impl Bits<'_> {
    fn len(&self) -> usize {
        self.raw.len().saturating_sub(self.phase) / 2
    }

    /// A bit is a one when the line toggles in its middle.
    fn bit(&self, i: usize) -> bool {
        let at = self.phase + 2 * i;
        self.raw.cell(at) != self.raw.cell(at + 1)
    }

    fn symbol(&self, pos: usize) -> Result<u8, DecodeError> {
        if pos + 5 > self.len() {
            return Err(DecodeError::Truncated);
        }
        Ok((0..5).fold(0, |acc, i| acc | (u8::from(self.bit(pos + i)) << i)))
    }

    fn ordered_set(&self, pos: usize) -> Result<[u8; 4], DecodeError> {
        Ok([
            self.symbol(pos)?,
            self.symbol(pos + 5)?,
            self.symbol(pos + 10)?,
            self.symbol(pos + 15)?,
        ])
    }

    fn short(&self, pos: usize) -> Result<u16, DecodeError> {
        let mut val = 0u16;
        for i in 0..4 {
            let nibble = data_nibble(self.symbol(pos + 5 * i)?)
                .ok_or(DecodeError::BadSymbol)?;
            val |= u16::from(nibble) << (4 * i);
        }
        Ok(val)
    }

    fn word(&self, pos: usize) -> Result<u32, DecodeError> {
        let lo = self.short(pos)?;
        let hi = self.short(pos + 20)?;
        Ok(u32::from(lo) | (u32::from(hi) << 16))
    }
}

fn data_nibble(sym: u8) -> Option<u8> {
    ENC_4B5B.iter().position(|&s| s == sym).map(|n| n as u8)
}

const SOP: [u8; 4] = [kcode::SYNC1, kcode::SYNC1, kcode::SYNC1, kcode::SYNC2];
const HARD_RESET: [u8; 4] =
    [kcode::RST1, kcode::RST1, kcode::RST1, kcode::RST2];

/// Decodes the first message or hard reset found in `raw`.
///
/// The capture need not start on a bit boundary; both cell phases are
/// tried.
pub fn decode(raw: &BitBuffer) -> Result<Decoded, DecodeError> {
    match decode_phase(raw, 0) {
        Err(DecodeError::NoSync) => decode_phase(raw, 1),
        r => r,
    }
}

fn decode_phase(raw: &BitBuffer, phase: usize) -> Result<Decoded, DecodeError> {
    let bits = Bits { raw, phase };

    // The preamble alternates 0/1, which only ever reads as data symbols,
    // so the first ordered set we can match is the real one.
    let mut start = None;
    for pos in 0..bits.len().saturating_sub(19) {
        match bits.ordered_set(pos)? {
            set if set == HARD_RESET => return Ok(Decoded::HardReset),
            set if set == SOP => {
                start = Some(pos + 20);
                break;
            }
            _ => (),
        }
    }
    let mut pos = start.ok_or(DecodeError::NoSync)?;

    let header = bits.short(pos)?;
    pos += 20;

    let mut payload = Vec::new();
    for _ in 0..header_count(header) {
        // header_count is at most seven, which is the capacity.
        let _ = payload.push(bits.word(pos)?);
        pos += 40;
    }

    let crc = bits.word(pos)?;
    pos += 40;
    if crc != message_crc(header, &payload) {
        return Err(DecodeError::Crc);
    }

    if bits.symbol(pos)? != kcode::EOP {
        return Err(DecodeError::NoEop);
    }

    Ok(Decoded::Message { header, payload })
}
