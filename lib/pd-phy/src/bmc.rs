// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmit side: 4b5b symbols to biphase-mark cells.

use static_assertions::const_assert;

use crate::{kcode, message_crc, MAX_DATA_OBJECTS, RAW_CELLS, RAW_WORDS};

/// 64 preamble bits alternating 0/1, as cells. Starts with 0, ends with 1.
const PREAMBLE: u32 = 0xb4b4b4b4;
const PREAMBLE_WORDS: usize = 4;

/// Cells per 5-bit symbol.
const SYMBOL_CELLS: usize = 10;

const EDGE_CELLS: usize = 3;

// preamble + SOP + header + data + CRC + EOP + trailing edge
const MAX_MESSAGE_CELLS: usize = PREAMBLE_WORDS * 32
    + 4 * SYMBOL_CELLS
    + 4 * SYMBOL_CELLS
    + MAX_DATA_OBJECTS * 8 * SYMBOL_CELLS
    + 8 * SYMBOL_CELLS
    + SYMBOL_CELLS
    + EDGE_CELLS;
const_assert!(MAX_MESSAGE_CELLS <= RAW_CELLS);

/// 4b5b data symbols, indexed by nibble.
pub(crate) const ENC_4B5B: [u8; 16] = [
    0x1e, 0x09, 0x14, 0x15, 0x0a, 0x0b, 0x0e, 0x0f, //
    0x12, 0x13, 0x16, 0x17, 0x1a, 0x1b, 0x1c, 0x1d,
];

/// Biphase-mark cells for a 5-bit symbol, assuming the line was high
/// before it. A 1 toggles mid-bit; every bit toggles at its start.
const fn bmc(sym: u8) -> u32 {
    let mut out = 0u32;
    let mut level = 1u32;
    let mut i = 0;
    while i < 5 {
        // leading edge
        level ^= 1;
        let first = level;
        if (sym >> i) & 1 != 0 {
            level ^= 1;
        }
        out |= (first << (2 * i)) | (level << (2 * i + 1));
        i += 1;
    }
    // Normalize to "line was low before it"; write_sym inverts as needed.
    out ^ 0x3ff
}

/// A run of line levels, least significant cell first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitBuffer {
    words: [u32; RAW_WORDS],
    len: usize,
}

impl Default for BitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl BitBuffer {
    pub const fn new() -> Self {
        Self {
            words: [0; RAW_WORDS],
            len: 0,
        }
    }

    /// Wraps `len` cells held in `words`. Anything past the buffer's
    /// capacity, or past the end of `words`, is dropped.
    pub fn from_words(words: &[u32], len: usize) -> Self {
        let mut buf = Self::new();
        let n = words.len().min(RAW_WORDS);
        buf.words[..n].copy_from_slice(&words[..n]);
        buf.len = len.min(n * 32);
        // Keep cells past the end clear so equality ignores them.
        if buf.len % 32 != 0 {
            buf.words[buf.len / 32] &= (1 << (buf.len % 32)) - 1;
        }
        let used = buf.len.div_ceil(32);
        buf.words[used..].fill(0);
        buf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Words covering every cell in the buffer.
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len.div_ceil(32)]
    }

    pub fn cell(&self, i: usize) -> bool {
        i < self.len && (self.words[i / 32] >> (i % 32)) & 1 != 0
    }

    /// Appends the low `n` cells of `val`. Returns false, appending nothing,
    /// if they do not fit.
    pub fn push_cells(&mut self, val: u32, n: usize) -> bool {
        if n > 32 || self.len + n > RAW_CELLS {
            return false;
        }
        for i in 0..n {
            if (val >> i) & 1 != 0 {
                let at = self.len + i;
                self.words[at / 32] |= 1 << (at % 32);
            }
        }
        self.len += n;
        true
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncodeError {
    /// More than seven data objects.
    TooManyObjects,
}

struct Encoder {
    buf: BitBuffer,
    /// All ones when the line is high after the last written cell.
    toggle: u32,
}

impl Encoder {
    fn with_preamble() -> Self {
        let mut buf = BitBuffer::new();
        for _ in 0..PREAMBLE_WORDS {
            buf.push_cells(PREAMBLE, 32);
        }
        Self {
            buf,
            toggle: 0x3ff,
        }
    }

    fn symbol(&mut self, sym: u8) {
        let val = self.toggle ^ bmc(sym);
        self.toggle = if val & 0x200 != 0 { 0x3ff } else { 0 };
        self.buf.push_cells(val, SYMBOL_CELLS);
    }

    fn short(&mut self, val: u16) {
        for shift in [0, 4, 8, 12] {
            self.symbol(ENC_4B5B[usize::from((val >> shift) & 0xf)]);
        }
    }

    fn word(&mut self, val: u32) {
        self.short(val as u16);
        self.short((val >> 16) as u16);
    }

    /// Final transition so the receiver sees the end of the EOP symbol.
    fn finish(mut self) -> BitBuffer {
        if self.toggle == 0 {
            self.buf.push_cells(0b011, EDGE_CELLS);
        } else {
            self.buf.push_cells(0, EDGE_CELLS);
        }
        self.buf
    }
}

/// Encodes an SOP message with its CRC.
pub fn encode_message(
    header: u16,
    payload: &[u32],
) -> Result<BitBuffer, EncodeError> {
    if payload.len() > MAX_DATA_OBJECTS {
        return Err(EncodeError::TooManyObjects);
    }

    let mut enc = Encoder::with_preamble();
    for k in [kcode::SYNC1, kcode::SYNC1, kcode::SYNC1, kcode::SYNC2] {
        enc.symbol(k);
    }
    enc.short(header);
    for &word in payload {
        enc.word(word);
    }
    enc.word(message_crc(header, payload));
    enc.symbol(kcode::EOP);
    Ok(enc.finish())
}

/// Encodes the hard reset ordered set.
pub fn encode_hard_reset() -> BitBuffer {
    let mut enc = Encoder::with_preamble();
    for k in [kcode::RST1, kcode::RST1, kcode::RST1, kcode::RST2] {
        enc.symbol(k);
    }
    enc.finish()
}
