// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB Power Delivery physical layer.
//!
//! PD messages travel on the CC line as 4b5b symbols in biphase mark code
//! (BMC). The transmitter here does not drive the line itself: it produces
//! a [`BitBuffer`] of line levels ("cells", two per bit at 600 kHz for the
//! 300 kbps PD rate) which a DMA-fed timer or SPI shifter plays back. The
//! decoder takes the same representation captured from the receiver.
//!
//! Cells are packed least-significant-bit first into 32-bit words.

#![cfg_attr(not(test), no_std)]

mod bmc;
mod decode;

pub use bmc::{encode_hard_reset, encode_message, BitBuffer, EncodeError};
pub use decode::{decode, Decoded, DecodeError};

/// Raw buffer size in 32-bit words.
pub const RAW_WORDS: usize = 32;
/// Raw buffer size in cells.
pub const RAW_CELLS: usize = RAW_WORDS * 32;

/// Most data objects a single message can carry.
pub const MAX_DATA_OBJECTS: usize = 7;

/// Bit rate on the wire; cells go out at twice this.
pub const BIT_RATE_HZ: u32 = 300_000;
pub const CELL_RATE_HZ: u32 = 2 * BIT_RATE_HZ;

/// Sink detection threshold on CC.
pub const SNK_VA_MV: u32 = 250;
/// Source default-current Rd detection threshold.
pub const SRC_DEF_RD_THRESH_MV: u32 = 200;
/// Source default-current open-circuit threshold.
pub const SRC_DEF_VNC_MV: u32 = 1600;

/// 5-bit K-codes, sent least-significant bit first.
pub mod kcode {
    pub const SYNC1: u8 = 0x18;
    pub const SYNC2: u8 = 0x11;
    pub const SYNC3: u8 = 0x06;
    pub const RST1: u8 = 0x07;
    pub const RST2: u8 = 0x19;
    pub const EOP: u8 = 0x0D;
}

/// Builds a message header.
pub const fn header(
    msg_type: u16,
    power_role: u16,
    data_role: u16,
    id: u16,
    count: u16,
    rev: u16,
    ext: u16,
) -> u16 {
    (msg_type & 0x1f)
        | ((rev & 3) << 6)
        | ((data_role & 1) << 5)
        | ((power_role & 1) << 8)
        | ((id & 7) << 9)
        | ((count & 7) << 12)
        | ((ext & 1) << 15)
}

pub const fn header_type(h: u16) -> u8 {
    (h & 0x1f) as u8
}

pub const fn header_count(h: u16) -> usize {
    ((h >> 12) & 7) as usize
}

/// Control message types used by the injector tools.
pub mod ctrl {
    pub const GOOD_CRC: u8 = 1;
    pub const ACCEPT: u8 = 3;
    pub const REJECT: u8 = 4;
    pub const PS_RDY: u8 = 6;
    pub const SOFT_RESET: u8 = 13;
}

pub(crate) static CRC32: crc::Crc<u32> =
    crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// CRC over a header and its data objects as they appear on the wire.
pub fn message_crc(header: u16, payload: &[u32]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&header.to_le_bytes());
    for word in payload {
        digest.update(&word.to_le_bytes());
    }
    digest.finalize()
}
