// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packet framing shared by the two touch controller chips.
//!
//! A packet on the wire is
//!
//! ```text
//! [size][cmd_or_status][data ...][checksum]
//! ```
//!
//! Two framings exist. Between the chips, over SPI, `size` is the number of
//! data bytes and the trailer is the XOR of every preceding byte. The serial
//! "hello" link to the host uses a `size` that also counts the two header
//! bytes, and a trailer chosen so that all bytes of the frame sum to zero.
//! Both are described by [`WireProfile`].

#![cfg_attr(not(test), no_std)]

use heapless::Vec;
use num_derive::FromPrimitive;
use serde::Deserialize;
use static_assertions::const_assert;
use zerocopy::{FromBytes, IntoBytes};

pub use num_traits::FromPrimitive;

pub const MAX_PACKET_SIZE: usize = 64;
pub const HEADER_SIZE: usize = core::mem::size_of::<PacketHeader>();
pub const TRAILER_SIZE: usize = 1;
pub const MAX_DATA_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE - TRAILER_SIZE;

// The serial framing's length byte counts the header too.
const_assert!(MAX_DATA_SIZE + HEADER_SIZE <= u8::MAX as usize);

/// Status byte of a successful response.
pub const STATUS_OK: u8 = 0;

#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::Immutable,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
pub struct PacketHeader {
    pub size: u8,
    pub cmd_status: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Empty request answered with an empty response; used for link tests.
    Hello = 0x00,
    /// Scan the slave's half of the matrix in lockstep with the master.
    FullScan = 0x01,
}

impl From<Command> for u8 {
    fn from(c: Command) -> Self {
        c as u8
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// Payload larger than a packet can carry.
    Overflow,
    /// Fewer bytes than the header promised, or a nonsensical length byte.
    Length,
    Checksum,
}

/// How the trailing byte is derived from the rest of the frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub enum Checksum {
    /// XOR of every byte.
    Xor,
    /// Two's complement of the byte sum, so the whole frame sums to zero.
    AdditiveNegate,
}

impl Checksum {
    pub fn compute(self, bytes: &[u8]) -> u8 {
        match self {
            Checksum::Xor => bytes.iter().fold(0, |acc, b| acc ^ b),
            Checksum::AdditiveNegate => bytes
                .iter()
                .fold(0u8, |acc, &b| acc.wrapping_add(b))
                .wrapping_neg(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub enum WireProfile {
    /// Chip-to-chip: `size` counts data bytes, XOR trailer.
    Spi,
    /// Host serial link: `size` counts data plus header, additive trailer.
    Serial,
}

impl WireProfile {
    pub fn checksum(self) -> Checksum {
        match self {
            WireProfile::Spi => Checksum::Xor,
            WireProfile::Serial => Checksum::AdditiveNegate,
        }
    }

    fn length_byte(self, data_len: usize) -> u8 {
        match self {
            WireProfile::Spi => data_len as u8,
            WireProfile::Serial => (data_len + HEADER_SIZE) as u8,
        }
    }

    /// Data length implied by a length byte, if it is a possible one.
    pub fn data_len(self, size: u8) -> Option<usize> {
        let len = match self {
            WireProfile::Spi => usize::from(size),
            WireProfile::Serial => {
                usize::from(size).checked_sub(HEADER_SIZE)?
            }
        };
        Some(len)
    }
}

/// A parsed request or response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Packet {
    pub cmd_status: u8,
    pub data: Vec<u8, MAX_DATA_SIZE>,
}

impl Packet {
    pub fn new(cmd_status: u8, data: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            cmd_status,
            data: Vec::from_slice(data).map_err(|_| FrameError::Overflow)?,
        })
    }

    pub fn command(cmd: Command) -> Self {
        Self {
            cmd_status: cmd.into(),
            data: Vec::new(),
        }
    }

    /// Number of data bytes, as sent in the SPI length byte.
    pub fn size(&self) -> u8 {
        self.data.len() as u8
    }

    pub fn is_ok(&self) -> bool {
        self.cmd_status == STATUS_OK
    }

    pub fn encode(
        &self,
        profile: WireProfile,
    ) -> Result<Vec<u8, MAX_PACKET_SIZE>, FrameError> {
        build_packet(profile, self.cmd_status, &self.data)
    }
}

/// Frames `payload` behind a header and in front of a checksum.
pub fn build_packet(
    profile: WireProfile,
    cmd_status: u8,
    payload: &[u8],
) -> Result<Vec<u8, MAX_PACKET_SIZE>, FrameError> {
    if payload.len() > MAX_DATA_SIZE {
        return Err(FrameError::Overflow);
    }

    let header = PacketHeader {
        size: profile.length_byte(payload.len()),
        cmd_status,
    };

    // Capacity was checked above, so none of these can fail.
    let mut out = Vec::new();
    out.extend_from_slice(header.as_bytes())
        .map_err(|_| FrameError::Overflow)?;
    out.extend_from_slice(payload)
        .map_err(|_| FrameError::Overflow)?;
    let sum = profile.checksum().compute(&out);
    out.push(sum).map_err(|_| FrameError::Overflow)?;
    Ok(out)
}

/// Validates and unpacks a frame. Bytes past the declared length are
/// ignored.
pub fn parse_packet(
    profile: WireProfile,
    bytes: &[u8],
) -> Result<Packet, FrameError> {
    let (header, rest) =
        PacketHeader::read_from_prefix(bytes).map_err(|_| FrameError::Length)?;
    let len = profile.data_len(header.size).ok_or(FrameError::Length)?;
    if len > MAX_DATA_SIZE || rest.len() < len + TRAILER_SIZE {
        return Err(FrameError::Length);
    }

    let (data, rest) = rest.split_at(len);
    let framed = &bytes[..HEADER_SIZE + len];
    if profile.checksum().compute(framed) != rest[0] {
        return Err(FrameError::Checksum);
    }

    Packet::new(header.cmd_status, data)
}
