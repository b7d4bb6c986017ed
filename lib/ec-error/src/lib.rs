// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Numeric error codes shared with EC-style consoles and host tools.
//!
//! Consoles return `0` on success and the negated code on failure; see
//! [`EcError::rc`].

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;
pub use num_traits::FromPrimitive;

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum EcError {
    Success = 0,
    Unknown = 1,
    Unimplemented = 2,
    /// Request or response does not fit its buffer
    Overflow = 3,
    Timeout = 4,
    /// Invalid argument
    Inval = 5,
    Busy = 6,
    AccessDenied = 7,
    NotPowered = 8,
    NotCalibrated = 9,
    /// Integrity check failed
    Crc = 10,

    /// Problem with the first console argument; the next eight codes name
    /// arguments two through nine.
    Param1 = 11,
    Param2 = 12,
    Param3 = 13,
    Param4 = 14,
    Param5 = 15,
    Param6 = 16,
    Param7 = 17,
    Param8 = 18,
    Param9 = 19,

    /// Wrong number of arguments
    ParamCount = 20,
}

impl EcError {
    /// Returns the error naming a bad argument at 1-based position `n`.
    ///
    /// Positions past nine have no code of their own and collapse to
    /// [`EcError::Inval`].
    pub fn param(n: usize) -> Self {
        match n {
            1..=9 => Self::from_u32(Self::Param1 as u32 + n as u32 - 1)
                .unwrap_or(Self::Inval),
            _ => Self::Inval,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Console return code: zero on success, negated code otherwise.
    pub fn rc(self) -> i32 {
        -(self as i32)
    }
}

impl From<EcError> for u32 {
    fn from(rc: EcError) -> Self {
        rc as u32
    }
}

/// Folds a console result into its return code.
pub fn rc(result: Result<(), EcError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.rc(),
    }
}
