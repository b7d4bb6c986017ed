// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing the touch controller and PD injector
//!
//! This contains an implementation for a static ring buffer designed to be used
//! to instrument arbitrary contexts: handshake waits, SPI transactions, scan
//! loops and injector programs. Nothing here allocates or formats text; each
//! entry is a small `Copy` payload tagged with the source line that recorded
//! it, so the buffers can be dumped from a debugger after the fact.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer:
//!
//! ```ignore
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     None,
//!     SyncTimeout(SyncPhase),
//! }
//!
//! ringbuf!(Trace, 32, Trace::None);
//! ```
//!
//! Entries are generated with [`ringbuf_entry!`]:
//!
//! ```ignore
//! ringbuf_entry!(Trace::SyncTimeout(phase));
//! ```
//!
//! A name may be given to distinguish between several buffers in one module:
//!
//! ```ignore
//! ringbuf!(SCAN_RINGBUF, Trace, 16, Trace::None);
//! ringbuf_entry!(SCAN_RINGBUF, Trace::Abort { column });
//! ```
//!
//! ## Inspecting a ring buffer
//!
//! The static is a `critical_section::Mutex<RefCell<Ringbuf<T, N>>>`. From
//! GDB, print the `RefCell`'s `value` field; `last` names the most recently
//! written slot, and entries with a higher `generation` are newer.
//!
//! Enabling the `disabled` feature compiles every buffer out while keeping
//! the payload expressions type-checked.

#![cfg_attr(not(test), no_std)]

/// Re-exported so that code generated by the macros is guaranteed to be able
/// to find it.
pub use critical_section;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The actual type of `NAME` will be
/// `critical_section::Mutex<RefCell<Ringbuf<T, N>>>`.
///
/// If you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::critical_section::Mutex<
            ::core::cell::RefCell<$crate::Ringbuf<$t, $n>>,
        > = $crate::critical_section::Mutex::new(::core::cell::RefCell::new(
            $crate::Ringbuf::new($init),
        ));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`. Without a name, it defaults to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::critical_section::with(|cs| {
            $crate::Ringbuf::entry(
                &mut *buf.borrow_ref_mut(cs),
                line!() as u16,
                p,
            );
        });
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is only done by tests -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // A never-written buffer has no last slot; treating that as an
        // out-of-range index deposits the first entry in slot 0 below.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // No remainder here: usize::MAX has to wrap to 0, and several of our
        // targets have no hardware divide.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Walks the written entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last.wrapping_add(1),
            None => N,
        };
        (0..N)
            .map(move |i| &self.buffer[(start + i) % N.max(1)])
            .filter(|ent| self.last.is_some() && ent.count != 0)
    }
}
