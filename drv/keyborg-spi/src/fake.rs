// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-ins for the SPI block, GPIOs and the peer chip.

use core::convert::Infallible;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use drv_keyborg_sync::{Barrier, SyncError, SyncPhase};
use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::{BusError, SpiBus, DUMMY};

/// A GPIO line that counts how often it was driven low.
#[derive(Clone, Default)]
pub struct Wire {
    level: Rc<Cell<bool>>,
    falls: Rc<Cell<u32>>,
}

impl Wire {
    pub fn get(&self) -> bool {
        self.level.get()
    }

    pub fn set(&self, level: bool) {
        self.level.set(level);
    }

    pub fn falls(&self) -> u32 {
        self.falls.get()
    }
}

impl OutputPin for Wire {
    type Error = Infallible;
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.falls.set(self.falls.get() + 1);
        self.level.set(false);
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        self.level.set(true);
        Ok(())
    }
}

impl InputPin for Wire {
    type Error = Infallible;
    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(self.level.get())
    }
    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(!self.level.get())
    }
}

/// A barrier whose peer is always there, except on the n-th round.
#[derive(Clone, Default)]
pub struct FakeSync {
    calls: Rc<Cell<u32>>,
    fail_at: Option<u32>,
}

impl FakeSync {
    pub fn failing_at(n: u32) -> Self {
        Self {
            fail_at: Some(n),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl Barrier for FakeSync {
    fn sync(&mut self, _timeout_ms: u32) -> Result<(), SyncError> {
        let n = self.calls.get() + 1;
        self.calls.set(n);
        if self.fail_at == Some(n) {
            Err(SyncError::Timeout {
                phase: SyncPhase::PeerAssert,
            })
        } else {
            Ok(())
        }
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>>>;

#[derive(Default)]
struct SlaveState {
    queue: VecDeque<Vec<u8>>,
    received: Vec<Vec<u8>>,
    size: Option<u8>,
    reading: Option<Vec<u8>>,
    done: bool,
    corrupt_crc: bool,
    stall: bool,
    responder: Option<Responder>,
}

/// The slave chip as the master sees it: its end of the bus and its ready
/// line, which is high whenever it has a response queued.
#[derive(Clone, Default)]
pub struct FakeSlave(Rc<RefCell<SlaveState>>);

impl FakeSlave {
    /// A slave that queues whatever `f` returns for each command frame.
    pub fn answering(
        f: impl FnMut(&[u8]) -> Vec<Vec<u8>> + 'static,
    ) -> Self {
        let slave = Self::default();
        slave.0.borrow_mut().responder = Some(Box::new(f));
        slave
    }

    pub fn queue(&self, frame: Vec<u8>) {
        self.0.borrow_mut().queue.push_back(frame);
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.0.borrow().received.clone()
    }

    pub fn corrupt_crc_next(&self) {
        self.0.borrow_mut().corrupt_crc = true;
    }

    pub fn stall_dma(&self, stall: bool) {
        self.0.borrow_mut().stall = stall;
    }
}

impl SpiBus for FakeSlave {
    fn exchange(&mut self, byte: u8) -> Result<u8, BusError> {
        let st = &mut *self.0.borrow_mut();
        if byte == DUMMY {
            let frame = st.queue.pop_front().ok_or(BusError::Timeout)?;
            let size = frame[0];
            st.reading = Some(frame);
            Ok(size)
        } else {
            st.size = Some(byte);
            Ok(0)
        }
    }

    fn start_write(&mut self, bytes: &[u8]) {
        let st = &mut *self.0.borrow_mut();
        let mut frame = vec![st.size.take().unwrap_or(0)];
        frame.extend_from_slice(bytes);
        if let Some(respond) = st.responder.as_mut() {
            st.queue.extend(respond(&frame));
        }
        st.received.push(frame);
        st.done = !st.stall;
    }

    fn start_read(&mut self, _len: usize) {
        let st = &mut *self.0.borrow_mut();
        st.done = !st.stall;
    }

    fn is_done(&self) -> bool {
        self.0.borrow().done
    }

    fn take_read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let st = &mut *self.0.borrow_mut();
        let frame = st.reading.take().unwrap_or_default();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = frame.get(i + 1).copied().unwrap_or(0);
        }
        if core::mem::take(&mut st.corrupt_crc) {
            return Err(BusError::Crc);
        }
        Ok(())
    }

    fn stop(&mut self) {
        let st = &mut *self.0.borrow_mut();
        st.done = false;
        st.size = None;
    }
}

impl InputPin for FakeSlave {
    type Error = Infallible;
    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(!self.0.borrow().queue.is_empty())
    }
    fn is_low(&self) -> Result<bool, Infallible> {
        self.is_high().map(|h| !h)
    }
}

#[derive(Default)]
struct MasterState {
    incoming: VecDeque<u8>,
    release: Option<Wire>,
    sent: Vec<u8>,
    done: bool,
    corrupt_crc: bool,
    stall: bool,
}

/// The master's end of the bus as the slave sees it. Bytes the master will
/// clock in are queued up front; anything we shift out is recorded.
#[derive(Clone, Default)]
pub struct FakeMaster(Rc<RefCell<MasterState>>);

impl FakeMaster {
    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().incoming.extend(bytes.iter().copied());
    }

    pub fn sent(&self) -> Vec<u8> {
        self.0.borrow().sent.clone()
    }

    pub fn corrupt_crc_next(&self) {
        self.0.borrow_mut().corrupt_crc = true;
    }

    pub fn stall_dma(&self, stall: bool) {
        self.0.borrow_mut().stall = stall;
    }

    /// Deasserts `cs` as soon as the slave starts reading a body.
    pub fn release_on_read(&self, cs: Wire) {
        self.0.borrow_mut().release = Some(cs);
    }
}

impl SpiBus for FakeMaster {
    fn exchange(&mut self, byte: u8) -> Result<u8, BusError> {
        let st = &mut *self.0.borrow_mut();
        st.sent.push(byte);
        // While we answer, the master clocks dummies.
        Ok(st.incoming.pop_front().unwrap_or(DUMMY))
    }

    fn start_write(&mut self, bytes: &[u8]) {
        let st = &mut *self.0.borrow_mut();
        st.sent.extend_from_slice(bytes);
        st.done = !st.stall;
    }

    fn start_read(&mut self, len: usize) {
        let st = &mut *self.0.borrow_mut();
        st.done = !st.stall && st.incoming.len() >= len;
        if let Some(cs) = st.release.take() {
            cs.set(true);
        }
    }

    fn is_done(&self) -> bool {
        self.0.borrow().done
    }

    fn take_read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let st = &mut *self.0.borrow_mut();
        for b in buf.iter_mut() {
            *b = st.incoming.pop_front().unwrap_or(0);
        }
        if core::mem::take(&mut st.corrupt_crc) {
            return Err(BusError::Crc);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.0.borrow_mut().done = false;
    }
}
