// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Both chips' link code, run against each other on two threads.
//!
//! The sync lines, chip select and ready line are shared atomics; the bus
//! is a pair of byte pipes. Every clock read yields, so the spinning
//! waits on each side hand the CPU to the peer.

use core::convert::Infallible;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use drv_keyborg_spi::{
    BusError, HelloReport, SpiBus, SpiConfig, SpiMaster, SpiSlave,
};
use drv_keyborg_sync::{
    Barrier, Handshake, Role, SyncConfig, SyncError, SyncLines,
};
use embedded_hal::digital::v2::{InputPin, OutputPin};
use ticks::Clock;

use crate::{
    Column, ColumnDriver, FrameBuffer, FrameState, RowSampler, ScanConfig,
    Served, SlaveService, TouchScanner,
};

const ROWS: usize = 4;
const COLS: usize = 2;

#[derive(Clone, Default)]
struct Line(Arc<AtomicBool>);

impl Line {
    fn high() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl OutputPin for Line {
    type Error = Infallible;
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.store(false, Ordering::SeqCst);
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl InputPin for Line {
    type Error = Infallible;
    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(self.get())
    }
    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(!self.get())
    }
}

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of the bus. An exchange puts our byte on the wire and waits
/// for the peer's; DMA writes land in the peer's pipe at once and a DMA
/// read is done when enough bytes have arrived.
struct BusEnd {
    tx: Pipe,
    rx: Pipe,
    want: usize,
}

fn bus() -> (BusEnd, BusEnd) {
    let m2s = Pipe::default();
    let s2m = Pipe::default();
    (
        BusEnd {
            tx: m2s.clone(),
            rx: s2m.clone(),
            want: 0,
        },
        BusEnd {
            tx: s2m,
            rx: m2s,
            want: 0,
        },
    )
}

impl SpiBus for BusEnd {
    fn exchange(&mut self, byte: u8) -> Result<u8, BusError> {
        self.tx.lock().unwrap().push_back(byte);
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(b) = self.rx.lock().unwrap().pop_front() {
                return Ok(b);
            }
            if Instant::now() >= deadline {
                return Err(BusError::Timeout);
            }
            thread::yield_now();
        }
    }

    fn start_write(&mut self, bytes: &[u8]) {
        self.tx.lock().unwrap().extend(bytes.iter().copied());
        self.want = 0;
    }

    fn start_read(&mut self, len: usize) {
        self.want = len;
    }

    fn is_done(&self) -> bool {
        self.rx.lock().unwrap().len() >= self.want
    }

    fn take_read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let mut rx = self.rx.lock().unwrap();
        for b in buf.iter_mut() {
            *b = rx.pop_front().ok_or(BusError::Timeout)?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.want = 0;
    }
}

struct WallClock(Instant);

impl WallClock {
    fn new() -> Self {
        Self(Instant::now())
    }
}

impl Clock for WallClock {
    fn now_us(&self) -> u64 {
        thread::yield_now();
        self.0.elapsed().as_micros() as u64
    }
}

/// Counts sync rounds entered.
struct Counted<B> {
    inner: B,
    rounds: Arc<AtomicU32>,
}

impl<B: Barrier> Barrier for Counted<B> {
    fn sync(&mut self, timeout_ms: u32) -> Result<(), SyncError> {
        self.rounds.fetch_add(1, Ordering::SeqCst);
        self.inner.sync(timeout_ms)
    }
}

/// Checks that columns are enabled and disabled in pairs.
#[derive(Default)]
struct Columns {
    enabled: Option<usize>,
}

impl ColumnDriver for Columns {
    fn enable(&mut self, col: usize) {
        assert_eq!(self.enabled, None);
        self.enabled = Some(col);
    }

    fn disable(&mut self, col: usize) {
        assert_eq!(self.enabled.take(), Some(col));
    }
}

/// Fills each sample with one more than the last.
struct Ramp {
    next: u8,
}

impl RowSampler<ROWS> for Ramp {
    fn sample(&mut self, rows: &mut [u8; ROWS]) {
        rows.fill(self.next);
        self.next += 1;
    }
}

type Link = Counted<Handshake<Line, Line, WallClock>>;

fn link(role: Role, own: &Line, peer: &Line) -> (Link, Arc<AtomicU32>) {
    let config = SyncConfig {
        short_timeout_ms: 1000,
        initial_timeout_ms: 2000,
    };
    let lines = SyncLines {
        own: own.clone(),
        peer: peer.clone(),
    };
    let rounds = Arc::new(AtomicU32::new(0));
    let hs = Handshake::new(role, lines, WallClock::new(), config).unwrap();
    (
        Counted {
            inner: hs,
            rounds: rounds.clone(),
        },
        rounds,
    )
}

// The slave waits longer for a response slot than the master waits for
// the response, so a master that gives up does so first.
fn spi_config() -> SpiConfig {
    SpiConfig {
        ready_timeout_ms: 1000,
        response_timeout_ms: 1000,
        slave_response_timeout_ms: 2000,
        short_timeout_ms: 1000,
        flush_timeout_ms: 1000,
        dma_timeout_ms: 1000,
        hello_retries: 1,
    }
}

fn scan_config() -> ScanConfig {
    ScanConfig {
        sync_timeout_ms: 1000,
        settle_us: 0,
    }
}

#[test]
fn hello_and_full_scan_between_real_links() {
    let sync1 = Line::default();
    let sync2 = Line::default();
    let cs = Line::high();
    let ready = Line::default();
    let (m_bus, s_bus) = bus();

    let (m_sync, m_rounds) = link(Role::Master, &sync1, &sync2);
    let (s_sync, s_rounds) = link(Role::Slave, &sync2, &sync1);
    let mut master = SpiMaster::new(
        m_bus,
        m_sync,
        cs.clone(),
        ready.clone(),
        WallClock::new(),
        spi_config(),
    )
    .unwrap();
    let slave = SpiSlave::new(
        s_bus,
        s_sync,
        ready.clone(),
        cs.clone(),
        WallClock::new(),
        spi_config(),
    )
    .unwrap();

    let mut svc = SlaveService::new(
        slave,
        TouchScanner::<_, _, ROWS, COLS>::new(
            Columns::default(),
            Ramp { next: 1 },
            scan_config(),
        ),
    );
    // Nobody has called yet.
    assert_eq!(svc.serve_one(20), Ok(Served::Idle));
    assert_eq!(svc.link().stats().timeouts, 0);

    let peer = thread::spawn(move || {
        let mut served = Vec::new();
        for _ in 0..10 {
            match svc.serve_one(2000) {
                Ok(Served::Idle) => (),
                r => served.push(r),
            }
            if served.len() == 4 {
                break;
            }
        }
        (served, svc)
    });

    let mut scanner = TouchScanner::<_, _, ROWS, COLS>::new(
        Columns::default(),
        Ramp { next: 100 },
        scan_config(),
    );
    let mut frame = FrameBuffer::<ROWS, COLS>::new();

    assert_eq!(master.hello(), Ok(()));
    assert_eq!(scanner.scan_full_matrix(&mut master, &mut frame), Ok(()));
    assert_eq!(
        master.hello_test(2),
        HelloReport {
            passed: 2,
            failed: 0
        }
    );

    let (served, svc) = peer.join().unwrap();
    assert_eq!(
        served,
        [
            Ok(Served::Hello),
            Ok(Served::Scan),
            Ok(Served::Hello),
            Ok(Served::Hello)
        ]
    );

    // Each step pairs the master's sample with the slave's sample from
    // the same step.
    assert_eq!(frame.state(), FrameState::Complete);
    for col in 0..2 * COLS {
        let n = col as u8;
        assert_eq!(
            frame.column(col),
            Some(&Column {
                local: [100 + n; ROWS],
                remote: [1 + n; ROWS],
            })
        );
    }

    // Two rounds per command, two per response, four per scan step and
    // one closing the scan: both sides agree on every one.
    let steps = 2 * COLS as u32;
    let rounds = 3 * 4 + 2 + 4 * steps + 1;
    assert_eq!(m_rounds.load(Ordering::SeqCst), rounds);
    assert_eq!(s_rounds.load(Ordering::SeqCst), rounds);

    let responses = 3 + steps;
    assert_eq!(master.stats().commands, 4);
    assert_eq!(master.stats().responses, responses);
    assert_eq!(master.stats().timeouts, 0);
    assert_eq!(svc.link().stats().commands, 4);
    assert_eq!(svc.link().stats().responses, responses);
    assert_eq!(svc.link().stats().timeouts, 0);
    assert_eq!(svc.scanner().scans(), 1);
    assert_eq!(scanner.scans(), 1);

    // Both chips leave the bus idle.
    assert!(cs.get());
    assert!(!ready.get());
    assert!(!sync1.get());
    assert!(!sync2.get());
}
