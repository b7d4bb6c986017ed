// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// One full column: the rows sensed here and the rows relayed by the peer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Column<const ROWS: usize> {
    pub local: [u8; ROWS],
    pub remote: [u8; ROWS],
}

impl<const ROWS: usize> Default for Column<ROWS> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<const ROWS: usize> Column<ROWS> {
    pub const ZERO: Self = Self {
        local: [0; ROWS],
        remote: [0; ROWS],
    };

    /// Copies in the peer's half. Anything past `ROWS` is dropped and
    /// missing rows read as zero.
    pub fn relay(&mut self, data: &[u8]) {
        fill(&mut self.remote, data);
    }

    pub fn from_halves(local: &[u8], remote: &[u8]) -> Self {
        let mut col = Self::ZERO;
        fill(&mut col.local, local);
        col.relay(remote);
        col
    }

    /// Every row of the column, local half first.
    pub fn rows(&self) -> impl Iterator<Item = u8> + '_ {
        self.local.iter().chain(self.remote.iter()).copied()
    }
}

fn fill(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0);
}

/// Consumer of scanned frames, fed one column at a time.
///
/// A frame is `begin`, some `add_column` calls in column order, then
/// either `done` or `abort`. After `abort` whatever was added must not be
/// reported.
pub trait FrameEncoder<const ROWS: usize> {
    fn begin(&mut self);
    fn add_column(&mut self, col: usize, column: &Column<ROWS>);
    fn done(&mut self);
    fn abort(&mut self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameState {
    Empty,
    Building,
    Complete,
    Aborted,
}

/// Keeps the whole last frame in memory.
///
/// Columns driven by the master are in the first bank, columns driven by
/// the slave in the second.
pub struct FrameBuffer<const ROWS: usize, const COLS: usize> {
    banks: [[Column<ROWS>; COLS]; 2],
    added: usize,
    state: FrameState,
    frames: u32,
}

impl<const ROWS: usize, const COLS: usize> Default for FrameBuffer<ROWS, COLS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ROWS: usize, const COLS: usize> FrameBuffer<ROWS, COLS> {
    pub const fn new() -> Self {
        Self {
            banks: [[Column::ZERO; COLS]; 2],
            added: 0,
            state: FrameState::Empty,
            frames: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Completed frames so far.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Column `col` of the last complete frame.
    pub fn column(&self, col: usize) -> Option<&Column<ROWS>> {
        if self.state != FrameState::Complete {
            return None;
        }
        self.banks.get(col / COLS.max(1))?.get(col % COLS.max(1))
    }
}

impl<const ROWS: usize, const COLS: usize> FrameEncoder<ROWS>
    for FrameBuffer<ROWS, COLS>
{
    fn begin(&mut self) {
        self.added = 0;
        self.state = FrameState::Building;
    }

    fn add_column(&mut self, col: usize, column: &Column<ROWS>) {
        if self.state != FrameState::Building || COLS == 0 {
            return;
        }
        if let Some(slot) = self
            .banks
            .get_mut(col / COLS)
            .and_then(|bank| bank.get_mut(col % COLS))
        {
            *slot = *column;
            self.added += 1;
        }
    }

    fn done(&mut self) {
        if self.state == FrameState::Building && self.added == 2 * COLS {
            self.state = FrameState::Complete;
            self.frames = self.frames.wrapping_add(1);
        } else {
            self.state = FrameState::Aborted;
        }
    }

    fn abort(&mut self) {
        self.state = FrameState::Aborted;
    }
}
