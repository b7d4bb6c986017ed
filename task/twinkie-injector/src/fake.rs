// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A front end that records what it was told and replays canned inputs.

use std::collections::VecDeque;

use pd_phy::BitBuffer;

use crate::{Cc, PdFrontEnd, Resistor, TxError};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FakeFrontEnd {
    pub sent: Vec<(Cc, BitBuffer)>,
    pub rx: VecDeque<BitBuffer>,
    /// Edge counter; `None` if the board cannot count edges.
    pub edges: Option<u32>,
    /// How far the edge counter moves on each read.
    pub edge_rate: u32,
    pub resistors: Vec<(Cc, Resistor)>,
    pub recording: bool,
    pub tx_clock_hz: u32,
    pub rx_dac: u16,
    pub cc: [u16; 2],
    pub vbus: (u16, u16),
    pub vconn: (u16, u16),
    /// Refuse every transmission.
    pub busy: bool,
}

impl PdFrontEnd for FakeFrontEnd {
    fn transmit(&mut self, cc: Cc, cells: &BitBuffer) -> Result<(), TxError> {
        if self.busy {
            return Err(TxError::Busy);
        }
        self.sent.push((cc, cells.clone()));
        Ok(())
    }

    fn receive(&mut self, _cc: Cc) -> Option<BitBuffer> {
        self.rx.pop_front()
    }

    fn edges(&mut self, _cc: Cc) -> Option<u32> {
        let now = self.edges?;
        self.edges = Some(now.wrapping_add(self.edge_rate));
        Some(now)
    }

    fn set_resistor(&mut self, cc: Cc, r: Resistor) {
        self.resistors.push((cc, r));
    }

    fn set_recording(&mut self, on: bool) {
        self.recording = on;
    }

    fn set_tx_clock(&mut self, hz: u32) {
        self.tx_clock_hz = hz;
    }

    fn set_rx_dac(&mut self, code: u16) {
        self.rx_dac = code;
    }

    fn cc_mv(&mut self, cc: Cc) -> u16 {
        self.cc[cc.index() as usize]
    }

    fn vbus(&mut self) -> (u16, u16) {
        self.vbus
    }

    fn vconn(&mut self) -> (u16, u16) {
        self.vconn
    }
}
