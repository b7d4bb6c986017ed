// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use enum_map::EnumMap;
use num_traits::FromPrimitive;
use pd_phy::{BitBuffer, DecodeError, Decoded, RAW_CELLS};
use ringbuf::*;
use ticks::{Clock, Deadline};

use crate::isa::{self, GetParam, Instruction, SetParam, POLARITY_AUTO};
use crate::{
    dac_code, Cc, Fault, InjectorConfig, InjectorError, Keepalive, Mode,
    PdFrontEnd, Resistor, TraceMode, PROGRAM_WORDS,
};

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Start { index: u16 },
    Exec { index: u16, op: u8 },
    Raw { index: u16, word: u32 },
    Skipped { index: u16, fault: Fault },
    Failed { index: u16, fault: Fault },
    RxError(DecodeError),
    Polarity(Cc),
    Halt { index: u16, steps: u32 },
}
ringbuf!(Trace, 64, Trace::None);

/// Trace entries saturate rather than wrap.
fn trace_index(index: usize) -> u16 {
    u16::try_from(index).unwrap_or(u16::MAX)
}

enum Flow {
    Next,
    Jump(usize),
    Halt,
}

/// The interpreter and every piece of state programs can change.
pub struct Injector<F, C> {
    fe: F,
    clock: C,
    config: InjectorConfig,
    program: [u32; PROGRAM_WORDS],
    polarity: Cc,
    resistors: EnumMap<Cc, Resistor>,
    recording: bool,
}

impl<F: PdFrontEnd, C: Clock> Injector<F, C> {
    pub fn new(fe: F, clock: C, config: InjectorConfig) -> Self {
        let mut this = Self {
            fe,
            clock,
            config,
            program: [0; PROGRAM_WORDS],
            polarity: Cc::Cc1,
            resistors: EnumMap::default(),
            recording: false,
        };
        this.apply();
        this
    }

    /// Pushes clock, threshold, terminations and recording state out to
    /// the front end.
    pub fn apply(&mut self) {
        self.fe.set_tx_clock(self.config.tx_clock_hz);
        self.fe.set_rx_dac(dac_code(self.config.rx_threshold_mv));
        for (cc, &r) in &self.resistors {
            self.fe.set_resistor(cc, r);
        }
        self.fe.set_recording(self.recording);
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    pub fn front_end(&self) -> &F {
        &self.fe
    }

    pub fn front_end_mut(&mut self) -> &mut F {
        &mut self.fe
    }

    pub fn program(&self) -> &[u32; PROGRAM_WORDS] {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut [u32; PROGRAM_WORDS] {
        &mut self.program
    }

    /// Copies `words` into the program starting at `index`.
    pub fn load(&mut self, index: usize, words: &[u32]) -> Result<(), Fault> {
        let end = index.checked_add(words.len()).ok_or(Fault::Range)?;
        self.program
            .get_mut(index..end)
            .ok_or(Fault::Range)?
            .copy_from_slice(words);
        Ok(())
    }

    fn words(&self, index: usize, count: usize) -> Result<&[u32], Fault> {
        self.program.get(index..index + count).ok_or(Fault::Range)
    }

    pub fn polarity(&self) -> Cc {
        self.polarity
    }

    pub fn set_polarity(&mut self, cc: Cc) {
        self.polarity = cc;
    }

    pub fn resistor(&self, cc: Cc) -> Resistor {
        self.resistors[cc]
    }

    pub fn set_resistor(&mut self, cc: Cc, r: Resistor) {
        self.resistors[cc] = r;
        self.fe.set_resistor(cc, r);
    }

    pub fn set_recording(&mut self, on: bool) {
        self.recording = on;
        self.fe.set_recording(on);
    }

    pub fn set_trace_mode(&mut self, mode: TraceMode) {
        self.config.trace = mode;
    }

    pub fn set_tx_clock(&mut self, hz: u32) {
        self.config.tx_clock_hz = hz;
        self.fe.set_tx_clock(hz);
    }

    pub fn set_rx_threshold(&mut self, mv: u32) {
        self.config.rx_threshold_mv = mv;
        self.fe.set_rx_dac(dac_code(mv));
    }

    /// CC1 and CC2 voltages in mV.
    pub fn cc_mv(&mut self) -> (u16, u16) {
        (self.fe.cc_mv(Cc::Cc1), self.fe.cc_mv(Cc::Cc2))
    }

    /// Picks the CC line the partner is attached to.
    ///
    /// Presenting Rp on either line, we are a source: the partner's Rd
    /// pulls its line into the Rd window while the open line floats above
    /// it. Otherwise we are a sink and take the higher line, provided it
    /// clears the sink detection threshold. Ties go to CC1.
    pub fn detect_polarity(&mut self) -> Result<Cc, Fault> {
        let (cc1, cc2) = self.cc_mv();
        let source = self.resistors.values().any(|r| r.is_rp());
        let cc = if source {
            let rd = |mv: u16| {
                (pd_phy::SRC_DEF_RD_THRESH_MV..pd_phy::SRC_DEF_VNC_MV)
                    .contains(&u32::from(mv))
            };
            if rd(cc1) {
                Cc::Cc1
            } else if rd(cc2) {
                Cc::Cc2
            } else {
                return Err(Fault::NoPartner);
            }
        } else {
            let (cc, mv) = if cc2 > cc1 {
                (Cc::Cc2, cc2)
            } else {
                (Cc::Cc1, cc1)
            };
            if u32::from(mv) < pd_phy::SNK_VA_MV {
                return Err(Fault::NoPartner);
            }
            cc
        };
        ringbuf_entry!(Trace::Polarity(cc));
        Ok(cc)
    }

    pub fn send_message(
        &mut self,
        cc: Cc,
        header: u16,
        payload: &[u32],
    ) -> Result<(), Fault> {
        let cells = pd_phy::encode_message(header, payload)?;
        self.fe.transmit(cc, &cells)?;
        Ok(())
    }

    /// Runs the program from `start` until END, the end of the buffer, or
    /// a failure. Returns the index it stopped at.
    ///
    /// `keepalive` is kicked before every instruction and while an
    /// instruction waits.
    pub fn run<K: Keepalive>(
        &mut self,
        start: usize,
        keepalive: &mut K,
    ) -> Result<usize, InjectorError> {
        ringbuf_entry!(Trace::Start {
            index: trace_index(start)
        });
        let mut index = start;
        let mut steps = 0u32;

        while let Some(&word) = self.program.get(index) {
            if self.config.step_limit.is_some_and(|limit| steps >= limit) {
                return Err(self.fail(index, Fault::StepLimit));
            }
            keepalive.kick();
            steps = steps.wrapping_add(1);

            match self.config.trace {
                TraceMode::Off => (),
                TraceMode::On => ringbuf_entry!(Trace::Exec {
                    index: trace_index(index),
                    op: isa::opcode(word),
                }),
                TraceMode::Raw => ringbuf_entry!(Trace::Raw {
                    index: trace_index(index),
                    word,
                }),
            }

            match self.step(word, keepalive) {
                Ok(Flow::Next) => index += 1,
                Ok(Flow::Jump(target)) => index = target,
                Ok(Flow::Halt) => break,
                Err(fault) if self.config.mode == Mode::Lenient => {
                    ringbuf_entry!(Trace::Skipped {
                        index: trace_index(index),
                        fault
                    });
                    index += 1;
                }
                Err(fault) => return Err(self.fail(index, fault)),
            }
        }

        ringbuf_entry!(Trace::Halt {
            index: trace_index(index),
            steps
        });
        Ok(index)
    }

    fn fail(&self, index: usize, fault: Fault) -> InjectorError {
        ringbuf_entry!(Trace::Failed {
            index: trace_index(index),
            fault
        });
        InjectorError { index, fault }
    }

    fn step<K: Keepalive>(
        &mut self,
        word: u32,
        keepalive: &mut K,
    ) -> Result<Flow, Fault> {
        match Instruction::decode(word).map_err(Fault::BadOpcode)? {
            Instruction::End => return Ok(Flow::Halt),
            Instruction::Send {
                header,
                index,
                count,
            } => {
                let payload = self.words(index.into(), count.into())?;
                let cells = pd_phy::encode_message(header, payload)?;
                self.fe.transmit(self.polarity, &cells)?;
            }
            Instruction::Wave { bits, index } => {
                let bits = usize::from(bits);
                if bits > RAW_CELLS {
                    return Err(Fault::Range);
                }
                let words = self.words(index.into(), bits.div_ceil(32))?;
                let cells = BitBuffer::from_words(words, bits);
                self.fe.transmit(self.polarity, &cells)?;
            }
            Instruction::HardReset => {
                let cells = pd_phy::encode_hard_reset();
                self.fe.transmit(self.polarity, &cells)?;
            }
            Instruction::Wait { timeout_ms, edges } => {
                self.wait_edges(timeout_ms, edges, keepalive)?;
            }
            Instruction::Get { index, param } => {
                let value = self.get(param)?;
                *self
                    .program
                    .get_mut(usize::from(index))
                    .ok_or(Fault::Range)? = value;
            }
            Instruction::Set { param, value } => self.set(param, value)?,
            Instruction::Jump { target } => {
                return Ok(Flow::Jump(target.into()));
            }
            Instruction::Expect {
                timeout_ms,
                msg_type,
            } => self.expect(timeout_ms, msg_type, keepalive)?,
            Instruction::Nop => (),
        }
        Ok(Flow::Next)
    }

    fn get(&mut self, param: u8) -> Result<u32, Fault> {
        let pack = |(lo, hi): (u16, u16)| u32::from(lo) | u32::from(hi) << 16;
        Ok(match GetParam::from_u8(param).ok_or(Fault::BadParam(param))? {
            GetParam::Cc => pack(self.cc_mv()),
            GetParam::Vbus => pack(self.fe.vbus()),
            GetParam::Vconn => pack(self.fe.vconn()),
            GetParam::Polarity => self.polarity.index(),
        })
    }

    fn set(&mut self, param: u8, value: u16) -> Result<(), Fault> {
        let bad = Fault::BadValue(value);
        match SetParam::from_u8(param).ok_or(Fault::BadParam(param))? {
            SetParam::Resistor1 => {
                let r = Resistor::from_u16(value).ok_or(bad)?;
                self.set_resistor(Cc::Cc1, r);
            }
            SetParam::Resistor2 => {
                let r = Resistor::from_u16(value).ok_or(bad)?;
                self.set_resistor(Cc::Cc2, r);
            }
            SetParam::Record => self.set_recording(value != 0),
            SetParam::TxSpeed => self.set_tx_clock(u32::from(value) * 1000),
            SetParam::RxThresh => self.set_rx_threshold(u32::from(value)),
            SetParam::Polarity => {
                self.polarity = if value == POLARITY_AUTO {
                    self.detect_polarity()?
                } else {
                    Cc::from_index(value.into()).ok_or(bad)?
                };
            }
            SetParam::Trace => {
                self.config.trace = TraceMode::from_u16(value).ok_or(bad)?;
            }
        }
        Ok(())
    }

    fn wait_edges<K: Keepalive>(
        &mut self,
        timeout_ms: u16,
        edges: u16,
        keepalive: &mut K,
    ) -> Result<(), Fault> {
        let cc = self.polarity;
        let Some(start) = self.fe.edges(cc) else {
            return Ok(());
        };
        let deadline = Deadline::after_ms(&self.clock, timeout_ms.into());
        loop {
            let now = self.fe.edges(cc).unwrap_or(start);
            if now.wrapping_sub(start) >= u32::from(edges) {
                return Ok(());
            }
            if deadline.expired(&self.clock) {
                return Err(Fault::Timeout);
            }
            keepalive.kick();
        }
    }

    fn expect<K: Keepalive>(
        &mut self,
        timeout_ms: u16,
        msg_type: u8,
        keepalive: &mut K,
    ) -> Result<(), Fault> {
        let cc = self.polarity;
        let deadline = Deadline::after_ms(&self.clock, timeout_ms.into());
        loop {
            if let Some(cells) = self.fe.receive(cc) {
                match pd_phy::decode(&cells) {
                    Ok(Decoded::Message { header, .. })
                        if pd_phy::header_type(header) == msg_type =>
                    {
                        return Ok(());
                    }
                    Ok(_) => (),
                    Err(e) => ringbuf_entry!(Trace::RxError(e)),
                }
            }
            if deadline.expired(&self.clock) {
                return Err(Fault::Timeout);
            }
            keepalive.kick();
        }
    }
}
