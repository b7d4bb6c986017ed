// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Console commands for loading, running and poking the injector.
//!
//! | command | arguments |
//! |---|---|
//! | `fsm` | `<start_index>` |
//! | `send` | `<polarity> <header_hex> [data_hex...]` |
//! | `bufwr` | `<index> <hex...>` |
//! | `bufrd` | `<index> [count]` |
//! | `resistor` | `<cc1_name> <cc2_name>` |
//! | `trace` | `on\|off\|raw` |
//! | `txclock` | `<hz>` |
//! | `rxthresh` | `<mv>` |
//! | `cc`, `vbus`, `vconn`, `sink` | |
//!
//! Arguments are numbered from 1 after the command; a malformed one is
//! reported as the matching `EcError::Param*`.

use core::fmt::{self, Write};
use core::str::SplitAsciiWhitespace;

use ec_error::EcError;
use ticks::Clock;

use crate::{Cc, Injector, Keepalive, PdFrontEnd, Resistor, TraceMode};

/// Most data words `bufwr` takes at once.
const MAX_WORDS: usize = 8;

struct Args<'a> {
    words: SplitAsciiWhitespace<'a>,
    n: usize,
}

impl<'a> Args<'a> {
    fn next(&mut self) -> Option<(usize, &'a str)> {
        let word = self.words.next()?;
        self.n += 1;
        Some((self.n, word))
    }

    fn required(&mut self) -> Result<(usize, &'a str), EcError> {
        self.next().ok_or(EcError::ParamCount)
    }

    fn number(&mut self) -> Result<u32, EcError> {
        let (n, s) = self.required()?;
        parse_number(s).ok_or(EcError::param(n))
    }

    fn hex(&mut self) -> Result<u32, EcError> {
        let (n, s) = self.required()?;
        parse_hex(s).ok_or(EcError::param(n))
    }

    fn optional_number(&mut self) -> Result<Option<u32>, EcError> {
        match self.next() {
            None => Ok(None),
            Some((n, s)) => parse_number(s).map(Some).ok_or(EcError::param(n)),
        }
    }

    /// Parses what is left as hex words.
    fn hex_words(&mut self, out: &mut [u32]) -> Result<usize, EcError> {
        let mut count = 0;
        while let Some((n, s)) = self.next() {
            let slot = out.get_mut(count).ok_or(EcError::ParamCount)?;
            *slot = parse_hex(s).ok_or(EcError::param(n))?;
            count += 1;
        }
        Ok(count)
    }

    fn finish(mut self) -> Result<(), EcError> {
        match self.next() {
            None => Ok(()),
            Some(_) => Err(EcError::ParamCount),
        }
    }
}

/// Decimal, or hex with a `0x` prefix.
fn parse_number(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Hex, with or without a `0x` prefix.
fn parse_hex(s: &str) -> Option<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

fn emit(out: &mut impl Write, args: fmt::Arguments<'_>) -> Result<(), EcError> {
    out.write_fmt(args).map_err(|_| EcError::Unknown)
}

fn cc_name(cc: Cc) -> u32 {
    cc.index() + 1
}

/// Runs one console line against `inj`.
pub fn execute<F, C, K, W>(
    inj: &mut Injector<F, C>,
    keepalive: &mut K,
    out: &mut W,
    line: &str,
) -> Result<(), EcError>
where
    F: PdFrontEnd,
    C: Clock,
    K: Keepalive,
    W: Write,
{
    let mut words = line.split_ascii_whitespace();
    let Some(cmd) = words.next() else {
        return Err(EcError::ParamCount);
    };
    let mut args = Args { words, n: 0 };

    match cmd {
        "fsm" => {
            let start = args.number()?;
            args.finish()?;
            match inj.run(start as usize, keepalive) {
                Ok(end) => emit(out, format_args!("FSM end @ {end}\n")),
                Err(e) => {
                    let (index, fault) = (e.index, e.fault);
                    emit(
                        out,
                        format_args!("FSM failed @ {index}: {fault:?}\n"),
                    )?;
                    Err(fault.into())
                }
            }
        }
        "send" => {
            let (n, pol) = args.required()?;
            let cc = parse_number(pol)
                .and_then(Cc::from_index)
                .ok_or(EcError::param(n))?;
            let header = args.hex()?;
            let header = u16::try_from(header).map_err(|_| EcError::Param2)?;
            let mut data = [0; pd_phy::MAX_DATA_OBJECTS];
            let count = args.hex_words(&mut data)?;
            inj.send_message(cc, header, &data[..count])?;
            Ok(())
        }
        "bufwr" => {
            let index = args.number()? as usize;
            let mut data = [0; MAX_WORDS];
            let count = args.hex_words(&mut data)?;
            if count == 0 {
                return Err(EcError::ParamCount);
            }
            inj.load(index, &data[..count])
                .map_err(|_| EcError::Overflow)
        }
        "bufrd" => {
            let index = args.number()? as usize;
            let count = args.optional_number()?.unwrap_or(1) as usize;
            args.finish()?;
            let words = index
                .checked_add(count)
                .and_then(|end| inj.program().get(index..end))
                .ok_or(EcError::Overflow)?;
            for (i, w) in words.iter().enumerate() {
                emit(out, format_args!("{:3}: {w:08x}\n", index + i))?;
            }
            Ok(())
        }
        "resistor" => {
            let mut pick = || -> Result<Resistor, EcError> {
                let (n, name) = args.required()?;
                Resistor::from_name(name).ok_or(EcError::param(n))
            };
            let cc1 = pick()?;
            let cc2 = pick()?;
            args.finish()?;
            inj.set_resistor(Cc::Cc1, cc1);
            inj.set_resistor(Cc::Cc2, cc2);
            Ok(())
        }
        "trace" => {
            let (n, mode) = args.required()?;
            let mode = match mode {
                "on" => TraceMode::On,
                "off" => TraceMode::Off,
                "raw" => TraceMode::Raw,
                _ => return Err(EcError::param(n)),
            };
            args.finish()?;
            inj.set_trace_mode(mode);
            Ok(())
        }
        "txclock" => {
            let hz = args.number()?;
            args.finish()?;
            inj.set_tx_clock(hz);
            emit(out, format_args!("TX clock: {hz} Hz\n"))
        }
        "rxthresh" => {
            let mv = args.number()?;
            args.finish()?;
            inj.set_rx_threshold(mv);
            emit(out, format_args!("RX threshold: {mv} mV\n"))
        }
        "cc" => {
            args.finish()?;
            let (cc1, cc2) = inj.cc_mv();
            let pol = cc_name(inj.polarity());
            emit(
                out,
                format_args!(
                    "CC1 = {cc1} mV, CC2 = {cc2} mV, polarity CC{pol}\n"
                ),
            )
        }
        "vbus" | "vconn" => {
            args.finish()?;
            let (mv, ma) = if cmd == "vbus" {
                inj.front_end_mut().vbus()
            } else {
                inj.front_end_mut().vconn()
            };
            let name = if cmd == "vbus" { "VBUS" } else { "VCONN" };
            emit(out, format_args!("{name} = {mv} mV, {ma} mA\n"))
        }
        "sink" => {
            args.finish()?;
            inj.set_resistor(Cc::Cc1, Resistor::Rd);
            inj.set_resistor(Cc::Cc2, Resistor::Rd);
            let cc = inj.detect_polarity()?;
            inj.set_polarity(cc);
            emit(out, format_args!("Polarity: CC{}\n", cc_name(cc)))
        }
        _ => Err(EcError::Inval),
    }
}
