//! A scripted [`CounterSource`] for tests that need counters without
//! hardware.
//!
//! Every counter starts at zero and advances by a fixed step on each read;
//! the clock starts at 100s and advances by half a second per read. Every
//! access is logged so tests can assert the exact read order.

use std::io;

use counters::{CounterSource, Error};

use crate::reading::CounterKind;

/// One access made to a [`ScriptedSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Reset,
    Wallclock,
    Read(CounterKind, usize),
    Close,
}

#[derive(Debug)]
pub struct ScriptedSource {
    cores: usize,
    clock: f64,
    clock_step: f64,
    values: [Vec<u64>; 3],
    step: u64,
    log: Vec<Access>,
    fail_on: Option<Access>,
    close_calls: usize,
}

fn index(kind: CounterKind) -> usize {
    match kind {
        CounterKind::CoreCycles => 0,
        CounterKind::Aperf => 1,
        CounterKind::Mperf => 2,
    }
}

impl ScriptedSource {
    pub fn new(cores: usize) -> Self {
        Self {
            cores,
            clock: 100.0,
            clock_step: 0.5,
            values: [vec![0; cores], vec![0; cores], vec![0; cores]],
            step: 10,
            log: Vec::new(),
            fail_on: None,
            close_calls: 0,
        }
    }

    /// Amount every counter advances per read
    pub fn with_step(self, step: u64) -> Self {
        Self { step, ..self }
    }

    /// Make `access` fail every time it happens
    pub fn fail_on(self, access: Access) -> Self {
        Self {
            fail_on: Some(access),
            ..self
        }
    }

    /// Value returned by the next read of `kind` on `core`
    pub fn set(&mut self, kind: CounterKind, core: usize, value: u64) {
        self.values[index(kind)][core] = value;
    }

    /// Value returned by the next wallclock read
    pub fn set_clock(&mut self, seconds: f64) {
        self.clock = seconds;
    }

    pub fn log(&self) -> &[Access] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls
    }

    fn record(&mut self, access: Access) -> Result<(), Error> {
        self.log.push(access);
        if self.fail_on == Some(access) {
            return Err(Error::Read {
                core: 0,
                what: "scripted",
                source: io::Error::new(io::ErrorKind::Other, format!("{:?} failed", access)),
            });
        }
        Ok(())
    }

    fn read(&mut self, kind: CounterKind, core: usize) -> Result<u64, Error> {
        self.record(Access::Read(kind, core))?;
        if core >= self.cores {
            return Err(Error::CoreOutOfRange {
                core,
                count: self.cores,
            });
        }
        let slot = &mut self.values[index(kind)][core];
        let value = *slot;
        *slot = value.saturating_add(self.step);
        Ok(value)
    }
}

impl CounterSource for ScriptedSource {
    fn core_count(&self) -> usize {
        self.cores
    }

    fn wallclock(&mut self) -> Result<f64, Error> {
        self.record(Access::Wallclock)?;
        let now = self.clock;
        self.clock += self.clock_step;
        Ok(now)
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.record(Access::Reset)
    }

    fn read_cycles(&mut self, core: usize) -> Result<u64, Error> {
        self.read(CounterKind::CoreCycles, core)
    }

    fn read_aperf(&mut self, core: usize) -> Result<u64, Error> {
        self.read(CounterKind::Aperf, core)
    }

    fn read_mperf(&mut self, core: usize) -> Result<u64, Error> {
        self.read(CounterKind::Mperf, core)
    }

    fn close(&mut self) -> Result<(), Error> {
        self.close_calls += 1;
        self.record(Access::Close)
    }
}
