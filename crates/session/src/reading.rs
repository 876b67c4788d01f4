use std::fmt;

use crate::Error;

/// One of the two reading positions of a measurement pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Start = 0,
    Stop = 1,
}

impl Slot {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<i32> for Slot {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Slot::Start),
            1 => Ok(Slot::Stop),
            _ => Err(Error::InvalidSlot(value as i64)),
        }
    }
}

/// The per-core hardware counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Unhalted core clock cycles
    CoreCycles,
    /// Actual-frequency clock count
    Aperf,
    /// Nominal-frequency clock count
    Mperf,
}

impl CounterKind {
    pub const ALL: [CounterKind; 3] = [
        CounterKind::CoreCycles,
        CounterKind::Aperf,
        CounterKind::Mperf,
    ];
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CounterKind::CoreCycles => "core_cycles",
            CounterKind::Aperf => "aperf",
            CounterKind::Mperf => "mperf",
        };
        f.write_str(name)
    }
}

/// A snapshot of the wallclock and every per-core counter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterReading {
    /// Monotonic clock, in seconds
    pub wallclock: f64,
    pub cycles: Vec<u64>,
    pub aperf: Vec<u64>,
    pub mperf: Vec<u64>,
}

impl CounterReading {
    /// A zeroed reading for `cores` cores
    pub fn with_cores(cores: usize) -> Self {
        Self {
            wallclock: 0.0,
            cycles: vec![0; cores],
            aperf: vec![0; cores],
            mperf: vec![0; cores],
        }
    }

    /// Per-core values of one counter
    pub fn counter(&self, kind: CounterKind) -> &[u64] {
        match kind {
            CounterKind::CoreCycles => &self.cycles,
            CounterKind::Aperf => &self.aperf,
            CounterKind::Mperf => &self.mperf,
        }
    }
}
