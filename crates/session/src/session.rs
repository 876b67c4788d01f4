use counters::{CounterSource, Counters, SourceConfig};
use log::debug;

use crate::precision::narrow_to_double;
use crate::reading::{CounterKind, CounterReading, Slot};
use crate::Error;

/// A measurement session: one counter source and a start/stop reading pair.
///
/// Construction resets the counters; [`done`](Session::done) releases the
/// source. Readings are overwritten in place by every
/// [`measure`](Session::measure), so callers copy out what they need before
/// the next pair.
pub struct Session<S: CounterSource = Counters> {
    source: S,
    readings: [CounterReading; 2],
    core_count: usize,
}

impl Session<Counters> {
    /// Open the counter source described by `config` and start a session on it.
    pub fn open(config: &SourceConfig) -> Result<Self, Error> {
        Self::init(Counters::open(config)?)
    }
}

impl<S: CounterSource> Session<S> {
    /// Start a session on an already-open source.
    pub fn init(mut source: S) -> Result<Self, Error> {
        let core_count = source.core_count();
        source.reset()?;
        debug!("measurement session ready on {} cores", core_count);

        Ok(Self {
            source,
            readings: [
                CounterReading::with_cores(core_count),
                CounterReading::with_cores(core_count),
            ],
            core_count,
        })
    }

    /// Number of cores with per-core readings. Zero for a wallclock-only source.
    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// Take a reading into `slot`.
    ///
    /// The wallclock is read on the inner edge of the measured region: last
    /// for [`Slot::Start`], first for [`Slot::Stop`]. APERF and MPERF are
    /// read back to back on both sides since they are used as a ratio.
    ///
    /// A stop reading is checked against the start reading; any counter that
    /// went backwards fails the measurement.
    pub fn measure(&mut self, slot: Slot) -> Result<(), Error> {
        let reading = &mut self.readings[slot.index()];
        match slot {
            Slot::Start => {
                for core in 0..self.core_count {
                    reading.aperf[core] = self.source.read_aperf(core)?;
                    reading.mperf[core] = self.source.read_mperf(core)?;
                    reading.cycles[core] = self.source.read_cycles(core)?;
                }
                reading.wallclock = self.source.wallclock()?;
            }
            Slot::Stop => {
                reading.wallclock = self.source.wallclock()?;
                for core in 0..self.core_count {
                    reading.cycles[core] = self.source.read_cycles(core)?;
                    reading.aperf[core] = self.source.read_aperf(core)?;
                    reading.mperf[core] = self.source.read_mperf(core)?;
                }
                self.check_monotonic()?;
            }
        }
        Ok(())
    }

    fn check_monotonic(&self) -> Result<(), Error> {
        let [start, stop] = &self.readings;

        if start.wallclock > stop.wallclock {
            return Err(Error::WallclockBackwards {
                start: start.wallclock,
                stop: stop.wallclock,
            });
        }

        for core in 0..self.core_count {
            for counter in CounterKind::ALL {
                let (a, b) = (start.counter(counter)[core], stop.counter(counter)[core]);
                if a > b {
                    return Err(Error::CounterBackwards {
                        counter,
                        core,
                        start: a,
                        stop: b,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_core(&self, core: usize) -> Result<usize, Error> {
        if core >= self.core_count {
            return Err(Error::InvalidCore {
                core: core as i64,
                count: self.core_count,
            });
        }
        Ok(core)
    }

    /// Wallclock seconds in `slot`
    pub fn wallclock(&self, slot: Slot) -> f64 {
        self.readings[slot.index()].wallclock
    }

    /// Value of `counter` on `core` in `slot`
    pub fn counter(&self, counter: CounterKind, slot: Slot, core: usize) -> Result<u64, Error> {
        let core = self.check_core(core)?;
        Ok(self.readings[slot.index()].counter(counter)[core])
    }

    pub fn cycles(&self, slot: Slot, core: usize) -> Result<u64, Error> {
        self.counter(CounterKind::CoreCycles, slot, core)
    }

    pub fn aperf(&self, slot: Slot, core: usize) -> Result<u64, Error> {
        self.counter(CounterKind::Aperf, slot, core)
    }

    pub fn mperf(&self, slot: Slot, core: usize) -> Result<u64, Error> {
        self.counter(CounterKind::Mperf, slot, core)
    }

    /// Like [`counter`](Session::counter), as an exactly-converted double
    pub fn counter_f64(&self, counter: CounterKind, slot: Slot, core: usize) -> Result<f64, Error> {
        narrow_to_double(self.counter(counter, slot, core)?)
    }

    pub fn cycles_f64(&self, slot: Slot, core: usize) -> Result<f64, Error> {
        self.counter_f64(CounterKind::CoreCycles, slot, core)
    }

    pub fn aperf_f64(&self, slot: Slot, core: usize) -> Result<f64, Error> {
        self.counter_f64(CounterKind::Aperf, slot, core)
    }

    pub fn mperf_f64(&self, slot: Slot, core: usize) -> Result<f64, Error> {
        self.counter_f64(CounterKind::Mperf, slot, core)
    }

    /// Elapsed wallclock seconds between the start and stop readings
    pub fn wallclock_delta(&self) -> f64 {
        self.wallclock(Slot::Stop) - self.wallclock(Slot::Start)
    }

    /// Stop minus start for `counter` on `core`
    pub fn delta(&self, counter: CounterKind, core: usize) -> Result<u64, Error> {
        let start = self.counter(counter, Slot::Start, core)?;
        let stop = self.counter(counter, Slot::Stop, core)?;
        stop.checked_sub(start).ok_or(Error::CounterBackwards {
            counter,
            core,
            start,
            stop,
        })
    }

    /// Sum of [`delta`](Session::delta) over all cores
    pub fn total_delta(&self, counter: CounterKind) -> Result<u64, Error> {
        (0..self.core_count).try_fold(0u64, |total, core| {
            total
                .checked_add(self.delta(counter, core)?)
                .ok_or(Error::CounterOverflow { counter })
        })
    }

    /// Read the live cycle counter of `core`, bypassing the reading slots
    pub fn read_cycles_now(&mut self, core: usize) -> Result<u64, Error> {
        let core = self.check_core(core)?;
        Ok(self.source.read_cycles(core)?)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// End the session, releasing every per-core handle.
    pub fn done(mut self) -> Result<(), Error> {
        self.source.close()?;
        debug!("measurement session closed");
        Ok(())
    }
}
