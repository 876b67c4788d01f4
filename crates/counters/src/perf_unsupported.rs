use crate::{CounterSource, Error};

/// `perf_event_open(2)` is Linux-only; opening always fails elsewhere.
#[derive(Debug)]
pub struct PerfSource {
    _private: (),
}

impl PerfSource {
    pub fn open() -> Result<Self, Error> {
        Err(Error::Unsupported(
            "perf_event_open is only available on Linux".to_string(),
        ))
    }
}

impl CounterSource for PerfSource {
    fn core_count(&self) -> usize {
        0
    }

    fn reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn read_cycles(&mut self, _core: usize) -> Result<u64, Error> {
        Err(Error::Unsupported("perf_event_open".to_string()))
    }

    fn read_aperf(&mut self, _core: usize) -> Result<u64, Error> {
        Err(Error::Unsupported("perf_event_open".to_string()))
    }

    fn read_mperf(&mut self, _core: usize) -> Result<u64, Error> {
        Err(Error::Unsupported("perf_event_open".to_string()))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
