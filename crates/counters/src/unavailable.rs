use crate::{CounterSource, Error};

/// Wallclock-only source with no hardware counters.
///
/// It reports zero cores, so a session over it never reads a hardware
/// counter. A direct read is an error rather than a zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl CounterSource for Unavailable {
    fn core_count(&self) -> usize {
        0
    }

    fn reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn read_cycles(&mut self, _core: usize) -> Result<u64, Error> {
        Err(Error::Unavailable("core cycles"))
    }

    fn read_aperf(&mut self, _core: usize) -> Result<u64, Error> {
        Err(Error::Unavailable("aperf"))
    }

    fn read_mperf(&mut self, _core: usize) -> Result<u64, Error> {
        Err(Error::Unavailable("mperf"))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_fail_loudly() {
        let mut source = Unavailable;
        assert!(matches!(
            source.read_cycles(0),
            Err(Error::Unavailable("core cycles"))
        ));
        assert!(matches!(
            source.read_aperf(0),
            Err(Error::Unavailable("aperf"))
        ));
        assert!(matches!(
            source.read_mperf(0),
            Err(Error::Unavailable("mperf"))
        ));
    }

    #[test]
    fn test_wallclock_still_works() {
        let mut source = Unavailable;
        let t1 = source.wallclock().unwrap();
        let t2 = source.wallclock().unwrap();
        assert!(t2 >= t1);
    }
}
