use nix::time::{clock_gettime, ClockId};

use crate::Error;

// CLOCK_MONOTONIC_RAW is not subject to NTP slewing.
#[cfg(target_os = "linux")]
const MONOTONIC: ClockId = ClockId::CLOCK_MONOTONIC_RAW;
#[cfg(not(target_os = "linux"))]
const MONOTONIC: ClockId = ClockId::CLOCK_MONOTONIC;

/// Reads the monotonic clock, in seconds.
pub fn monotonic_seconds() -> Result<f64, Error> {
    let ts = clock_gettime(MONOTONIC).map_err(Error::Clock)?;
    Ok(ts.tv_sec() as f64 + ts.tv_nsec() as f64 * 1e-9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let mut last = monotonic_seconds().unwrap();
        for _ in 0..1000 {
            let now = monotonic_seconds().unwrap();
            assert!(now >= last, "clock went backwards: {} < {}", now, last);
            last = now;
        }
    }

    #[test]
    fn test_clock_advances_across_sleep() {
        let start = monotonic_seconds().unwrap();
        thread::sleep(Duration::from_millis(20));
        let elapsed = monotonic_seconds().unwrap() - start;
        assert!(elapsed >= 0.015, "elapsed {} too small", elapsed);
        assert!(elapsed < 5.0, "elapsed {} too large", elapsed);
    }
}
