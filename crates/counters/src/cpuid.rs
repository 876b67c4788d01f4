//! Architectural performance monitoring capability query (CPUID leaf 0xA).

use crate::Error;

/// Leaf 0xA fields relevant to fixed-function counter 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfMonInfo {
    /// Architectural performance monitoring version (EAX bits 0..7)
    pub version: u32,
    /// Number of fixed-function counters (EDX bits 0..4)
    pub fixed_counters: u32,
    /// Bit width of the fixed-function counters (EDX bits 5..12)
    pub fixed_width: u32,
}

impl PerfMonInfo {
    /// Decode the raw EAX and EDX registers of leaf 0xA
    pub fn decode(eax: u32, edx: u32) -> Self {
        Self {
            version: eax & 0xff,
            fixed_counters: edx & 0x1f,
            fixed_width: (edx & 0x1fe0) >> 5,
        }
    }

    /// Check that fixed counter 1 exists and return its width.
    ///
    /// Fixed-function counters appeared in version 2, and the cycle counter is
    /// the second of them.
    pub fn cycles_counter_width(&self) -> Result<u32, Error> {
        if self.version < 2 {
            return Err(Error::Unsupported(format!(
                "architectural perfmon version >= 2 is required, got {}",
                self.version
            )));
        }
        if self.fixed_counters < 2 {
            return Err(Error::Unsupported(format!(
                "too few fixed-function counters: {}",
                self.fixed_counters
            )));
        }
        Ok(self.fixed_width)
    }
}

/// Probe the CPU for the width of the fixed-function cycle counter
#[cfg(target_arch = "x86_64")]
pub fn fixed_counter_width() -> Result<u32, Error> {
    // SAFETY: cpuid is available on every x86_64 CPU; leaf 0xA returns zeros
    // on CPUs without architectural performance monitoring.
    let leaf = unsafe { std::arch::x86_64::__cpuid(0xa) };
    let info = PerfMonInfo::decode(leaf.eax, leaf.edx);
    log::debug!("cpuid leaf 0xa: {:?}", info);
    info.cycles_counter_width()
}

#[cfg(not(target_arch = "x86_64"))]
pub fn fixed_counter_width() -> Result<u32, Error> {
    Err(Error::Unsupported(
        "fixed-function counters require an x86_64 CPU".to_string(),
    ))
}

/// Mask selecting the low `width` bits of a counter value
pub fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_decode() {
        // Version 4, 3 fixed counters of 48 bits.
        let info = PerfMonInfo::decode(0x0730_8004, (48 << 5) | 3);
        assert_eq!(
            info,
            PerfMonInfo {
                version: 4,
                fixed_counters: 3,
                fixed_width: 48
            }
        );
        assert_eq!(info.cycles_counter_width().unwrap(), 48);
    }

    #[rstest]
    #[case(1, 3)]
    #[case(0, 0)]
    #[case(2, 1)]
    fn test_unsupported(#[case] version: u32, #[case] fixed_counters: u32) {
        let info = PerfMonInfo {
            version,
            fixed_counters,
            fixed_width: 48,
        };
        assert!(matches!(
            info.cycles_counter_width(),
            Err(Error::Unsupported(_))
        ));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(40, 0xff_ffff_ffff)]
    #[case(48, 0xffff_ffff_ffff)]
    #[case(64, u64::MAX)]
    fn test_width_mask(#[case] width: u32, #[case] expected: u64) {
        assert_eq!(width_mask(width), expected);
    }
}
