//! # counters
//!
//! Low-latency access to per-core hardware counters and the monotonic clock.
//!
//! A [`CounterSource`] owns one handle per online core, opened once and held
//! for its whole lifetime, and reads three counters from each core:
//!
//! - unhalted core cycles (fixed-function counter 1 on Intel)
//! - `IA32_APERF` (actual-frequency clock count)
//! - `IA32_MPERF` (nominal-frequency clock count)
//!
//! Three backends are available through [`Counters`]: the `msr` device nodes,
//! the `perf_event_open` syscall, and a wallclock-only source that has no
//! hardware counters at all. The backend is always chosen explicitly with
//! [`SourceKind`]; a backend that cannot be opened is an error, never a silent
//! switch to a different one.

mod clock;
mod cores;
mod cpuid;
mod msr;
#[cfg(target_os = "linux")]
mod perf;
#[cfg(not(target_os = "linux"))]
#[path = "perf_unsupported.rs"]
mod perf;
mod unavailable;

pub use clock::monotonic_seconds;
pub use cores::discover_cores;
pub use cpuid::{fixed_counter_width, width_mask, PerfMonInfo};
pub use msr::{MsrSource, Registers};
pub use perf::PerfSource;
pub use unavailable::Unavailable;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while opening, reading or closing a counter source
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to query the number of online cores: {0}")]
    CoreDiscovery(io::Error),

    #[error("clock_gettime failed: {0}")]
    Clock(nix::Error),

    #[error("failed to open {} for core {core}: {source}", .path.display())]
    Open {
        core: usize,
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to read {what} on core {core}: {source}")]
    Read {
        core: usize,
        what: &'static str,
        source: io::Error,
    },

    #[error("failed to write {what} on core {core}: {source}")]
    Write {
        core: usize,
        what: &'static str,
        source: io::Error,
    },

    #[error("failed to close counter handle for core {core}: {source}")]
    Close { core: usize, source: nix::Error },

    #[error("unsupported CPU or platform: {0}")]
    Unsupported(String),

    #[error("failed to look up perf event {event}: {reason}")]
    PmuEvent { event: String, reason: String },

    #[error("hardware counters are not available in wallclock-only mode ({0} requested)")]
    Unavailable(&'static str),

    #[error("core {core} is out of range (cores: {count})")]
    CoreOutOfRange { core: usize, count: usize },
}

/// A per-core counter backend.
///
/// Implementations must keep every per-core handle open from construction
/// until [`close`](CounterSource::close); a read is a single access to an
/// already-open handle.
pub trait CounterSource {
    /// Number of cores with an open handle. Fixed for the source's lifetime.
    fn core_count(&self) -> usize;

    /// Seconds on the monotonic clock.
    fn wallclock(&mut self) -> Result<f64, Error> {
        monotonic_seconds()
    }

    /// Configure the counters and zero them where the platform allows it.
    fn reset(&mut self) -> Result<(), Error>;

    /// Unhalted core cycles on `core`.
    fn read_cycles(&mut self, core: usize) -> Result<u64, Error>;

    /// APERF on `core`.
    fn read_aperf(&mut self, core: usize) -> Result<u64, Error>;

    /// MPERF on `core`.
    fn read_mperf(&mut self, core: usize) -> Result<u64, Error>;

    /// Release every per-core handle. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), Error>;
}

impl<T: CounterSource + ?Sized> CounterSource for &mut T {
    fn core_count(&self) -> usize {
        (**self).core_count()
    }

    fn wallclock(&mut self) -> Result<f64, Error> {
        (**self).wallclock()
    }

    fn reset(&mut self) -> Result<(), Error> {
        (**self).reset()
    }

    fn read_cycles(&mut self, core: usize) -> Result<u64, Error> {
        (**self).read_cycles(core)
    }

    fn read_aperf(&mut self, core: usize) -> Result<u64, Error> {
        (**self).read_aperf(core)
    }

    fn read_mperf(&mut self, core: usize) -> Result<u64, Error> {
        (**self).read_mperf(core)
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }
}

/// Selects the counter backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `/dev/cpu/<core>/<node>` model-specific register device nodes
    Msr,
    /// `perf_event_open(2)` CPU-wide events
    Perf,
    /// No hardware counters; wallclock only
    None,
}

impl Default for SourceKind {
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    fn default() -> Self {
        SourceKind::Msr
    }

    #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
    fn default() -> Self {
        SourceKind::None
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Msr => "msr",
            SourceKind::Perf => "perf",
            SourceKind::None => "none",
        };
        f.write_str(name)
    }
}

/// Returned when a counter backend name is not recognised
#[derive(Error, Debug, PartialEq)]
#[error("unknown counter source {0:?} (expected one of: msr, perf, none)")]
pub struct ParseSourceKindError(String);

impl FromStr for SourceKind {
    type Err = ParseSourceKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "msr" => Ok(SourceKind::Msr),
            "perf" => Ok(SourceKind::Perf),
            "none" => Ok(SourceKind::None),
            _ => Err(ParseSourceKindError(s.to_string())),
        }
    }
}

/// Default device node name under `/dev/cpu/<core>/`
pub const DEFAULT_MSR_NODE: &str = "msr";

/// Backend selection plus backend-specific settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Device node name used by [`SourceKind::Msr`]
    pub msr_node: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            msr_node: DEFAULT_MSR_NODE.to_string(),
        }
    }
}

/// The closed set of counter backends
pub enum Counters {
    DeviceNode(MsrSource),
    Syscall(PerfSource),
    Unavailable(Unavailable),
}

impl Counters {
    /// Open the backend named by `config`, with one handle per online core.
    pub fn open(config: &SourceConfig) -> Result<Self, Error> {
        log::debug!("opening {} counter source", config.kind);
        match config.kind {
            SourceKind::Msr => MsrSource::open(&config.msr_node).map(Counters::DeviceNode),
            SourceKind::Perf => PerfSource::open().map(Counters::Syscall),
            SourceKind::None => Ok(Counters::Unavailable(Unavailable)),
        }
    }

    /// The backend kind behind this source
    pub fn kind(&self) -> SourceKind {
        match self {
            Counters::DeviceNode(_) => SourceKind::Msr,
            Counters::Syscall(_) => SourceKind::Perf,
            Counters::Unavailable(_) => SourceKind::None,
        }
    }

    fn inner(&mut self) -> &mut dyn CounterSource {
        match self {
            Counters::DeviceNode(s) => s,
            Counters::Syscall(s) => s,
            Counters::Unavailable(s) => s,
        }
    }
}

impl CounterSource for Counters {
    fn core_count(&self) -> usize {
        match self {
            Counters::DeviceNode(s) => s.core_count(),
            Counters::Syscall(s) => s.core_count(),
            Counters::Unavailable(s) => s.core_count(),
        }
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.inner().reset()
    }

    fn read_cycles(&mut self, core: usize) -> Result<u64, Error> {
        self.inner().read_cycles(core)
    }

    fn read_aperf(&mut self, core: usize) -> Result<u64, Error> {
        self.inner().read_aperf(core)
    }

    fn read_mperf(&mut self, core: usize) -> Result<u64, Error> {
        self.inner().read_mperf(core)
    }

    fn close(&mut self) -> Result<(), Error> {
        self.inner().close()
    }
}

/// Check `core` against `count`
pub(crate) fn check_core(core: usize, count: usize) -> Result<(), Error> {
    if core >= count {
        return Err(Error::CoreOutOfRange { core, count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("msr", SourceKind::Msr)]
    #[case("perf", SourceKind::Perf)]
    #[case("none", SourceKind::None)]
    #[case(" PERF ", SourceKind::Perf)]
    fn test_parse_source_kind(#[case] input: &str, #[case] expected: SourceKind) {
        assert_eq!(input.parse::<SourceKind>(), Ok(expected));
    }

    #[test]
    fn test_parse_unknown_source_kind() {
        let err = "rdpmc".parse::<SourceKind>().unwrap_err();
        assert_eq!(err, ParseSourceKindError("rdpmc".to_string()));
    }

    #[test]
    fn test_display_round_trips() {
        for kind in [SourceKind::Msr, SourceKind::Perf, SourceKind::None] {
            assert_eq!(kind.to_string().parse::<SourceKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_open_unavailable() {
        let config = SourceConfig {
            kind: SourceKind::None,
            ..SourceConfig::default()
        };
        let mut counters = Counters::open(&config).unwrap();
        assert_eq!(counters.kind(), SourceKind::None);
        assert_eq!(counters.core_count(), 0);
        assert!(counters.reset().is_ok());
        assert!(matches!(
            counters.read_cycles(0),
            Err(Error::Unavailable(_))
        ));
        assert!(counters.close().is_ok());
    }

    #[test]
    fn test_check_core() {
        assert!(check_core(0, 1).is_ok());
        assert!(matches!(
            check_core(4, 4),
            Err(Error::CoreOutOfRange { core: 4, count: 4 })
        ));
    }
}
