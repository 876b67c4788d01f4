//! Counter source backed by `perf_event_open(2)`.
//!
//! Core cycles use the generic hardware cycles event. APERF and MPERF come
//! from the kernel's `msr` PMU, whose dynamic type and event encodings are
//! published in sysfs. All events are CPU-wide, which needs either root or a
//! permissive `perf_event_paranoid`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::Path;

use log::debug;
use perf_event_open_sys as sys;

use crate::{check_core, cores, CounterSource, Error};

const MSR_PMU_DIR: &str = "/sys/bus/event_source/devices/msr";

/// A perf event type and config pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventSpec {
    type_: u32,
    config: u64,
}

/// Parse a sysfs event description such as `event=0x01`
fn parse_event_config(desc: &str) -> Option<u64> {
    desc.trim().split(',').find_map(|term| {
        let value = term.trim().strip_prefix("event=")?;
        match value.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => value.parse().ok(),
        }
    })
}

fn read_sysfs(path: &Path, event: &str) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| Error::PmuEvent {
        event: event.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })
}

/// Look up an event of the `msr` PMU
fn msr_pmu_event(pmu_dir: &Path, event: &str) -> Result<EventSpec, Error> {
    let type_ = read_sysfs(&pmu_dir.join("type"), event)?;
    let type_ = type_.trim().parse::<u32>().map_err(|e| Error::PmuEvent {
        event: event.to_string(),
        reason: format!("bad PMU type {:?}: {}", type_.trim(), e),
    })?;

    let desc = read_sysfs(&pmu_dir.join("events").join(event), event)?;
    let config = parse_event_config(&desc).ok_or_else(|| Error::PmuEvent {
        event: event.to_string(),
        reason: format!("cannot parse event description {:?}", desc.trim()),
    })?;

    Ok(EventSpec { type_, config })
}

/// One open, CPU-wide counting event
#[derive(Debug)]
struct PerfCounter {
    core: usize,
    what: &'static str,
    file: File,
}

impl PerfCounter {
    fn open(core: usize, what: &'static str, spec: EventSpec) -> Result<Self, Error> {
        let mut attr = sys::bindings::perf_event_attr::default();
        attr.size = std::mem::size_of::<sys::bindings::perf_event_attr>() as u32;
        attr.type_ = spec.type_;
        attr.config = spec.config;
        attr.set_disabled(1);

        let fd = unsafe {
            sys::perf_event_open(
                &mut attr,
                -1, // pid (all threads)
                core as i32,
                -1, // group_fd
                sys::bindings::PERF_FLAG_FD_CLOEXEC as u64,
            )
        };
        if fd < 0 {
            return Err(Error::Open {
                core,
                path: format!("perf_event_open({})", what).into(),
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: fd was just returned by perf_event_open and is owned here.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self { core, what, file })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn read(&self) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        let mut file = &self.file;
        file.read_exact(&mut buf).map_err(|source| Error::Read {
            core: self.core,
            what: self.what,
            source,
        })?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn reset_and_enable(&self) -> Result<(), Error> {
        let write_err = |source| Error::Write {
            core: self.core,
            what: self.what,
            source,
        };
        if unsafe { sys::ioctls::RESET(self.fd(), 0) } < 0 {
            return Err(write_err(io::Error::last_os_error()));
        }
        if unsafe { sys::ioctls::ENABLE(self.fd(), 0) } < 0 {
            return Err(write_err(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn close(self) -> Result<(), Error> {
        let core = self.core;
        nix::unistd::close(self.file.into_raw_fd()).map_err(|source| Error::Close { core, source })
    }
}

/// The three events of one core
#[derive(Debug)]
struct PerfCore {
    cycles: PerfCounter,
    aperf: PerfCounter,
    mperf: PerfCounter,
}

/// Reads core cycles, APERF and MPERF through CPU-wide perf events
#[derive(Debug)]
pub struct PerfSource {
    cores: Vec<PerfCore>,
}

impl PerfSource {
    /// Open the cycles, APERF and MPERF events on every online core.
    pub fn open() -> Result<Self, Error> {
        let pmu_dir = Path::new(MSR_PMU_DIR);
        let cycles = EventSpec {
            type_: sys::bindings::PERF_TYPE_HARDWARE,
            config: sys::bindings::PERF_COUNT_HW_CPU_CYCLES as u64,
        };
        let aperf = msr_pmu_event(pmu_dir, "aperf")?;
        let mperf = msr_pmu_event(pmu_dir, "mperf")?;
        debug!("msr PMU events: aperf={:?} mperf={:?}", aperf, mperf);

        let count = cores::discover_cores()?;
        let cores = (0..count)
            .map(|core| {
                Ok(PerfCore {
                    cycles: PerfCounter::open(core, "core cycles", cycles)?,
                    aperf: PerfCounter::open(core, "aperf", aperf)?,
                    mperf: PerfCounter::open(core, "mperf", mperf)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        debug!("opened perf events on {} cores", cores.len());
        Ok(Self { cores })
    }

    fn core(&self, core: usize) -> Result<&PerfCore, Error> {
        check_core(core, self.cores.len())?;
        Ok(&self.cores[core])
    }
}

impl CounterSource for PerfSource {
    fn core_count(&self) -> usize {
        self.cores.len()
    }

    fn reset(&mut self) -> Result<(), Error> {
        for core in &self.cores {
            core.cycles.reset_and_enable()?;
            core.aperf.reset_and_enable()?;
            core.mperf.reset_and_enable()?;
        }
        Ok(())
    }

    fn read_cycles(&mut self, core: usize) -> Result<u64, Error> {
        self.core(core)?.cycles.read()
    }

    fn read_aperf(&mut self, core: usize) -> Result<u64, Error> {
        let aperf = &self.core(core)?.aperf;
        // Throwaway read, see MsrSource::read_aperf.
        aperf.read()?;
        aperf.read()
    }

    fn read_mperf(&mut self, core: usize) -> Result<u64, Error> {
        self.core(core)?.mperf.read()
    }

    fn close(&mut self) -> Result<(), Error> {
        let mut first_err = None;
        for core in self.cores.drain(..) {
            for counter in [core.cycles, core.aperf, core.mperf] {
                if let Err(e) = counter.close() {
                    first_err.get_or_insert(e);
                }
            }
        }
        debug!("closed perf events");
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[rstest]
    #[case("event=0x01\n", Some(1))]
    #[case("event=0x02", Some(2))]
    #[case("event=0x2a,umask=0x1", Some(0x2a))]
    #[case("umask=0x1, event=7", Some(7))]
    #[case("config=0x01", None)]
    #[case("event=0xzz", None)]
    #[case("", None)]
    fn test_parse_event_config(#[case] desc: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_event_config(desc), expected);
    }

    #[test]
    fn test_msr_pmu_event_from_sysfs_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("events")).unwrap();
        fs::write(dir.path().join("type"), "14\n").unwrap();
        fs::write(dir.path().join("events").join("aperf"), "event=0x01\n").unwrap();

        let spec = msr_pmu_event(dir.path(), "aperf").unwrap();
        assert_eq!(
            spec,
            EventSpec {
                type_: 14,
                config: 1
            }
        );

        match msr_pmu_event(dir.path(), "mperf") {
            Err(Error::PmuEvent { event, .. }) => assert_eq!(event, "mperf"),
            other => panic!("expected PmuEvent error, got {:?}", other),
        }
    }

    /// A counter whose successive reads return `values`, like a perf fd
    /// read sequentially
    fn scripted_counter(what: &'static str, values: &[u64]) -> (PerfCounter, NamedTempFile) {
        let mut backing = NamedTempFile::new().unwrap();
        for value in values {
            backing.write_all(&value.to_ne_bytes()).unwrap();
        }
        let file = backing.reopen().unwrap();
        (PerfCounter { core: 0, what, file }, backing)
    }

    #[test]
    fn test_aperf_discards_first_read() {
        let (cycles, _c) = scripted_counter("core cycles", &[100, 200]);
        let (aperf, _a) = scripted_counter("aperf", &[5, 77]);
        let (mperf, _m) = scripted_counter("mperf", &[88, 99]);
        let mut source = PerfSource {
            cores: vec![PerfCore {
                cycles,
                aperf,
                mperf,
            }],
        };

        assert_eq!(source.read_aperf(0).unwrap(), 77);
        assert_eq!(source.read_mperf(0).unwrap(), 88);
        assert_eq!(source.read_cycles(0).unwrap(), 100);

        // Both APERF values are used up.
        assert!(matches!(
            source.read_aperf(0),
            Err(Error::Read { what: "aperf", .. })
        ));
        source.close().unwrap();
    }

    #[test]
    #[ignore]
    fn test_perf_counters_advance() {
        let mut source = PerfSource::open().unwrap();
        source.reset().unwrap();
        let first = source.read_cycles(0).unwrap();
        let second = source.read_cycles(0).unwrap();
        assert!(second >= first);
        source.close().unwrap();
    }
}
