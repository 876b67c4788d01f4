//! # iterbench_rt
//!
//! A C ABI over one process-wide measurement [`Session`], for iteration
//! runners hosted in other language runtimes.
//!
//! Every export takes and returns primitive types only, so foreign-function
//! bindings can be generated mechanically. Any failure (out-of-range slot or
//! core, a counter going backwards, precision loss in a `_double` accessor,
//! use before `ib_init` or after `ib_done`) is logged and terminates the
//! process with a failure status; no export ever returns a value it cannot
//! vouch for.
//!
//! The counter source is selected with `IB_COUNTERS` (`msr`, `perf` or
//! `none`) and, for `msr`, the device node name with `IB_MSR_NODE`.

use std::os::raw::c_int;
use std::process;
use std::sync::{Mutex, MutexGuard};

use counters::{Counters, SourceConfig};
use log::{debug, error};
use session::{CounterKind, Error, Session, Slot};

const ENV_COUNTERS: &str = "IB_COUNTERS";
const ENV_MSR_NODE: &str = "IB_MSR_NODE";

enum State {
    Uninit,
    Ready(Session<Counters>),
    Closed,
}

static STATE: Mutex<State> = Mutex::new(State::Uninit);

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("warn");
    // The host may already have installed a logger.
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn fatal(err: &Error) -> ! {
    init_logging();
    error!("{} ({:?})", err, err.kind());
    process::exit(1);
}

fn lock() -> MutexGuard<'static, State> {
    STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build the source configuration from `lookup`, normally the environment
fn config_from(lookup: impl Fn(&str) -> Option<String>) -> Result<SourceConfig, Error> {
    let mut config = SourceConfig::default();
    if let Some(kind) = lookup(ENV_COUNTERS) {
        config.kind = kind
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", ENV_COUNTERS, e)))?;
    }
    if let Some(node) = lookup(ENV_MSR_NODE) {
        if node.is_empty() || node.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "{}: {:?} is not a device node name",
                ENV_MSR_NODE, node
            )));
        }
        config.msr_node = node;
    }
    Ok(config)
}

fn slot_from(slot: c_int) -> Result<Slot, Error> {
    Slot::try_from(slot)
}

fn core_from(core: c_int, count: usize) -> Result<usize, Error> {
    usize::try_from(core).map_err(|_| Error::InvalidCore {
        core: core as i64,
        count,
    })
}

fn init_with(config: &SourceConfig) -> Result<(), Error> {
    let mut state = lock();
    match *state {
        State::Uninit => {}
        State::Ready(_) => return Err(Error::InvalidState("already initialised")),
        State::Closed => return Err(Error::InvalidState("already closed")),
    }
    *state = State::Ready(Session::open(config)?);
    Ok(())
}

fn done() -> Result<(), Error> {
    let mut state = lock();
    match std::mem::replace(&mut *state, State::Closed) {
        State::Ready(session) => session.done(),
        State::Uninit => Err(Error::InvalidState("not initialised")),
        State::Closed => Err(Error::InvalidState("already closed")),
    }
}

/// Run `f` against the live session; anything else is fatal
fn with_session<T>(f: impl FnOnce(&mut Session<Counters>) -> Result<T, Error>) -> T {
    let mut state = lock();
    let result = match &mut *state {
        State::Ready(session) => f(session),
        State::Uninit => Err(Error::InvalidState("not initialised")),
        State::Closed => Err(Error::InvalidState("closed")),
    };
    result.unwrap_or_else(|e| fatal(&e))
}

fn get_counter(kind: CounterKind, slot: c_int, core: c_int) -> u64 {
    with_session(|s| {
        let slot = slot_from(slot)?;
        let core = core_from(core, s.core_count())?;
        s.counter(kind, slot, core)
    })
}

fn get_counter_double(kind: CounterKind, slot: c_int, core: c_int) -> f64 {
    with_session(|s| {
        let slot = slot_from(slot)?;
        let core = core_from(core, s.core_count())?;
        s.counter_f64(kind, slot, core)
    })
}

/// Open the counter source and reset the counters.
#[no_mangle]
pub extern "C" fn ib_init() {
    init_logging();
    let result = config_from(|key| std::env::var(key).ok()).and_then(|config| {
        debug!("initialising with {:?}", config);
        init_with(&config)
    });
    if let Err(e) = result {
        fatal(&e);
    }
}

/// Release the counter source. The session cannot be used afterwards.
#[no_mangle]
pub extern "C" fn ib_done() {
    if let Err(e) = done() {
        fatal(&e);
    }
}

/// Take a reading into slot 0 (start) or 1 (stop).
#[no_mangle]
pub extern "C" fn ib_measure(slot: c_int) {
    with_session(|s| s.measure(slot_from(slot)?))
}

#[no_mangle]
pub extern "C" fn ib_get_wallclock(slot: c_int) -> f64 {
    with_session(|s| Ok(s.wallclock(slot_from(slot)?)))
}

#[no_mangle]
pub extern "C" fn ib_get_core_cycles(slot: c_int, core: c_int) -> u64 {
    get_counter(CounterKind::CoreCycles, slot, core)
}

#[no_mangle]
pub extern "C" fn ib_get_aperf(slot: c_int, core: c_int) -> u64 {
    get_counter(CounterKind::Aperf, slot, core)
}

#[no_mangle]
pub extern "C" fn ib_get_mperf(slot: c_int, core: c_int) -> u64 {
    get_counter(CounterKind::Mperf, slot, core)
}

#[no_mangle]
pub extern "C" fn ib_get_core_cycles_double(slot: c_int, core: c_int) -> f64 {
    get_counter_double(CounterKind::CoreCycles, slot, core)
}

#[no_mangle]
pub extern "C" fn ib_get_aperf_double(slot: c_int, core: c_int) -> f64 {
    get_counter_double(CounterKind::Aperf, slot, core)
}

#[no_mangle]
pub extern "C" fn ib_get_mperf_double(slot: c_int, core: c_int) -> f64 {
    get_counter_double(CounterKind::Mperf, slot, core)
}

/// Number of cores with per-core readings
#[no_mangle]
pub extern "C" fn ib_get_num_cores() -> c_int {
    with_session(|s| {
        c_int::try_from(s.core_count())
            .map_err(|_| Error::InvalidState("core count exceeds c_int"))
    })
}

/// Exact u64 to double conversion for runtimes without a 64-bit integer
#[no_mangle]
pub extern "C" fn ib_u64_to_double(value: u64) -> f64 {
    session::narrow_to_double(value).unwrap_or_else(|e| fatal(&e))
}

/// Seconds on the monotonic clock. Usable without a session.
#[no_mangle]
pub extern "C" fn ib_clock_gettime_monotonic() -> f64 {
    counters::monotonic_seconds().unwrap_or_else(|e| fatal(&Error::from(e)))
}

/// Read the live cycle counter of `core`, outside of any reading slot
#[no_mangle]
pub extern "C" fn ib_read_core_cycles(core: c_int) -> u64 {
    with_session(|s| {
        let core = core_from(core, s.core_count())?;
        s.read_cycles_now(core)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use counters::SourceKind;
    use session::ErrorKind;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = config_from(lookup(&[])).unwrap();
        assert_eq!(config, SourceConfig::default());
    }

    #[test]
    fn test_config_from_env() {
        let config =
            config_from(lookup(&[(ENV_COUNTERS, "perf"), (ENV_MSR_NODE, "rmsr")])).unwrap();
        assert_eq!(config.kind, SourceKind::Perf);
        assert_eq!(config.msr_node, "rmsr");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        for vars in [
            vec![(ENV_COUNTERS, "pmc")],
            vec![(ENV_MSR_NODE, "")],
            vec![(ENV_MSR_NODE, "../msr")],
        ] {
            let err = config_from(lookup(&vars)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_argument_conversion() {
        assert_eq!(slot_from(0).unwrap(), Slot::Start);
        assert_eq!(slot_from(1).unwrap(), Slot::Stop);
        assert_eq!(
            slot_from(2).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(core_from(3, 4).unwrap(), 3);
        assert!(matches!(
            core_from(-1, 4),
            Err(Error::InvalidCore { core: -1, count: 4 })
        ));
    }

    #[test]
    fn test_u64_to_double() {
        assert_eq!(ib_u64_to_double(666), 666.0);
    }

    // The session is process-wide, so the whole lifecycle lives in one test.
    #[test]
    fn test_wallclock_only_lifecycle() {
        let config = SourceConfig {
            kind: SourceKind::None,
            ..SourceConfig::default()
        };
        init_with(&config).unwrap();
        assert_eq!(
            init_with(&config).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        assert_eq!(ib_get_num_cores(), 0);
        ib_measure(0);
        ib_measure(1);
        assert!(ib_get_wallclock(1) >= ib_get_wallclock(0));

        done().unwrap();
        assert_eq!(done().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(
            init_with(&config).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert!(ib_clock_gettime_monotonic() > 0.0);
    }
}
