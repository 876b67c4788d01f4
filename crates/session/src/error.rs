use thiserror::Error;

use crate::reading::CounterKind;

/// Failure categories. Every one of them is fatal for a measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A counter device, syscall, module or symbol is missing or inaccessible
    ResourceUnavailable,
    /// Out-of-range slot or core index, or malformed configuration
    InvalidArgument,
    /// A stop reading is smaller than its start reading
    MonotonicityViolation,
    /// A counter value cannot be represented exactly as a double
    PrecisionLoss,
    /// Arithmetic on counter values exceeds 64 bits
    CounterOverflow,
    /// The session was used before initialisation or after teardown
    InvalidState,
}

/// Errors produced by a measurement session
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Counter(#[from] counters::Error),

    #[error("slot {0} is out of range (expected 0 or 1)")]
    InvalidSlot(i64),

    #[error("core {core} is out of range (cores: {count})")]
    InvalidCore { core: i64, count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("wallclock error: start={start}, stop={stop}")]
    WallclockBackwards { start: f64, stop: f64 },

    #[error("{counter} error on core {core}: start={start}, stop={stop}")]
    CounterBackwards {
        counter: CounterKind,
        core: usize,
        start: u64,
        stop: u64,
    },

    #[error("loss of precision detected: {value} cannot be represented as a double (nearest is {nearest})")]
    PrecisionLoss { value: u64, nearest: f64 },

    #[error("{counter} total across cores overflows 64 bits")]
    CounterOverflow { counter: CounterKind },

    #[error("measurement session is {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// The failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Counter(counters::Error::CoreOutOfRange { .. }) => ErrorKind::InvalidArgument,
            Error::Counter(_) => ErrorKind::ResourceUnavailable,
            Error::InvalidSlot(_) | Error::InvalidCore { .. } | Error::InvalidConfig(_) => {
                ErrorKind::InvalidArgument
            }
            Error::WallclockBackwards { .. } | Error::CounterBackwards { .. } => {
                ErrorKind::MonotonicityViolation
            }
            Error::PrecisionLoss { .. } => ErrorKind::PrecisionLoss,
            Error::CounterOverflow { .. } => ErrorKind::CounterOverflow,
            Error::InvalidState(_) => ErrorKind::InvalidState,
        }
    }
}
