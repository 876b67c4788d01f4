//! # session
//!
//! Paired start/stop measurements over a [`CounterSource`].
//!
//! A [`Session`] owns the counter source for its whole lifetime and two
//! reading slots. [`Session::measure`] overwrites one slot in
//! place. Taking the stop slot also checks that every counter moved forward
//! since the start slot.
//!
//! ```
//! use counters::{SourceConfig, SourceKind, Counters};
//! use session::{Session, Slot};
//!
//! let config = SourceConfig { kind: SourceKind::None, ..SourceConfig::default() };
//! let mut session = Session::init(Counters::open(&config)?)?;
//!
//! session.measure(Slot::Start)?;
//! // ... measured work ...
//! session.measure(Slot::Stop)?;
//! assert!(session.wallclock_delta() >= 0.0);
//!
//! session.done()?;
//! # Ok::<(), session::Error>(())
//! ```
//!
//! [`CounterSource`]: counters::CounterSource

mod error;
mod precision;
mod reading;
mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, ErrorKind};
pub use precision::narrow_to_double;
pub use reading::{CounterKind, Slot};
pub use session::Session;
