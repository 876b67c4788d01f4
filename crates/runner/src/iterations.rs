use std::io::{self, Write};

use counters::CounterSource;
use log::{debug, warn};
use session::{CounterKind, Session, Slot};
use thiserror::Error;

use crate::benchmark::Benchmark;
use crate::results::Results;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error("failed to write instrumentation marker: {0}")]
    Marker(#[source] io::Error),
}

/// Drives a benchmark for a fixed number of iterations, measuring each one.
pub struct IterationRunner<B> {
    benchmark: B,
    iterations: usize,
    param: i32,
    markers: Option<Box<dyn Write>>,
}

impl<B: Benchmark> IterationRunner<B> {
    pub fn new(benchmark: B, iterations: usize, param: i32) -> Self {
        Self {
            benchmark,
            iterations,
            param,
            markers: None,
        }
    }

    /// Write an end-of-iteration marker line to `sink` after every iteration
    pub fn with_markers(self, sink: Box<dyn Write>) -> Self {
        Self {
            markers: Some(sink),
            ..self
        }
    }

    /// Run every iteration on `session`, then end the session.
    ///
    /// The session is closed and the benchmark dropped whether or not the
    /// run succeeds. A failed run returns no results.
    pub fn run<S: CounterSource>(mut self, mut session: Session<S>) -> Result<Results, RunError> {
        let outcome = self.iterate(&mut session);
        let closed = session.done();
        match (outcome, closed) {
            (Ok(results), Ok(())) => Ok(results),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("failed to close measurement session: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn iterate<S: CounterSource>(
        &mut self,
        session: &mut Session<S>,
    ) -> Result<Results, RunError> {
        let mut results = Results::new(self.iterations, session.core_count());

        for i in 0..self.iterations {
            debug!("[iterations_runner] iteration {}/{}", i + 1, self.iterations);

            session.measure(Slot::Start)?;
            self.benchmark.run_iter(self.param);
            session.measure(Slot::Stop)?;

            results.record(i, session)?;
            let cycles = session.total_delta(CounterKind::CoreCycles)?;
            debug!(
                "[iterations_runner] iteration {} took {:.6}s, {} core cycles",
                i + 1,
                session.wallclock_delta(),
                cycles
            );

            if let Some(markers) = self.markers.as_mut() {
                writeln!(markers, "@@@ END_IN_PROC_ITER: {}", i)
                    .and_then(|()| markers.flush())
                    .map_err(RunError::Marker)?;
            }
        }
        Ok(results)
    }
}
