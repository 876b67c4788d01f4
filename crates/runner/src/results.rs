use std::io::Write;

use counters::CounterSource;
use serde::Serialize;
use session::{CounterKind, Error, Session};

/// Per-iteration deltas of one run, indexed `[counter][core][iteration]`.
///
/// Buffers are allocated up front for the whole run so recording an
/// iteration never allocates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Results {
    wallclock_times: Vec<f64>,
    core_cycle_counts: Vec<Vec<u64>>,
    aperf_counts: Vec<Vec<u64>>,
    mperf_counts: Vec<Vec<u64>>,
}

impl Results {
    pub fn new(iterations: usize, cores: usize) -> Self {
        let per_core = vec![vec![0; iterations]; cores];
        Self {
            wallclock_times: vec![0.0; iterations],
            core_cycle_counts: per_core.clone(),
            aperf_counts: per_core.clone(),
            mperf_counts: per_core,
        }
    }

    /// Copy the deltas of the session's current reading pair into iteration `i`
    pub fn record<S: CounterSource>(
        &mut self,
        i: usize,
        session: &Session<S>,
    ) -> Result<(), Error> {
        self.wallclock_times[i] = session.wallclock_delta();
        for kind in CounterKind::ALL {
            for core in 0..session.core_count() {
                let delta = session.delta(kind, core)?;
                self.counts_mut(kind)[core][i] = delta;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn wallclock_times(&self) -> &[f64] {
        &self.wallclock_times
    }

    #[cfg(test)]
    pub fn counts(&self, kind: CounterKind) -> &[Vec<u64>] {
        match kind {
            CounterKind::CoreCycles => &self.core_cycle_counts,
            CounterKind::Aperf => &self.aperf_counts,
            CounterKind::Mperf => &self.mperf_counts,
        }
    }

    fn counts_mut(&mut self, kind: CounterKind) -> &mut [Vec<u64>] {
        match kind {
            CounterKind::CoreCycles => &mut self.core_cycle_counts,
            CounterKind::Aperf => &mut self.aperf_counts,
            CounterKind::Mperf => &mut self.mperf_counts,
        }
    }

    pub fn write_json<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer(writer, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::testing::ScriptedSource;
    use session::Slot;

    #[test]
    fn test_record_copies_deltas() {
        let mut session = Session::init(ScriptedSource::new(2).with_step(7)).unwrap();
        let mut results = Results::new(3, 2);

        session.measure(Slot::Start).unwrap();
        session.measure(Slot::Stop).unwrap();
        results.record(1, &session).unwrap();

        assert_eq!(
            results.wallclock_times(),
            &[0.0, session.wallclock_delta(), 0.0]
        );
        for kind in CounterKind::ALL {
            for core in 0..2 {
                let counts = &results.counts(kind)[core];
                assert_eq!(counts[0], 0);
                assert_eq!(counts[1], session.delta(kind, core).unwrap());
                assert!(counts[1] > 0);
            }
        }
    }

    #[test]
    fn test_json_layout() {
        let mut results = Results::new(2, 1);
        results.wallclock_times = vec![1.5, 0.25];
        results.core_cycle_counts = vec![vec![10, 20]];
        results.aperf_counts = vec![vec![3, 4]];
        results.mperf_counts = vec![vec![5, 6]];

        let mut out = Vec::new();
        results.write_json(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "wallclock_times": [1.5, 0.25],
                "core_cycle_counts": [[10, 20]],
                "aperf_counts": [[3, 4]],
                "mperf_counts": [[5, 6]],
            })
        );
    }

    #[test]
    fn test_wallclock_only_layout() {
        let results = Results::new(4, 0);
        assert_eq!(results.wallclock_times().len(), 4);
        let json = serde_json::to_string(&results).unwrap();
        assert!(json.contains("\"core_cycle_counts\":[]"));
    }
}
