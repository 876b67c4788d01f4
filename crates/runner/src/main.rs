use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use counters::{SourceConfig, SourceKind, DEFAULT_MSR_NODE};
use log::debug;
use session::Session;

mod benchmark;
mod iterations;
mod results;

use benchmark::DynamicBenchmark;
use iterations::IterationRunner;

/// Run a benchmark module in-process for a fixed number of iterations,
/// printing per-iteration wallclock and counter deltas as JSON
#[derive(Debug, Parser)]
#[command(name = "iterations_runner")]
struct Command {
    /// Shared library exporting `void run_iter(int)`
    benchmark: PathBuf,

    /// Number of iterations to run
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    iterations: u32,

    /// Parameter passed unchanged to every iteration
    #[arg(allow_negative_numbers = true)]
    param: i32,

    /// Log progress and per-iteration summaries to stderr
    #[arg(short, long)]
    debug: bool,

    /// Counter source: msr, perf or none
    #[arg(long, default_value_t = SourceKind::default())]
    counters: SourceKind,

    /// Per-core MSR device node name under /dev/cpu/<core>/
    #[arg(long, default_value = DEFAULT_MSR_NODE)]
    msr_node: String,

    /// Instrumentation output directory; enables end-of-iteration markers
    #[arg(long, requires_all = ["key", "key_pexec_index"])]
    instrument_dir: Option<PathBuf>,

    /// Instrumentation key of this benchmark run
    #[arg(long, requires = "instrument_dir")]
    key: Option<String>,

    /// Process execution index of this benchmark run
    #[arg(long, requires = "instrument_dir")]
    key_pexec_index: Option<u32>,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let opts = Command::parse();
    init_logging(opts.debug);

    // Resolve the entry point before touching any counters.
    let benchmark = DynamicBenchmark::load(&opts.benchmark)
        .map_err(|e| anyhow::anyhow!("{} ({:?})", e, e.kind()))?;

    let config = SourceConfig {
        kind: opts.counters,
        msr_node: opts.msr_node.clone(),
    };
    let session = Session::open(&config)
        .with_context(|| format!("failed to open {} counter source", config.kind))?;

    let mut runner = IterationRunner::new(benchmark, opts.iterations as usize, opts.param);
    if let Some(dir) = &opts.instrument_dir {
        debug!(
            "instrumentation: dir={} key={:?} pexec_index={:?}",
            dir.display(),
            opts.key,
            opts.key_pexec_index
        );
        runner = runner.with_markers(Box::new(io::stderr()));
    }

    let results = runner.run(session)?;

    let mut stdout = io::stdout().lock();
    results
        .write_json(&mut stdout)
        .context("failed to write results")?;
    writeln!(stdout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_command_is_well_formed() {
        Command::command().debug_assert();
    }

    #[test]
    fn test_parse_positionals() {
        let opts =
            Command::try_parse_from(["iterations_runner", "libbench.so", "5", "-3"]).unwrap();
        assert_eq!(opts.benchmark, PathBuf::from("libbench.so"));
        assert_eq!(opts.iterations, 5);
        assert_eq!(opts.param, -3);
        assert!(!opts.debug);
        assert_eq!(opts.counters, SourceKind::default());
        assert_eq!(opts.msr_node, DEFAULT_MSR_NODE);
    }

    #[test]
    fn test_parse_counter_options() {
        let opts = Command::try_parse_from([
            "iterations_runner",
            "--counters",
            "perf",
            "--msr-node",
            "rmsr",
            "-d",
            "libbench.so",
            "1",
            "0",
        ])
        .unwrap();
        assert_eq!(opts.counters, SourceKind::Perf);
        assert_eq!(opts.msr_node, "rmsr");
        assert!(opts.debug);
    }

    #[rstest]
    #[case::zero_iterations(&["libbench.so", "0", "0"])]
    #[case::non_numeric_iterations(&["libbench.so", "two", "0"])]
    #[case::unknown_source(&["libbench.so", "1", "0", "--counters", "pmc"])]
    #[case::instrument_dir_alone(&["libbench.so", "1", "0", "--instrument-dir", "/tmp"])]
    #[case::key_alone(&["libbench.so", "1", "0", "--key", "k"])]
    #[case::missing_param(&["libbench.so", "1"])]
    fn test_rejects_bad_input(#[case] args: &[&str]) {
        let argv = std::iter::once("iterations_runner").chain(args.iter().copied());
        assert!(Command::try_parse_from(argv).is_err(), "{:?}", args);
    }

    #[test]
    fn test_instrumentation_args() {
        let opts = Command::try_parse_from([
            "iterations_runner",
            "libbench.so",
            "2",
            "7",
            "--instrument-dir",
            "/tmp/instr",
            "--key",
            "machine:bench:vm",
            "--key-pexec-index",
            "4",
        ])
        .unwrap();
        assert_eq!(opts.instrument_dir, Some(PathBuf::from("/tmp/instr")));
        assert_eq!(opts.key.as_deref(), Some("machine:bench:vm"));
        assert_eq!(opts.key_pexec_index, Some(4));
    }
}
