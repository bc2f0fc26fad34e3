use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tempo::calibrate;
use tempo::config::{self, Overrides};
use tempo::error::Error;
use tempo::workload::{self, DemoOptions};
use tempo_runtime::{CycleClock, MonotonicClock, Profiler, Record};

#[derive(Parser)]
#[command(
    name = "tempo",
    about = "Hierarchical scoped wall-clock timers",
    version
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence when set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the nested demo workload and print its scope tree.
    Demo {
        /// Threads running the workload, main thread included.
        #[arg(long)]
        threads: Option<usize>,

        /// Times the workload repeats under the `main` scope.
        #[arg(long, default_value_t = 1)]
        loops: u32,

        /// Write the report to FILE instead of stdout.
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Emit the merged records as JSON instead of the text tree.
        #[arg(long)]
        json: bool,

        /// TOML file with timer settings.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Highest granularity level that records (0 disables every timer).
        #[arg(long, short)]
        granularity: Option<u32>,

        /// Measure and report each timer's own cost.
        #[arg(long)]
        overhead: bool,

        /// Track mean, RMS deviation and maximum per scope.
        #[arg(long)]
        stats: bool,
    },
    /// Characterise a clock: resolution, read latency and timer overhead.
    Clock {
        /// Samples per measurement.
        #[arg(long, default_value_t = 100_000)]
        loops: u32,

        /// Time source to characterise.
        #[arg(long, value_enum, default_value_t = ClockKind::Monotonic)]
        clock: ClockKind,

        /// Print the totals as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClockKind {
    Monotonic,
    Cycle,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Demo {
            threads,
            loops,
            output,
            json,
            config,
            granularity,
            overhead,
            stats,
        } => {
            let overrides = Overrides {
                granularity,
                overhead,
                stats,
                threads,
            };
            cmd_demo(loops, output.as_deref(), json, config.as_deref(), &overrides)
        }
        Commands::Clock { loops, clock, json } => cmd_clock(loops, clock, json),
    }
}

fn cmd_demo(
    loops: u32,
    output: Option<&Path>,
    json: bool,
    config_file: Option<&Path>,
    overrides: &Overrides,
) -> Result<(), Error> {
    let config = config::resolve(config_file, overrides)?;
    let threads = config.expected_thread_count.unwrap_or(1);
    let options = DemoOptions { threads, loops };
    options.validate()?;

    let profiler = if threads > 1 {
        Profiler::concurrent(config)?
    } else {
        Profiler::new(config)
    };
    workload::run(&profiler, options)?;

    let mut buf = Vec::new();
    if json {
        let register = profiler.snapshot()?;
        let scopes: BTreeMap<&str, &Record> = register.iter().collect();
        serde_json::to_writer_pretty(&mut buf, &scopes)?;
        buf.push(b'\n');
    } else {
        profiler.write_report(&mut buf)?;
    }
    emit(&buf, output)
}

fn cmd_clock(loops: u32, kind: ClockKind, json: bool) -> Result<(), Error> {
    let report = match kind {
        ClockKind::Monotonic => calibrate::measure(MonotonicClock, loops)?,
        ClockKind::Cycle => calibrate::measure(CycleClock::calibrated(), loops)?,
    };
    if json {
        anstream::println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        anstream::print!("{report}");
    }
    Ok(())
}

fn emit(bytes: &[u8], output: Option<&Path>) -> Result<(), Error> {
    match output {
        Some(path) => {
            std::fs::write(path, bytes).map_err(|source| Error::OutputWrite {
                path: path.to_path_buf(),
                source,
            })?;
            eprintln!("wrote {}", path.display());
            Ok(())
        }
        None => {
            let mut stdout = anstream::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
