//! Layered profiler configuration for the CLI.
//!
//! Later layers win: built-in defaults, then the TOML file given with
//! `--config`, then `TEMPO_*` environment variables, then explicit flags.

use std::path::Path;

use tempo_runtime::TimerConfig;

use crate::error::Error;

/// Settings given directly on the command line. `None`/`false` leaves the
/// lower layers untouched.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub granularity: Option<u32>,
    pub overhead: bool,
    pub stats: bool,
    pub threads: Option<usize>,
}

/// Resolve the configuration from every layer.
pub fn resolve(file: Option<&Path>, overrides: &Overrides) -> Result<TimerConfig, Error> {
    let layered = match file {
        Some(path) => load_file(path)?.overlay_env()?,
        None => TimerConfig::from_env()?,
    };
    let config = apply(layered, overrides)?;
    tracing::debug!(?config, "resolved timer config");
    Ok(config)
}

/// Parse a TOML config file. Every key is optional:
///
/// ```toml
/// granularity_threshold = 3
/// overhead_measurement = true
/// variance_stats = false
/// expected_thread_count = 4
/// ```
pub fn load_file(path: &Path) -> Result<TimerConfig, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse(text: &str) -> Result<TimerConfig, toml_edit::de::Error> {
    toml_edit::de::from_str(text)
}

fn apply(mut config: TimerConfig, overrides: &Overrides) -> Result<TimerConfig, Error> {
    if let Some(g) = overrides.granularity {
        config.granularity_threshold = g;
    }
    if overrides.overhead {
        config.overhead_measurement = true;
    }
    if overrides.stats {
        config.variance_stats = true;
    }
    match overrides.threads {
        Some(0) => return Err(tempo_runtime::Error::ThreadCountZero.into()),
        Some(n) => config.expected_thread_count = Some(n),
        None => {}
    }
    Ok(config)
}
