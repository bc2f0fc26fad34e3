//! Immutable profiler configuration, resolved once before the first timer.

use crate::error::Error;
use crate::report::ReportOptions;

/// Settings a [`Profiler`](crate::Profiler) is built with.
///
/// Timers at a granularity above `granularity_threshold` are inert. A
/// threshold of `0` disables every timer, since the default granularity is 1.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct TimerConfig {
    pub granularity_threshold: u32,
    pub overhead_measurement: bool,
    pub variance_stats: bool,
    /// Number of threads expected to time concurrently. Sizes the register
    /// pool in concurrent mode; ignored in single-threaded mode.
    pub expected_thread_count: Option<usize>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            granularity_threshold: 1,
            overhead_measurement: false,
            variance_stats: false,
            expected_thread_count: None,
        }
    }
}

impl TimerConfig {
    pub fn with_granularity(mut self, threshold: u32) -> Self {
        self.granularity_threshold = threshold;
        self
    }

    pub fn with_overhead(mut self, on: bool) -> Self {
        self.overhead_measurement = on;
        self
    }

    pub fn with_variance(mut self, on: bool) -> Self {
        self.variance_stats = on;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.expected_thread_count = Some(threads);
        self
    }

    /// Whether a timer of granularity `level` records.
    #[inline(always)]
    pub fn is_on_duty(&self, level: u32) -> bool {
        level <= self.granularity_threshold
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            overhead: self.overhead_measurement,
            variance: self.variance_stats,
        }
    }

    /// Defaults overlaid with `TEMPO_GRANULARITY`, `TEMPO_OVERHEAD`,
    /// `TEMPO_STATS` and `TEMPO_THREADS`.
    pub fn from_env() -> Result<Self, Error> {
        Self::default().overlay_env()
    }

    /// Overlay whichever `TEMPO_*` variables are set onto `self`.
    pub fn overlay_env(self) -> Result<Self, Error> {
        self.overlay(|var| std::env::var(var).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(v) = lookup("TEMPO_GRANULARITY") {
            self.granularity_threshold = parse_num("TEMPO_GRANULARITY", &v)?;
        }
        if let Some(v) = lookup("TEMPO_OVERHEAD") {
            self.overhead_measurement = parse_flag("TEMPO_OVERHEAD", &v)?;
        }
        if let Some(v) = lookup("TEMPO_STATS") {
            self.variance_stats = parse_flag("TEMPO_STATS", &v)?;
        }
        if let Some(v) = lookup("TEMPO_THREADS") {
            let threads: usize = parse_num("TEMPO_THREADS", &v)?;
            if threads == 0 {
                return Err(Error::ThreadCountZero);
            }
            self.expected_thread_count = Some(threads);
        }
        Ok(self)
    }
}

fn parse_num<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        var,
        value: value.to_owned(),
    })
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::InvalidConfig {
            var,
            value: value.to_owned(),
        }),
    }
}
