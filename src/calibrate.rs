//! Clock characterisation: how fine, how fast, and what a timer costs.

use std::fmt;

use tempo_runtime::{Clock, Profiler, TimerConfig};

use crate::error::Error;

/// Totals over `loops` iterations, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ClockReport {
    pub loops: u32,
    /// Sum of the smallest positive differences between consecutive reads.
    pub resolution_us: f64,
    /// Time spent in `loops` back-to-back reads.
    pub latency_us: f64,
    /// Sum of the wall time of `loops` empty active timers.
    pub timer_overhead_us: f64,
}

/// Measure `clock`.
///
/// The resolution loop keeps reading until it has seen `loops` positive
/// differences, so a clock that never advances never returns.
pub fn measure<C: Clock>(clock: C, loops: u32) -> Result<ClockReport, Error> {
    if loops == 0 {
        return Err(Error::InvalidArgument(
            "--loops must be at least 1".to_string(),
        ));
    }
    let profiler = Profiler::with_clock(TimerConfig::default(), clock);
    let clock = profiler.clock();

    let mut resolution = 0.0;
    let mut seen = 0;
    while seen < loops {
        let t0 = clock.now();
        let t1 = clock.now();
        let diff = clock.seconds_between(t0, t1);
        if diff > 0.0 {
            seen += 1;
            resolution += diff;
        }
    }

    let t0 = clock.now();
    for _ in 0..loops {
        std::hint::black_box(clock.now());
    }
    let latency = clock.seconds_between(t0, clock.now()).max(0.0);

    let mut timer_overhead = 0.0;
    for _ in 0..loops {
        let t0 = clock.now();
        {
            let _t = profiler.timer("main");
        }
        timer_overhead += clock.seconds_between(t0, clock.now()).max(0.0);
    }

    let report = ClockReport {
        loops,
        resolution_us: resolution * 1e6,
        latency_us: latency * 1e6,
        timer_overhead_us: timer_overhead * 1e6,
    };
    tracing::debug!(?report, "clock measured");
    Ok(report)
}

impl fmt::Display for ClockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = f64::from(self.loops);
        writeln!(f, "Measurements for {} loops", self.loops)?;
        writeln!(f)?;
        writeln!(f, " Resolution     : {:.6} us", self.resolution_us)?;
        writeln!(f, " Latency        : {:.6} us", self.latency_us)?;
        writeln!(f, " Timer Overhead : {:.6} us", self.timer_overhead_us)?;
        writeln!(f)?;
        writeln!(f, "Measurements per loop")?;
        writeln!(f)?;
        writeln!(f, " Resolution     : {:.6} us", self.resolution_us / n)?;
        writeln!(f, " Latency        : {:.6} us", self.latency_us / n)?;
        writeln!(f, " Timer Overhead : {:.6} us", self.timer_overhead_us / n)
    }
}
