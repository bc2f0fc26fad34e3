//! Pluggable time sources.
//!
//! A [`Clock`] hands out opaque instants and turns a pair of them into
//! real-valued seconds. The difference is signed: a source that steps
//! backwards yields a negative value, and the timer clamps it before it can
//! reach any accumulator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source.
pub trait Clock: Send + Sync + 'static {
    type Instant: Copy;

    fn now(&self) -> Self::Instant;

    /// Seconds from `start` to `end`. Negative if `end` precedes `start`.
    fn seconds_between(&self, start: Self::Instant, end: Self::Instant) -> f64;
}

/// `std::time::Instant` backed clock. The default for every profiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    type Instant = Instant;

    #[inline(always)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn seconds_between(&self, start: Instant, end: Instant) -> f64 {
        match end.checked_duration_since(start) {
            Some(d) => d.as_secs_f64(),
            None => -start.duration_since(end).as_secs_f64(),
        }
    }
}

/// Hardware cycle counter (TSC on x86_64, CNTVCT on aarch64).
///
/// `now()` is a single inline instruction. The tick-to-nanosecond ratio is
/// calibrated once in [`CycleClock::calibrated`] against `Instant`, which
/// costs a ~2ms spin. Counters are not guaranteed to agree across cores, so
/// tick deltas are read as signed and may come out negative.
#[derive(Debug)]
pub struct CycleClock {
    numer: u64,
    denom: u64,
}

impl CycleClock {
    pub fn calibrated() -> Self {
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            // read_counter() already returns nanoseconds.
            Self { numer: 1, denom: 1 }
        }

        #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
        {
            let wall_start = Instant::now();
            let ticks_start = read_counter();

            let target = Duration::from_millis(2);
            while wall_start.elapsed() < target {
                std::hint::spin_loop();
            }

            let ticks_end = read_counter();
            let wall_ns = wall_start.elapsed().as_nanos() as u64;
            let ticks = ticks_end.wrapping_sub(ticks_start).max(1);

            // ns = ticks * wall_ns / ticks; reduce so the product stays small.
            let g = gcd(wall_ns, ticks).max(1);
            let clock = Self {
                numer: wall_ns / g,
                denom: ticks / g,
            };
            tracing::debug!(
                numer = clock.numer,
                denom = clock.denom,
                "calibrated cycle counter"
            );
            clock
        }
    }

    /// Convert a tick count to nanoseconds using the calibrated ratio.
    #[inline]
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        (ticks as u128 * self.numer as u128 / self.denom as u128) as u64
    }
}

impl Clock for CycleClock {
    type Instant = u64;

    #[inline(always)]
    fn now(&self) -> u64 {
        read_counter()
    }

    #[inline]
    fn seconds_between(&self, start: u64, end: u64) -> f64 {
        let delta = end.wrapping_sub(start) as i64;
        let ns = self.ticks_to_ns(delta.unsigned_abs()) as f64;
        let secs = ns / 1_000_000_000.0;
        if delta < 0 {
            -secs
        } else {
            secs
        }
    }
}

#[inline(always)]
fn read_counter() -> u64 {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: rdtsc has no preconditions and is available on every x86_64 CPU.
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(target_arch = "aarch64")]
    {
        let val: u64;
        // SAFETY: cntvct_el0 is readable from EL0 on every supported OS.
        unsafe { core::arch::asm!("mrs {}, cntvct_el0", out(reg) val) };
        val
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        use std::sync::OnceLock;
        static FALLBACK_EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = FALLBACK_EPOCH.get_or_init(Instant::now);
        Instant::now().duration_since(*epoch).as_nanos() as u64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// A clock that only moves when told to.
///
/// Readings are nanoseconds since construction. Useful for deterministic
/// tests and for replaying recorded timelines.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Move the reading to an absolute value, possibly backwards.
    pub fn set(&self, ns: u64) {
        self.now_ns.store(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn seconds_between(&self, start: u64, end: u64) -> f64 {
        (end as f64 - start as f64) / 1_000_000_000.0
    }
}
