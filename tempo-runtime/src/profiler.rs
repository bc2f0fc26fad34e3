//! Profiler state and the RAII scope timer.
//!
//! A [`Profiler`] owns the register pool and the configuration. Each thread
//! keeps, per profiler, the `::`-joined path of its open timers, the gate it
//! holds and how many timers are open. `Timer` construction appends the
//! timer's name to that path (claiming a gate when it is the thread's first
//! open timer); stopping records into the record keyed by the full path,
//! truncates the path back and releases the gate with the last open timer.
//!
//! Timers must stop in reverse order of construction. Debug builds assert
//! this; release builds silently corrupt the thread's path if it is broken.
//!
//! Reports freeze the pool: every gate is closed by the reporting thread, so
//! no writer is mid-update while the registers are copied.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::clock::{Clock, MonotonicClock};
use crate::config::TimerConfig;
use crate::consolidate::{Consolidate, MergeBySize};
use crate::error::Error;
use crate::gate::GatePool;
use crate::record::Register;
use crate::report;

const SEP: &str = "::";

static NEXT_PROFILER_ID: AtomicU64 = AtomicU64::new(1);

/// Per-thread timing state for one profiler.
struct ThreadScope {
    profiler: u64,
    path: String,
    gate: usize,
    open: u32,
}

thread_local! {
    static SCOPES: RefCell<Vec<ThreadScope>> = RefCell::new(Vec::new());
}

/// Shared measurement store for a set of scope timers.
///
/// Construct one per program (or per test) and hand it to threads by
/// reference or `Arc`. In single-threaded mode the profiler has one
/// register; a second thread opening timers waits until the first thread's
/// outermost timer closes. Concurrent mode gives every timing thread its own
/// register slot.
pub struct Profiler<C: Clock = MonotonicClock> {
    id: u64,
    config: TimerConfig,
    clock: C,
    pool: OnceLock<GatePool>,
}

impl Profiler<MonotonicClock> {
    /// Single-threaded profiler on the monotonic clock.
    pub fn new(config: TimerConfig) -> Self {
        Self::with_clock(config, MonotonicClock)
    }

    /// Concurrent profiler on the monotonic clock.
    ///
    /// The pool is sized from `config.expected_thread_count` when present,
    /// otherwise [`set_thread_count`](Self::set_thread_count) must be called
    /// before any timer opens.
    pub fn concurrent(config: TimerConfig) -> Result<Self, Error> {
        Self::concurrent_with_clock(config, MonotonicClock)
    }
}

impl<C: Clock> Profiler<C> {
    pub fn with_clock(config: TimerConfig, clock: C) -> Self {
        let pool = OnceLock::new();
        let _ = pool.set(GatePool::single());
        Self::build(config, clock, pool)
    }

    pub fn concurrent_with_clock(config: TimerConfig, clock: C) -> Result<Self, Error> {
        let pool = OnceLock::new();
        match config.expected_thread_count {
            Some(0) => return Err(Error::ThreadCountZero),
            Some(threads) => {
                let _ = pool.set(GatePool::for_threads(threads));
            }
            None => {}
        }
        Ok(Self::build(config, clock, pool))
    }

    fn build(config: TimerConfig, clock: C, pool: OnceLock<GatePool>) -> Self {
        Self {
            id: NEXT_PROFILER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            clock,
            pool,
        }
    }

    /// Size the register pool for `threads` concurrently timing threads.
    /// Returns the number of slots allocated. Can only be done once.
    pub fn set_thread_count(&self, threads: usize) -> Result<usize, Error> {
        if threads == 0 {
            return Err(Error::ThreadCountZero);
        }
        if let Some(pool) = self.pool.get() {
            return Err(Error::ThreadCountAlreadySet { slots: pool.len() });
        }
        let mut created = None;
        let pool = self.pool.get_or_init(|| {
            let pool = GatePool::for_threads(threads);
            created = Some(pool.len());
            pool
        });
        created.ok_or(Error::ThreadCountAlreadySet { slots: pool.len() })
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Number of register slots, or `None` while a concurrent profiler is
    /// still waiting for its thread count.
    pub fn slot_count(&self) -> Option<usize> {
        self.pool.get().map(GatePool::len)
    }

    /// Start timing `name` at the default granularity (1).
    #[inline]
    pub fn timer(&self, name: &str) -> Timer<'_, C> {
        self.timer_at::<1>(name)
    }

    /// Start timing `name` at granularity `G`. Inert when `G` is above the
    /// configured threshold: no clock reads, no path or register updates.
    #[inline]
    pub fn timer_at<const G: u32>(&self, name: &str) -> Timer<'_, C> {
        if !self.config.is_on_duty(G) {
            return Timer::inert();
        }
        Timer::start(self, name)
    }

    /// Number of timers currently open on this thread for this profiler.
    pub fn open_depth(&self) -> u32 {
        self.with_thread_scope(|scope| scope.map_or(0, |s| s.open))
    }

    /// The calling thread's current scope path, if any timer is open.
    pub fn current_path(&self) -> Option<String> {
        self.with_thread_scope(|scope| scope.map(|s| s.path.clone()))
    }

    /// Merge every register with the default policy.
    pub fn snapshot(&self) -> Result<Register, Error> {
        self.snapshot_with(&MergeBySize)
    }

    /// Freeze the pool, copy every register, release the pool, then merge
    /// the copies with `policy`.
    ///
    /// Fails with [`Error::ScopesOpen`] when the calling thread has open
    /// timers on this profiler: freezing would wait on its own gate.
    pub fn snapshot_with<P>(&self, policy: &P) -> Result<Register, Error>
    where
        P: Consolidate + ?Sized,
    {
        self.ensure_closed()?;
        let Some(pool) = self.pool.get() else {
            return Ok(Register::new());
        };
        let registers: Vec<Register> = {
            let frozen = pool.freeze();
            frozen.registers().into_iter().cloned().collect()
        };
        Ok(policy.consolidate(registers))
    }

    /// Print the scope tree to `out`.
    pub fn write_report<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), Error> {
        self.write_report_with(out, &MergeBySize)
    }

    pub fn write_report_with<W, P>(&self, out: &mut W, policy: &P) -> Result<(), Error>
    where
        W: Write + ?Sized,
        P: Consolidate + ?Sized,
    {
        let register = self.snapshot_with(policy)?;
        tracing::debug!(scopes = register.len(), "writing scope report");
        report::write_tree(&register, &self.config.report_options(), &mut *out)?;
        out.flush()?;
        Ok(())
    }

    /// Discard every record.
    pub fn reset(&self) -> Result<(), Error> {
        self.ensure_closed()?;
        if let Some(pool) = self.pool.get() {
            pool.freeze().clear();
        }
        Ok(())
    }

    fn ensure_closed(&self) -> Result<(), Error> {
        match self.open_depth() {
            0 => Ok(()),
            depth => Err(Error::ScopesOpen { depth }),
        }
    }

    fn with_thread_scope<R>(&self, f: impl FnOnce(Option<&ThreadScope>) -> R) -> R {
        SCOPES.with(|scopes| {
            let scopes = scopes.borrow();
            f(scopes.iter().find(|s| s.profiler == self.id))
        })
    }

    fn pool(&self) -> &GatePool {
        match self.pool.get() {
            Some(pool) => pool,
            None => panic!(
                "concurrent profiler used before its thread count was set; \
                 call set_thread_count or set expected_thread_count first"
            ),
        }
    }

    fn elapsed(&self, start: C::Instant, end: C::Instant) -> f64 {
        let secs = self.clock.seconds_between(start, end);
        if secs >= 0.0 {
            secs
        } else {
            tracing::warn!(seconds = secs, "clock went backwards; recording zero");
            0.0
        }
    }
}

impl<C: Clock> fmt::Debug for Profiler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("slots", &self.slot_count())
            .finish()
    }
}

/// RAII scope timer. Records elapsed time into its profiler when stopped,
/// explicitly via [`stop`](Timer::stop) or implicitly on drop.
///
/// Not `Send`: the scope path it extends lives in thread-local storage.
#[must_use = "dropping the timer immediately records ~0s; bind it with `let _t = ...`"]
pub struct Timer<'p, C: Clock = MonotonicClock> {
    active: Option<Active<'p, C>>,
    _not_send: PhantomData<*const ()>,
}

struct Active<'p, C: Clock> {
    profiler: &'p Profiler<C>,
    start: C::Instant,
    /// Bytes this timer appended to the path, separator included.
    segment_len: usize,
    /// Open-timer count right after this timer was pushed.
    depth: u32,
}

impl<'p, C: Clock> Timer<'p, C> {
    fn inert() -> Self {
        Self {
            active: None,
            _not_send: PhantomData,
        }
    }

    fn start(profiler: &'p Profiler<C>, name: &str) -> Self {
        let clock = &profiler.clock;
        let overhead_start = profiler
            .config
            .overhead_measurement
            .then(|| clock.now());

        let (segment_len, depth) = SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            let idx = match scopes.iter().position(|s| s.profiler == profiler.id) {
                Some(idx) => idx,
                None => {
                    let gate = profiler.pool().lock_gate(std::thread::current().id());
                    scopes.push(ThreadScope {
                        profiler: profiler.id,
                        path: String::new(),
                        gate,
                        open: 0,
                    });
                    scopes.len() - 1
                }
            };
            let scope = &mut scopes[idx];

            let before = scope.path.len();
            if before > 0 {
                scope.path.push_str(SEP);
            }
            scope.path.push_str(name);
            scope.open += 1;

            if let Some(t0) = overhead_start {
                let cost = profiler.elapsed(t0, clock.now());
                // SAFETY: this thread holds `scope.gate` while `open > 0`.
                let register = unsafe { profiler.pool().register_mut(scope.gate) };
                register.get_or_create(&scope.path).overhead += cost;
            }

            (scope.path.len() - before, scope.open)
        });

        Self {
            active: Some(Active {
                profiler,
                start: clock.now(),
                segment_len,
                depth,
            }),
            _not_send: PhantomData,
        }
    }

    /// Whether this timer records (its granularity is within the threshold).
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Stop and record now. Later calls, and the drop, do nothing.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let profiler = active.profiler;
        let clock = &profiler.clock;
        let end = clock.now();
        let elapsed = profiler.elapsed(active.start, end);
        let config = &profiler.config;

        SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            let Some(idx) = scopes.iter().position(|s| s.profiler == profiler.id) else {
                debug_assert!(false, "timer stopped with no open scope on this thread");
                return;
            };
            let scope = &mut scopes[idx];
            debug_assert_eq!(
                scope.open, active.depth,
                "timers on {:?} stopped out of order",
                scope.path
            );

            let pool = profiler.pool();
            // SAFETY: this thread holds `scope.gate` while `open > 0`.
            let register = unsafe { pool.register_mut(scope.gate) };
            let record = register.get_or_create(&scope.path);
            record.add_sample(elapsed, config.variance_stats);

            let keep = scope.path.len().saturating_sub(active.segment_len);
            scope.path.truncate(keep);
            scope.open -= 1;

            if config.overhead_measurement {
                record.overhead += profiler.elapsed(end, clock.now());
            }

            if scope.open == 0 {
                let gate = scope.gate;
                scopes.swap_remove(idx);
                pool.free_gate(gate);
            }
        });
    }
}

impl<C: Clock> Drop for Timer<'_, C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Clock> fmt::Debug for Timer<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn manual() -> Profiler<ManualClock> {
        Profiler::with_clock(TimerConfig::default().with_granularity(5), ManualClock::new())
    }

    #[test]
    fn nested_timers_build_paths() {
        let p = manual();
        {
            let _a = p.timer("A");
            assert_eq!(p.current_path().as_deref(), Some("A"));
            {
                let _b = p.timer("B");
                assert_eq!(p.current_path().as_deref(), Some("A::B"));
                {
                    let _c = p.timer("C");
                    assert_eq!(p.current_path().as_deref(), Some("A::B::C"));
                    assert_eq!(p.open_depth(), 3);
                }
                assert_eq!(p.current_path().as_deref(), Some("A::B"));
            }
        }
        assert_eq!(p.current_path(), None);
        assert_eq!(p.open_depth(), 0);

        let reg = p.snapshot().unwrap();
        assert_eq!(reg.sorted_paths(), vec!["A", "A::B", "A::B::C"]);
        for path in ["A", "A::B", "A::B::C"] {
            assert_eq!(reg.get(path).unwrap().count, 1, "{path}");
        }
    }

    #[test]
    fn stop_is_idempotent() {
        let p = manual();
        {
            let mut t = p.timer("once");
            t.stop();
            t.stop();
        }
        let reg = p.snapshot().unwrap();
        assert_eq!(reg.get("once").unwrap().count, 1);
    }

    #[test]
    fn explicit_stop_then_drop_counts_once() {
        let p = manual();
        let mut outer = p.timer("outer");
        {
            let mut inner = p.timer("inner");
            p.clock().advance(Duration::from_millis(3));
            inner.stop();
            // inner drops here; must not record again
        }
        outer.stop();
        drop(outer);
        let reg = p.snapshot().unwrap();
        assert_eq!(reg.get("outer").unwrap().count, 1);
        assert_eq!(reg.get("outer::inner").unwrap().count, 1);
        assert!((reg.get("outer::inner").unwrap().duration - 0.003).abs() < 1e-12);
    }

    #[test]
    fn manual_clock_durations_are_exact() {
        let p = manual();
        {
            let _main = p.timer("main");
            {
                let _dent = p.timer("dent");
                p.clock().advance(Duration::from_micros(1500));
            }
            {
                let _bent = p.timer("bent");
                p.clock().advance(Duration::from_micros(300));
            }
        }
        let reg = p.snapshot().unwrap();
        assert!((reg.get("main::dent").unwrap().duration - 0.0015).abs() < 1e-12);
        assert!((reg.get("main::bent").unwrap().duration - 0.0003).abs() < 1e-12);
        assert!((reg.get("main").unwrap().duration - 0.0018).abs() < 1e-12);
    }

    #[test]
    fn granularity_above_threshold_is_inert() {
        let p = Profiler::with_clock(TimerConfig::default().with_granularity(2), ManualClock::new());
        {
            let on = p.timer_at::<2>("on");
            assert!(on.is_active());
            let off = p.timer_at::<3>("off");
            assert!(!off.is_active());
            assert_eq!(p.current_path().as_deref(), Some("on"));
        }
        let reg = p.snapshot().unwrap();
        assert_eq!(reg.sorted_paths(), vec!["on"]);
    }

    #[test]
    fn inert_timer_skips_level_in_path() {
        let p = Profiler::with_clock(TimerConfig::default().with_granularity(2), ManualClock::new());
        {
            let _a = p.timer_at::<1>("a");
            let _skip = p.timer_at::<4>("skipped");
            let _b = p.timer_at::<2>("b");
        }
        let reg = p.snapshot().unwrap();
        assert_eq!(reg.sorted_paths(), vec!["a", "a::b"]);
    }

    #[test]
    fn disabled_profiler_records_nothing() {
        let p = Profiler::new(TimerConfig::default().with_granularity(0));
        {
            let _t = p.timer("anything");
        }
        assert!(p.snapshot().unwrap().is_empty());
    }

    #[test]
    fn backwards_clock_is_clamped_to_zero() {
        let p = Profiler::with_clock(TimerConfig::default().with_variance(true), ManualClock::new());
        p.clock().set(1_000_000);
        {
            let _t = p.timer("skewed");
            p.clock().set(0);
        }
        let reg = p.snapshot().unwrap();
        let rec = reg.get("skewed").unwrap();
        assert_eq!(rec.count, 1);
        assert_eq!(rec.duration, 0.0);
        assert_eq!(rec.stats.sum_sq, 0.0);
    }

    #[test]
    fn variance_stats_recorded_when_enabled() {
        let p = Profiler::with_clock(TimerConfig::default().with_variance(true), ManualClock::new());
        for ms in [1u64, 3] {
            let _t = p.timer("v");
            p.clock().advance(Duration::from_millis(ms));
        }
        let reg = p.snapshot().unwrap();
        let v = reg.get("v").unwrap();
        assert_eq!(v.count, 2);
        assert!((v.stats.max - 0.003).abs() < 1e-12);
        assert!((v.rms() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn overhead_charged_to_own_path() {
        let p = Profiler::new(TimerConfig::default().with_overhead(true));
        {
            let _a = p.timer("a");
            let _b = p.timer("b");
        }
        let reg = p.snapshot().unwrap();
        assert!(reg.get("a").unwrap().overhead > 0.0);
        assert!(reg.get("a::b").unwrap().overhead > 0.0);
    }

    #[test]
    fn overhead_off_leaves_zero() {
        let p = Profiler::new(TimerConfig::default());
        {
            let _a = p.timer("a");
        }
        assert_eq!(p.snapshot().unwrap().get("a").unwrap().overhead, 0.0);
    }

    #[test]
    fn snapshot_with_open_timer_is_an_error() {
        let p = manual();
        let _t = p.timer("busy");
        let err = p.snapshot().unwrap_err();
        assert!(matches!(err, Error::ScopesOpen { depth: 1 }), "{err}");
    }

    #[test]
    fn reset_clears_records() {
        let p = manual();
        {
            let _t = p.timer("gone");
        }
        p.reset().unwrap();
        assert!(p.snapshot().unwrap().is_empty());
    }

    #[test]
    fn two_profilers_keep_separate_paths() {
        let p1 = manual();
        let p2 = manual();
        {
            let _a = p1.timer("a");
            let _x = p2.timer("x");
            let _b = p1.timer("b");
            assert_eq!(p1.current_path().as_deref(), Some("a::b"));
            assert_eq!(p2.current_path().as_deref(), Some("x"));
            drop(_b);
            drop(_x);
        }
        assert_eq!(p1.snapshot().unwrap().sorted_paths(), vec!["a", "a::b"]);
        assert_eq!(p2.snapshot().unwrap().sorted_paths(), vec!["x"]);
    }

    #[test]
    fn names_with_separator_merge_into_parent_tree() {
        let p = manual();
        {
            let _main = p.timer("main");
        }
        {
            let _w = p.timer("main::hello");
            let _c = p.timer("cout");
        }
        let reg = p.snapshot().unwrap();
        assert_eq!(reg.sorted_paths(), vec!["main", "main::hello", "main::hello::cout"]);
    }

    #[test]
    #[should_panic(expected = "thread count")]
    fn concurrent_timer_without_thread_count_panics() {
        let p = Profiler::concurrent(TimerConfig::default()).unwrap();
        let _t = p.timer("too_early");
    }

    #[test]
    fn set_thread_count_only_once() {
        let p = Profiler::concurrent(TimerConfig::default()).unwrap();
        assert_eq!(p.slot_count(), None);
        assert!(matches!(p.set_thread_count(0), Err(Error::ThreadCountZero)));
        assert_eq!(p.set_thread_count(4).unwrap(), 6);
        assert!(matches!(
            p.set_thread_count(8),
            Err(Error::ThreadCountAlreadySet { slots: 6 })
        ));
        assert_eq!(p.slot_count(), Some(6));
    }

    #[test]
    fn concurrent_with_zero_threads_is_rejected() {
        let err = Profiler::concurrent(TimerConfig::default().with_threads(0)).unwrap_err();
        assert!(matches!(err, Error::ThreadCountZero));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "out of order")]
    fn out_of_order_stop_is_caught_in_debug() {
        let p = manual();
        let mut a = p.timer("a");
        let _b = p.timer("b");
        a.stop();
    }

    #[test]
    fn write_report_renders_tree() {
        let p = manual();
        {
            let _main = p.timer("main");
            p.clock().advance(Duration::from_millis(10));
            {
                let _c = p.timer("child");
                p.clock().advance(Duration::from_micros(2500));
            }
        }
        let mut out = Vec::new();
        p.write_report(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("main: calls: 1"), "{text}");
        let child = text
            .lines()
            .find(|l| l.trim_start().starts_with("child."))
            .unwrap();
        // 2.5ms of 12.5ms
        assert!(child.contains("20.0%"), "{child}");
    }
}
