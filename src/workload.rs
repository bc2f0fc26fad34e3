//! Demonstration workload: a fixed tree of nested, sleeping scopes.
//!
//! Scope granularities run from 1 (`main`) to 5 (`innermost`), so the
//! threshold visibly prunes the tree. With more than one thread, the
//! `hello` and `posthello` blocks also run on worker threads. Workers have
//! no `main` timer of their own, so their top-level names carry a `main::`
//! prefix and land in the same tree as the main thread's.

use std::thread;
use std::time::Duration;

use tempo_runtime::{Clock, Profiler};

use crate::error::Error;

/// Shape of one demo run.
#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub threads: usize,
    pub loops: u32,
}

impl DemoOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if self.threads == 0 {
            return Err(tempo_runtime::Error::ThreadCountZero.into());
        }
        if self.loops == 0 {
            return Err(Error::InvalidArgument(
                "--loops must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run the workload `options.loops` times under a `main` timer.
///
/// For `threads > 1` the profiler must be concurrent with at least
/// `threads` expected threads: the main thread holds its slot while the
/// workers run.
pub fn run<C: Clock>(profiler: &Profiler<C>, options: DemoOptions) -> Result<(), Error> {
    options.validate()?;
    let slots = profiler.slot_count().unwrap_or(0);
    if options.threads > 1 && slots < options.threads {
        return Err(Error::InvalidArgument(format!(
            "{} threads need a concurrent profiler with at least {} slots, found {slots}",
            options.threads, options.threads
        )));
    }
    tracing::info!(
        threads = options.threads,
        loops = options.loops,
        "running demo workload"
    );

    let mut main = profiler.timer_at::<1>("main");
    for _ in 0..options.loops {
        hello(profiler, "");
        on_workers(profiler, options.threads, hello)?;
        posthello(profiler, "");
        on_workers(profiler, options.threads, posthello)?;
    }
    main.stop();
    Ok(())
}

fn on_workers<C: Clock>(
    profiler: &Profiler<C>,
    threads: usize,
    block: fn(&Profiler<C>, &str),
) -> Result<(), Error> {
    thread::scope(|s| {
        let handles: Vec<_> = (1..threads)
            .map(|_| s.spawn(move || block(profiler, "main::")))
            .collect();
        handles
            .into_iter()
            .try_for_each(|h| h.join().map_err(|_| Error::WorkerPanicked))
    })
}

fn hello<C: Clock>(p: &Profiler<C>, prefix: &str) {
    let _t = p.timer_at::<2>(&format!("{prefix}hello"));
    {
        let _t = p.timer_at::<3>("cout");
    }
    {
        let _t = p.timer_at::<3>("indent");
        {
            let _t = p.timer_at::<4>("dent");
            thread::sleep(Duration::from_micros(1500));
        }
        {
            let _t = p.timer_at::<4>("bent");
            thread::sleep(Duration::from_micros(300));
        }
        {
            let _t = p.timer_at::<4>("bore");
            {
                let _t = p.timer_at::<5>("innermost");
                thread::sleep(Duration::from_micros(100));
            }
        }
    }
    {
        let _t = p.timer_at::<3>("postdent");
        {
            let _t = p.timer_at::<2>("inpost");
            thread::sleep(Duration::from_millis(2));
        }
    }
}

fn posthello<C: Clock>(p: &Profiler<C>, prefix: &str) {
    let _t = p.timer_at::<2>(&format!("{prefix}posthello"));
    {
        let _t = p.timer_at::<3>("phindent");
        thread::sleep(Duration::from_millis(1));
    }
    {
        let _t = p.timer_at::<3>("phdent");
        thread::sleep(Duration::from_micros(500));
    }
}
