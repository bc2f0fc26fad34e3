//! Fixed pool of registers, each guarded by a single-owner gate.
//!
//! A thread that opens its outermost timer hashes its `ThreadId` onto the
//! pool and scans forward for a gate it can close with a test-and-set.
//! It keeps that gate, and writes only to the register behind it, until its
//! last open timer stops. Without collisions this is one uncontended atomic
//! swap per outermost timer; nested timers never touch the gate.
//!
//! Collisions stay cheap while the pool is less than ~70% occupied, so the
//! pool is sized to `1 + floor(threads / 0.7)` slots. Probing only terminates
//! while fewer threads hold gates than there are slots. Debug builds count
//! holders of a sized pool and panic on oversubscription; release builds
//! would spin forever. The one-slot pool of single-threaded mode is exempt:
//! there a second thread waits for the gate by contract.

use std::cell::UnsafeCell;
use std::hash::{BuildHasher, Hash, Hasher};
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use ahash::RandomState;
use crossbeam_utils::CachePadded;

use crate::record::Register;

/// Target upper bound on the fraction of slots held at once.
const MAX_LOAD_FACTOR: f64 = 0.7;

struct Slot {
    gate: CachePadded<AtomicBool>,
    register: UnsafeCell<Register>,
}

pub(crate) struct GatePool {
    slots: Box<[Slot]>,
    hasher: RandomState,
    /// Whether holders are counted against the slot count.
    #[cfg(debug_assertions)]
    bounded: bool,
    #[cfg(debug_assertions)]
    held: AtomicUsize,
}

// SAFETY: a slot's register is only reached through `register_mut` by the
// thread that closed its gate, or through `Frozen` after every gate has been
// closed by the freezing thread. The gate's Acquire/Release pairs order those
// accesses.
unsafe impl Sync for GatePool {}

impl GatePool {
    /// Pool sized for `threads` concurrently timing threads.
    ///
    /// # Panics
    /// If `threads` is zero.
    pub(crate) fn for_threads(threads: usize) -> Self {
        assert!(threads > 0, "gate pool needs at least one thread");
        let count = slot_count(threads);
        tracing::debug!(threads, slots = count, "sizing gate pool");
        Self::with_slots(count, true)
    }

    /// One-slot pool for single-threaded profiling. Threads take turns.
    pub(crate) fn single() -> Self {
        Self::with_slots(1, false)
    }

    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    fn with_slots(count: usize, bounded: bool) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                gate: CachePadded::new(AtomicBool::new(false)),
                register: UnsafeCell::new(Register::new()),
            })
            .collect();
        Self {
            slots,
            hasher: RandomState::new(),
            #[cfg(debug_assertions)]
            bounded,
            #[cfg(debug_assertions)]
            held: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Claim a free gate for `key` and return its index.
    pub(crate) fn lock_gate(&self, key: ThreadId) -> usize {
        #[cfg(debug_assertions)]
        {
            if self.bounded {
                let held = self.held.fetch_add(1, Ordering::AcqRel);
                if held >= self.slots.len() {
                    self.held.fetch_sub(1, Ordering::AcqRel);
                    panic!(
                        "more threads are timing concurrently than the {} register slots allow; \
                         raise expected_thread_count",
                        self.slots.len()
                    );
                }
            }
        }

        let n = self.slots.len();
        let mut idx = self.home_slot(key);
        loop {
            let gate = &self.slots[idx].gate;
            if !gate.load(Ordering::Relaxed) && !gate.swap(true, Ordering::Acquire) {
                return idx;
            }
            idx = (idx + 1) % n;
            std::hint::spin_loop();
        }
    }

    /// Reopen a gate previously returned by [`lock_gate`](Self::lock_gate).
    pub(crate) fn free_gate(&self, idx: usize) {
        debug_assert!(idx < self.slots.len(), "gate index {idx} out of range");
        #[cfg(debug_assertions)]
        {
            if self.bounded {
                self.held.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.slots[idx].gate.store(false, Ordering::Release);
    }

    /// Exclusive access to the register behind a gate.
    ///
    /// # Safety
    /// The caller must hold gate `idx` (from `lock_gate`) and must not let
    /// the reference outlive its ownership of the gate or overlap another
    /// reference obtained for the same index.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn register_mut(&self, idx: usize) -> &mut Register {
        &mut *self.slots[idx].register.get()
    }

    fn home_slot(&self, key: ThreadId) -> usize {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() % self.slots.len() as u64) as usize
    }

    /// Close every gate, waiting for current holders to release theirs.
    ///
    /// New outermost timers on other threads spin until the returned guard
    /// drops. Must not be called by a thread that itself holds a gate.
    pub(crate) fn freeze(&self) -> Frozen<'_> {
        for slot in self.slots.iter() {
            while slot.gate.swap(true, Ordering::Acquire) {
                std::thread::yield_now();
            }
        }
        tracing::trace!(slots = self.slots.len(), "gate pool frozen");
        Frozen { pool: self }
    }
}

/// Every gate of a pool closed by one thread. Reopens them on drop.
pub(crate) struct Frozen<'a> {
    pool: &'a GatePool,
}

impl Frozen<'_> {
    /// All registers, in slot order.
    pub(crate) fn registers(&self) -> Vec<&Register> {
        self.pool
            .slots
            .iter()
            // SAFETY: every gate is held by this guard, so no writer exists.
            .map(|slot| unsafe { &*slot.register.get() })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        for slot in self.pool.slots.iter() {
            // SAFETY: every gate is held by this guard and `&mut self`
            // prevents outstanding shared borrows from `registers()`.
            unsafe { (*slot.register.get()).clear() };
        }
    }
}

impl Drop for Frozen<'_> {
    fn drop(&mut self) {
        for slot in self.pool.slots.iter() {
            slot.gate.store(false, Ordering::Release);
        }
        tracing::trace!("gate pool released");
    }
}

fn slot_count(threads: usize) -> usize {
    1 + (threads as f64 / MAX_LOAD_FACTOR).floor() as usize
}
