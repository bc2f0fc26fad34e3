//! Folding per-slot registers into the single register a report is built from.

use crate::record::Register;

/// Policy for merging the per-slot registers of a concurrent profiler.
///
/// Receives a copy of every slot's register, taken while the pool was
/// frozen. Any `Fn(Vec<Register>) -> Register` closure is a policy, so
/// callers with domain-specific needs (e.g. keeping only the busiest thread)
/// can pass one directly to
/// [`Profiler::snapshot_with`](crate::Profiler::snapshot_with).
pub trait Consolidate {
    fn consolidate(&self, registers: Vec<Register>) -> Register;
}

impl<F> Consolidate for F
where
    F: Fn(Vec<Register>) -> Register,
{
    fn consolidate(&self, registers: Vec<Register>) -> Register {
        self(registers)
    }
}

/// Default policy: sum records that share a path.
///
/// Registers are visited largest first. Each record of the current register
/// pulls every same-path record out of the registers after it, so once a
/// register has been visited its paths are unique and it can be moved into
/// the result wholesale.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeBySize;

impl Consolidate for MergeBySize {
    fn consolidate(&self, registers: Vec<Register>) -> Register {
        let mut pending: Vec<Register> =
            registers.into_iter().filter(|r| !r.is_empty()).collect();
        pending.sort_by(|a, b| b.len().cmp(&a.len()));
        tracing::debug!(registers = pending.len(), "consolidating registers");

        let mut result = Register::new();
        for i in 0..pending.len() {
            let (head, tail) = pending.split_at_mut(i + 1);
            let current = &mut head[i];
            let paths: Vec<String> = current.iter().map(|(p, _)| p.to_owned()).collect();
            for path in paths {
                let record = current.get_or_create(&path);
                for later in tail.iter_mut() {
                    if let Some(other) = later.remove(&path) {
                        record.absorb(&other);
                    }
                }
            }
            result.merge(std::mem::take(current));
        }
        result
    }
}
