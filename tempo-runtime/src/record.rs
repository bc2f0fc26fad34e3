//! Per-scope accumulators and the path-keyed register that holds them.

use ahash::AHashMap;

/// Sum-of-squares and peak for variance reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats {
    pub sum_sq: f64,
    pub max: f64,
}

/// Accumulated measurements for one scope path. All times in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Record {
    pub count: u64,
    pub duration: f64,
    pub overhead: f64,
    pub stats: Stats,
}

impl Record {
    /// Account one completed measurement. `elapsed` must already be clamped
    /// to be non-negative.
    #[inline]
    pub fn add_sample(&mut self, elapsed: f64, variance: bool) {
        debug_assert!(elapsed >= 0.0, "negative sample reached a record");
        self.count += 1;
        self.duration += elapsed;
        if variance {
            self.stats.sum_sq += elapsed * elapsed;
            self.stats.max = self.stats.max.max(elapsed);
        }
    }

    /// Fold another record for the same path into this one.
    pub fn absorb(&mut self, other: &Record) {
        self.count += other.count;
        self.duration += other.duration;
        self.overhead += other.overhead;
        self.stats.sum_sq += other.stats.sum_sq;
        self.stats.max = self.stats.max.max(other.stats.max);
    }

    /// Mean duration per call, NaN when nothing was recorded.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.duration / self.count as f64
    }

    /// Standard deviation of the per-call durations, NaN when nothing was
    /// recorded. Rounding can push the variance slightly below zero for
    /// near-constant samples; that is read as zero.
    pub fn rms(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        let mean = self.mean();
        (self.stats.sum_sq / self.count as f64 - mean * mean)
            .max(0.0)
            .sqrt()
    }
}

/// Mapping from full scope path (`a::b::c`) to its [`Record`].
///
/// Not synchronized: each register is written by one thread at a time,
/// which the gate pool guarantees.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Register {
    records: AHashMap<String, Record>,
}

impl Register {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for `path`, created zero-valued on first use. The key is
    /// only allocated when the path is new.
    #[inline]
    pub fn get_or_create(&mut self, path: &str) -> &mut Record {
        if !self.records.contains_key(path) {
            self.records.insert(path.to_owned(), Record::default());
        }
        self.records
            .get_mut(path)
            .unwrap_or_else(|| unreachable!("record for {path:?} was just inserted"))
    }

    pub fn get(&self, path: &str) -> Option<&Record> {
        self.records.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<Record> {
        self.records.remove(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Absorb every record of `other`, summing those with equal paths.
    pub fn merge(&mut self, other: Register) {
        for (path, rec) in other.records {
            match self.records.get_mut(&path) {
                Some(existing) => existing.absorb(&rec),
                None => {
                    self.records.insert(path, rec);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Paths in lexical order, handy for stable output.
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.records.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl FromIterator<(String, Record)> for Register {
    fn from_iter<I: IntoIterator<Item = (String, Record)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
