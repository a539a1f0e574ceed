//! Card-abstraction buckets.
//!
//! A bucket maps a global hand index (`gbd * num_hole_card_pairs + hcp`) to
//! a dense equivalence class. Streets without buckets are solved
//! unabstracted. How buckets are computed (EHS percentiles, k-means, ...)
//! is outside this crate; the engine only performs lookups.

/// Per-street bucket assignment.
pub trait Buckets: Send + Sync {
    /// True when the street has no abstraction at all.
    fn none(&self, st: usize) -> bool;

    /// Number of buckets on the street. Meaningless when `none(st)`.
    fn num_buckets(&self, st: usize) -> usize;

    /// Bucket of the global hand index `h` on street `st`.
    fn bucket(&self, st: usize, h: usize) -> usize;
}

/// No abstraction on any street.
#[derive(Debug, Clone, Default)]
pub struct NoBuckets;

impl Buckets for NoBuckets {
    fn none(&self, _st: usize) -> bool {
        true
    }

    fn num_buckets(&self, _st: usize) -> usize {
        0
    }

    fn bucket(&self, _st: usize, _h: usize) -> usize {
        0
    }
}

/// Bucket tables held in memory, one optional table per street.
#[derive(Debug, Clone)]
pub struct TableBuckets {
    /// `streets[st]` is `None` on unabstracted streets.
    streets: Vec<Option<(usize, Vec<u32>)>>,
}

impl TableBuckets {
    /// Build from per-street `(num_buckets, assignments)` tables.
    #[must_use]
    pub fn new(streets: Vec<Option<(usize, Vec<u32>)>>) -> Self {
        Self { streets }
    }
}

impl Buckets for TableBuckets {
    fn none(&self, st: usize) -> bool {
        !matches!(self.streets.get(st), Some(Some(_)))
    }

    fn num_buckets(&self, st: usize) -> usize {
        self.streets[st].as_ref().map_or(0, |(n, _)| *n)
    }

    fn bucket(&self, st: usize, h: usize) -> usize {
        let (_, table) = self.streets[st].as_ref().expect("street has no buckets");
        table[h] as usize
    }
}
