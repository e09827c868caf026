//! Fixed-width bucketing of a height or time range.

use serde::{Deserialize, Serialize};

/// Block column a range is quantized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactBasis {
    Height,
    Time,
}

impl CompactBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactBasis::Height => "height",
            CompactBasis::Time => "time",
        }
    }
}

/// Partition of `(from, to]` into buckets of `step`. When the range is not a
/// multiple of `step` the lower bound is moved back so every bucket is full
/// width; the upper bound never moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compacter {
    basis: CompactBasis,
    from: i64,
    to: i64,
    step: i64,
}

impl Compacter {
    pub fn new(basis: CompactBasis, from: i64, to: i64, step: i64) -> Self {
        let step = step.max(1);
        let mut from = from.min(to);

        let left = (to - from) % step;
        if left != 0 {
            from -= step - left;
        }

        Self { basis, from, to, step }
    }

    pub fn basis(&self) -> CompactBasis {
        self.basis
    }

    /// Adjusted lower bound.
    pub fn from(&self) -> i64 {
        self.from
    }

    pub fn to(&self) -> i64 {
        self.to
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    /// Number of buckets.
    pub fn num(&self) -> usize {
        ((self.to - self.from) / self.step) as usize
    }

    /// Bounds of bucket `seq`, exclusive below and inclusive above.
    pub fn bucket(&self, seq: usize) -> (i64, i64) {
        let from = self.from + seq as i64 * self.step;
        (from, from + self.step)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (0..self.num()).map(move |seq| self.bucket(seq))
    }

    /// Every bucket boundary, from the adjusted lower bound up to `to`.
    pub fn index(&self) -> Vec<i64> {
        (0..=self.num()).map(|n| self.from + n as i64 * self.step).collect()
    }
}

/// Step that splits `[from, to]` into roughly `num_steps` buckets, never zero.
pub fn step_size(from: i64, to: i64, num_steps: i64) -> i64 {
    ((to - from) / num_steps.max(1)).max(1)
}
