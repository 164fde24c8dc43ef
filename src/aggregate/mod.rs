//! Statistical accumulators and the store that owns them for a job.

pub mod histogram;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use histogram::{Axis, Histogram};
pub use store::{AggregateStore, StoreError};

/// Errors raised when booking or filling an aggregate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("invalid axis: {bins} bins over [{min}, {max})")]
    InvalidAxis { bins: u32, min: f64, max: f64 },

    #[error("{name}: expected {expected} coordinates, got {found}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("{name}: coordinate {position} is not finite")]
    NonFinite { name: String, position: usize },

    #[error("{name}: fill weight is not finite")]
    NonFiniteWeight { name: String },
}

/// Anything that can be filled with coordinates and finalized for output.
pub trait Aggregate: Send + Sync {
    /// Unique name; used as the key in the output artifact.
    fn name(&self) -> &str;

    /// Adds one weighted observation.
    fn fill(&self, coords: &[f64], weight: f64) -> Result<(), AggregateError>;

    /// Produces the serializable summary of everything filled so far.
    fn finalize(&self) -> AggregateSnapshot;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Histogram,
    Profile,
}

/// Per-cell value sums carried by profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSums {
    pub sum_wy: Vec<f64>,
    pub sum_wy2: Vec<f64>,
}

/// Finalized state of one aggregate.
///
/// Cells are laid out with the first axis varying fastest; each axis
/// contributes `bins + 2` cells (underflow, bins, overflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub name: String,
    pub title: String,
    pub kind: AggregateKind,
    pub axes: Vec<Axis>,
    pub entries: u64,
    pub sum_weights: Vec<f64>,
    pub sum_weights2: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileSums>,
}

impl AggregateSnapshot {
    fn in_range(&self, mut cell: usize) -> bool {
        for axis in &self.axes {
            let cells = axis.bins as usize + 2;
            let idx = cell % cells;
            if idx == 0 || idx == cells - 1 {
                return false;
            }
            cell /= cells;
        }
        true
    }

    /// Sum of weights over in-range cells.
    pub fn integral(&self) -> f64 {
        self.sum_weights
            .iter()
            .enumerate()
            .filter(|(cell, _)| self.in_range(*cell))
            .map(|(_, w)| w)
            .sum()
    }

    /// Weighted mean of the profiled value in `cell`, if the cell was filled.
    pub fn bin_mean(&self, cell: usize) -> Option<f64> {
        let profile = self.profile.as_ref()?;
        let w = *self.sum_weights.get(cell)?;
        if w == 0.0 {
            return None;
        }
        profile.sum_wy.get(cell).map(|s| s / w)
    }
}
