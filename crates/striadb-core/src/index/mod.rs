//! The per-column index capability.
//!
//! The evaluator consumes an index through the [`ColumnIndex`] trait alone:
//! cost estimates, certain/possible hit pairs, exact evaluation when
//! feasible, endpoint snapping, and bin statistics. The index files on disk
//! are shared-read, exclusive-rebuild; the column pins an in-memory index
//! with a reference count and the write side waits for the count to reach
//! zero before destroying it.
//!
//! One concrete implementation ships with the core, a range-binned bitmap
//! index ([`BinnedIndex`]); everything else is expected to arrive through
//! this boundary.

mod binned;

pub use binned::BinnedIndex;

use crate::bitvector::Bitvector;
use crate::error::Result;
use crate::predicate::{ContinuousRange, DiscreteRange};
use std::path::Path;

/// Operations the evaluator may ask of a materialized index.
///
/// Cost figures are in units comparable to "bytes read if scanned".
pub trait ColumnIndex: Send + Sync {
    /// Short name of the index encoding.
    fn name(&self) -> &'static str;

    /// Number of rows the index was built over.
    fn nrows(&self) -> u64;

    /// Estimated cost of answering a continuous range through the index.
    fn estimate_cost(&self, rng: &ContinuousRange) -> f64;

    /// Estimated cost of answering a membership set through the index.
    fn estimate_cost_discrete(&self, rng: &DiscreteRange) -> f64;

    /// Bounds the hits of `rng`: `(certain, possible)` with
    /// `certain ⊆ hits ⊆ possible`, both at most `nrows` bits. An empty
    /// `possible` means the estimate is exact.
    fn estimate(&self, rng: &ContinuousRange) -> (Bitvector, Bitvector);

    /// Exact hits of `rng`, when the index can decide every row.
    ///
    /// # Errors
    ///
    /// Returns an index fault when some rows cannot be decided; the caller
    /// falls back to [`ColumnIndex::estimate`] plus a candidate scan.
    fn evaluate(&self, rng: &ContinuousRange) -> Result<Bitvector>;

    /// Bounds the hits of a membership set, as [`ColumnIndex::estimate`].
    fn estimate_discrete(&self, rng: &DiscreteRange) -> (Bitvector, Bitvector);

    /// Exact hits of a membership set, when decidable.
    ///
    /// # Errors
    ///
    /// As [`ColumnIndex::evaluate`].
    fn evaluate_discrete(&self, rng: &DiscreteRange) -> Result<Bitvector>;

    /// Rows the index cannot classify for `rng`, and their fraction of the
    /// total.
    fn undecidable(&self, rng: &ContinuousRange) -> (f32, Bitvector);

    /// Snaps the endpoints of `rng` outward onto bin boundaries. Returns
    /// true when the range changed.
    fn expand_range(&self, rng: &mut ContinuousRange) -> bool;

    /// Snaps the endpoints of `rng` inward onto bin boundaries. Returns
    /// true when the range changed.
    fn contract_range(&self, rng: &mut ContinuousRange) -> bool;

    /// Upper edges of the bins, ascending.
    fn bin_boundaries(&self) -> Vec<f64>;

    /// Number of rows in each bin.
    fn bin_weights(&self) -> Vec<u32>;

    /// Smallest indexed value, NaN when unknown.
    fn get_min(&self) -> f64;

    /// Largest indexed value, NaN when unknown.
    fn get_max(&self) -> f64;

    /// Sum of the indexed values, NaN when unknown.
    fn get_sum(&self) -> f64;

    /// Extends the index over `nnew` rows appended to the column in
    /// `dest_dir`, whose new values came from `src_dir`.
    ///
    /// # Errors
    ///
    /// Returns an index fault when the extension cannot be performed; the
    /// caller discards the stale index instead.
    fn append(&mut self, dest_dir: &Path, src_dir: &Path, nnew: u64) -> Result<u64>;

    /// Persists the index blob into `dir`.
    ///
    /// # Errors
    ///
    /// Returns IO or serialization errors.
    fn write(&self, dir: &Path) -> Result<()>;
}
