//! Column statistics.
//!
//! `compute_*` run a full pass over the valid rows in the column's native
//! type. `get_actual_*` prefer the index's cached extreme and fall back to
//! a pass when the index answers NaN. Distributions are available only
//! through the index.

use super::{with_fixed_type, Column};
use crate::array::{ArrayView, Element};
use crate::bitvector::Bitvector;
use crate::error::{Error, Result};
use crate::file_manager::AccessHint;
use tracing::debug;

impl Column {
    /// Smallest valid value, found by a full pass. NaN when the column
    /// holds no valid value.
    ///
    /// # Errors
    ///
    /// Returns `NotApplicable` for OID and TEXT columns and IO errors from
    /// reading the data.
    pub fn compute_min(&self) -> Result<f64> {
        self.fold_valid(f64::NAN, |acc, v| {
            if acc.is_nan() || v < acc {
                v
            } else {
                acc
            }
        })
    }

    /// Largest valid value, found by a full pass. NaN when the column
    /// holds no valid value.
    ///
    /// # Errors
    ///
    /// As [`Column::compute_min`].
    pub fn compute_max(&self) -> Result<f64> {
        self.fold_valid(f64::NAN, |acc, v| {
            if acc.is_nan() || v > acc {
                v
            } else {
                acc
            }
        })
    }

    /// Sum of the valid values.
    ///
    /// # Errors
    ///
    /// As [`Column::compute_min`].
    pub fn compute_sum(&self) -> Result<f64> {
        self.fold_valid(0.0, |acc, v| if v.is_nan() { acc } else { acc + v })
    }

    /// Tightens the cached bounds by a full pass over the valid rows.
    ///
    /// # Errors
    ///
    /// As [`Column::compute_min`].
    pub fn compute_min_max(&self) -> Result<(f64, f64)> {
        let mask = self.null_mask()?;
        let (min, max) = with_fixed_type!(
            self.ctype,
            T => self.actual_min_max_typed::<T>(&mask)?,
            return Err(Error::NotApplicable {
                name: self.name.clone(),
                ctype: self.ctype.type_word(),
            })
        );
        self.set_bounds(min, max);
        debug!(column = %self.name, min, max, "recomputed bounds");
        Ok((min, max))
    }

    /// Smallest value, preferring the index's answer.
    ///
    /// # Errors
    ///
    /// As [`Column::compute_min`].
    pub fn get_actual_min(&self) -> Result<f64> {
        let from_index = {
            let guard = self.index_guard();
            guard.index().map(|idx| idx.get_min())
        };
        match from_index {
            Some(v) if !v.is_nan() => Ok(v),
            _ => self.compute_min(),
        }
    }

    /// Largest value, preferring the index's answer.
    ///
    /// # Errors
    ///
    /// As [`Column::compute_min`].
    pub fn get_actual_max(&self) -> Result<f64> {
        let from_index = {
            let guard = self.index_guard();
            guard.index().map(|idx| idx.get_max())
        };
        match from_index {
            Some(v) if !v.is_nan() => Ok(v),
            _ => self.compute_max(),
        }
    }

    /// Sum of the valid values, preferring the index's answer.
    ///
    /// # Errors
    ///
    /// As [`Column::compute_min`].
    pub fn get_sum(&self) -> Result<f64> {
        let from_index = {
            let guard = self.index_guard();
            guard.index().map(|idx| idx.get_sum())
        };
        match from_index {
            Some(v) if !v.is_nan() => Ok(v),
            _ => self.compute_sum(),
        }
    }

    /// Per-bin value distribution `(upper boundaries, weights)` from the
    /// index.
    ///
    /// # Errors
    ///
    /// Returns an index fault when no index is materialized.
    pub fn get_distribution(&self) -> Result<(Vec<f64>, Vec<u32>)> {
        let guard = self.index_guard();
        let idx = guard.index().ok_or_else(|| {
            Error::IndexFault(format!(
                "column '{}' has no index to answer a distribution",
                self.name
            ))
        })?;
        Ok((idx.bin_boundaries(), idx.bin_weights()))
    }

    /// Cumulative distribution `(upper boundaries, running counts)` from
    /// the index.
    ///
    /// # Errors
    ///
    /// As [`Column::get_distribution`].
    pub fn get_cumulative_distribution(&self) -> Result<(Vec<f64>, Vec<u64>)> {
        let (bounds, weights) = self.get_distribution()?;
        let mut running = 0u64;
        let cumulative = weights
            .into_iter()
            .map(|w| {
                running += u64::from(w);
                running
            })
            .collect();
        Ok((bounds, cumulative))
    }

    fn fold_valid(&self, init: f64, f: impl Fn(f64, f64) -> f64) -> Result<f64> {
        let mask = self.null_mask()?;
        let (values, _) = self.select_f64_with_indices(&mask)?;
        Ok(values.into_iter().fold(init, f))
    }

    fn actual_min_max_typed<T: Element>(&self, mask: &Bitvector) -> Result<(f64, f64)> {
        let block = self
            .ctx
            .files()
            .get_file(&self.data_file(), AccessHint::MmapLargeFiles)?;
        let view: ArrayView<T> = ArrayView::new(block);
        let nr = (view.len() as u64).min(mask.size());
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        for pos in mask.set_positions() {
            if pos >= nr {
                break;
            }
            let v = view.get(pos as usize);
            if min.is_none_or(|m| v < m) {
                min = Some(v);
            }
            if max.is_none_or(|m| v > m) {
                max = Some(v);
            }
        }
        match (min, max) {
            (Some(lo), Some(hi)) => Ok((lo.to_f64(), hi.to_f64())),
            // No valid value: leave the bounds unset.
            _ => Ok((f64::MAX, f64::MIN)),
        }
    }
}
