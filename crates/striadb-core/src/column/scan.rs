//! Fallback full scans.
//!
//! A scan walks the candidate rows of a bitvector, tests each stored value
//! against the predicate, and returns a hit bitvector of the full row
//! count. It is the path of last resort for the evaluator: correct on any
//! fixed-width column, no index or sort order required.

use super::{with_fixed_type, Column};
use crate::array::{ArrayView, Element};
use crate::bitvector::Bitvector;
use crate::error::{Error, Result};
use crate::file_manager::AccessHint;
use crate::predicate::{ContinuousRange, DiscreteRange};
use tracing::debug;

impl Column {
    /// Scans the rows set in `candidates` against a continuous range.
    ///
    /// The result has `candidates.size()` bits; a bit is set where the
    /// candidate row's value satisfies the range.
    ///
    /// # Errors
    ///
    /// Returns `NotApplicable` for OID and TEXT columns and IO errors from
    /// reading the data file.
    pub(crate) fn scan_continuous(
        &self,
        rng: &ContinuousRange,
        candidates: &Bitvector,
    ) -> Result<Bitvector> {
        self.scan_matching(candidates, |v| rng.contains(v))
    }

    /// Scans the rows set in `candidates` against a membership set.
    ///
    /// # Errors
    ///
    /// As [`Column::scan_continuous`].
    pub(crate) fn scan_discrete(
        &self,
        rng: &DiscreteRange,
        candidates: &Bitvector,
    ) -> Result<Bitvector> {
        self.scan_matching(candidates, |v| rng.contains(v))
    }

    fn scan_matching(
        &self,
        candidates: &Bitvector,
        pred: impl Fn(f64) -> bool,
    ) -> Result<Bitvector> {
        with_fixed_type!(
            self.ctype,
            T => self.scan_typed::<T>(candidates, pred),
            Err(Error::NotApplicable {
                name: self.name.clone(),
                ctype: self.ctype.type_word(),
            })
        )
    }

    fn scan_typed<T: Element>(
        &self,
        candidates: &Bitvector,
        pred: impl Fn(f64) -> bool,
    ) -> Result<Bitvector> {
        let rows = candidates.size();
        if candidates.cnt() == 0 {
            return Ok(Bitvector::filled(false, rows));
        }
        let block = self
            .ctx
            .files()
            .get_file(&self.data_file(), AccessHint::MmapLargeFiles)?;
        let view: ArrayView<T> = ArrayView::new(block);
        let nr = (view.len() as u64).min(rows);

        let mut hits = Bitvector::new();
        for pos in candidates.set_positions() {
            if pos >= nr {
                break;
            }
            if pred(view.get(pos as usize).to_f64()) {
                if pos > hits.size() {
                    hits.append_fill(false, pos - hits.size());
                }
                hits.append_fill(true, 1);
            }
        }
        hits.adjust_size(0, rows);
        debug!(
            column = %self.name,
            candidates = candidates.cnt(),
            hits = hits.cnt(),
            "scanned candidate rows"
        );
        Ok(hits)
    }
}
