//! The predicate evaluator.
//!
//! A range condition resolves through up to three cooperating paths: the
//! bitmap index bounds the answer from below and above, the sorted-file
//! search answers exactly on sorted data, and a scan decides whatever rows
//! remain undecided. Every path ends intersected with the effective mask,
//! the conjunction of the null mask and the caller's mask.
//!
//! Index state is pinned for the duration of a read. When a recoverable
//! error escapes any path, the in-memory index is dropped before the
//! retry, so the retry cannot observe a corrupted state; the retry is a
//! plain scan of the effective mask.

use super::{Column, ColumnType};
use crate::bitvector::Bitvector;
use crate::error::{Error, Result};
use crate::predicate::{ContinuousRange, DiscreteRange, RangeOp};
use crate::roster::Roster;
use tracing::{debug, warn};

impl Column {
    /// Evaluates a continuous range over the rows set in `mask`.
    ///
    /// The result has one bit per partition row and is a subset of the
    /// effective mask.
    ///
    /// # Errors
    ///
    /// Returns `NotApplicable` for OID and TEXT columns. IO and index
    /// faults are retried once through the fallback scan; the error
    /// surfaces only when the scan itself fails.
    pub fn evaluate_continuous(
        &self,
        rng: &ContinuousRange,
        mask: &Bitvector,
    ) -> Result<Bitvector> {
        if matches!(self.ctype, ColumnType::Oid | ColumnType::Text) {
            return Err(Error::NotApplicable {
                name: self.name.clone(),
                ctype: self.ctype.type_word(),
            });
        }
        let eff = self.effective_mask(mask)?;
        match self.continuous_with_index(rng, &eff) {
            Ok(hits) => {
                debug!(
                    column = %self.name,
                    hits = hits.cnt(),
                    %rng,
                    "evaluated continuous range"
                );
                Ok(hits)
            }
            Err(e) if e.is_recoverable() => {
                warn!(column = %self.name, error = %e, "retrying range evaluation with a scan");
                self.unload_index();
                self.scan_continuous(rng, &eff)
            }
            Err(e) => Err(e),
        }
    }

    fn continuous_with_index(&self, rng: &ContinuousRange, eff: &Bitvector) -> Result<Bitvector> {
        let rows = self.rows();
        let mut low = Bitvector::new();
        let mut high = Bitvector::new();
        {
            let guard = self.index_guard();
            if let Some(idx) = guard.index() {
                #[allow(clippy::cast_precision_loss)]
                let cheap = idx.estimate_cost(rng) < rows as f64 * 0.5;
                if cheap {
                    let (l, h) = idx.estimate(rng);
                    low = l;
                    high = h;
                } else if self.is_sorted() {
                    match self.search_sorted_continuous(rng) {
                        Ok(hits) => {
                            low = hits;
                            high = low.clone();
                        }
                        Err(e) => debug!(
                            column = %self.name,
                            error = %e,
                            "sorted search declined; falling back to scan"
                        ),
                    }
                }
            } else if self.is_sorted() {
                match self.search_sorted_continuous(rng) {
                    Ok(hits) => {
                        low = hits;
                        high = low.clone();
                    }
                    Err(e) => debug!(
                        column = %self.name,
                        error = %e,
                        "sorted search declined; falling back to scan"
                    ),
                }
            }
        }

        // Reconcile a short answer: rows the index or search did not cover
        // are candidates, not misses.
        if low.size() != rows {
            if high.size() != low.size() {
                high = low.clone();
            }
            high.adjust_size(rows, rows);
            low.adjust_size(0, rows);
        }
        low.and_assign(eff);
        if low.size() == high.size() {
            high.and_assign(eff);
            high.minus_assign(&low);
            if high.cnt() > 0 {
                let resolved = self.scan_continuous(rng, &high)?;
                low.or_assign(&resolved);
            }
        }
        Ok(low)
    }

    /// Evaluates a membership set over the rows set in `mask`.
    ///
    /// # Errors
    ///
    /// As [`Column::evaluate_continuous`].
    pub fn evaluate_discrete(&self, rng: &DiscreteRange, mask: &Bitvector) -> Result<Bitvector> {
        if rng.is_empty() {
            return Ok(Bitvector::filled(false, mask.size()));
        }
        if matches!(self.ctype, ColumnType::Oid | ColumnType::Text) {
            return Err(Error::NotApplicable {
                name: self.name.clone(),
                ctype: self.ctype.type_word(),
            });
        }
        // A dense integer set is really a continuous range.
        if self.ctype.is_integer() {
            if let Some((min, max)) = rng.as_dense_interval() {
                let cr = ContinuousRange::new(min, RangeOp::Le, RangeOp::Le, max);
                return self.evaluate_continuous(&cr, mask);
            }
        }

        let eff = self.effective_mask(mask)?;
        match self.discrete_with_index(rng, &eff) {
            Ok(hits) => {
                debug!(
                    column = %self.name,
                    hits = hits.cnt(),
                    needles = rng.len(),
                    "evaluated membership set"
                );
                Ok(hits)
            }
            Err(e) if e.is_recoverable() => {
                warn!(column = %self.name, error = %e, "retrying membership evaluation with a scan");
                self.unload_index();
                self.scan_discrete(rng, &eff)
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn discrete_with_index(&self, rng: &DiscreteRange, eff: &Bitvector) -> Result<Bitvector> {
        let rows = self.rows();
        let elem = self.element_size().unwrap_or(4) as f64;
        let guard = self.index_guard();
        let Some(idx) = guard.index() else {
            return self.discrete_without_index(rng, eff);
        };

        let idx_cost = idx.estimate_cost_discrete(rng) * (1.0 + (rng.len() as f64).ln());
        if self.is_sorted() && idx_cost > rows as f64 {
            if let Ok(mut hits) = self.search_sorted_discrete(rng) {
                hits.adjust_size(0, rows);
                hits.and_assign(eff);
                return Ok(hits);
            }
        }
        if idx_cost > (elem + 4.0) * rows as f64 {
            // A sorted row permutation locates each needle directly.
            if let Ok(roster) = Roster::load_or_build(self) {
                if roster.is_complete() {
                    let mut hits = roster.locate(rng.values());
                    hits.and_assign(eff);
                    return Ok(hits);
                }
            }
        }

        match idx.evaluate_discrete(rng) {
            Ok(mut low) => {
                if low.size() < rows {
                    // Short index: scan the uncovered tail.
                    let mut tail = Bitvector::filled(false, low.size());
                    tail.adjust_size(rows, rows);
                    let resolved = self.scan_discrete(rng, &tail)?;
                    low.adjust_size(0, rows);
                    low.or_assign(&resolved);
                } else if low.size() > rows {
                    // A salvaged over-long index answers for rows that no
                    // longer exist.
                    low.truncate(rows);
                }
                low.and_assign(eff);
                Ok(low)
            }
            Err(e) => {
                debug!(
                    column = %self.name,
                    error = %e,
                    "index cannot answer the membership set exactly"
                );
                if self.is_sorted() {
                    if let Ok(mut hits) = self.search_sorted_discrete(rng) {
                        hits.adjust_size(0, rows);
                        hits.and_assign(eff);
                        return Ok(hits);
                    }
                }
                let (mut low, mut high) = idx.estimate_discrete(rng);
                if low.size() != rows {
                    if high.size() == low.size() || high.is_empty() {
                        high = low.clone();
                    }
                    high.adjust_size(rows, rows);
                    low.adjust_size(0, rows);
                }
                low.and_assign(eff);
                if high.size() == low.size() {
                    high.and_assign(eff);
                    if high.cnt() > low.cnt() {
                        high.minus_assign(&low);
                        if high.cnt() > 0 {
                            let resolved = self.scan_discrete(rng, &high)?;
                            low.or_assign(&resolved);
                        }
                    }
                }
                Ok(low)
            }
        }
    }

    fn discrete_without_index(&self, rng: &DiscreteRange, eff: &Bitvector) -> Result<Bitvector> {
        let rows = self.rows();
        if self.is_sorted() {
            if let Ok(mut hits) = self.search_sorted_discrete(rng) {
                hits.adjust_size(0, rows);
                hits.and_assign(eff);
                return Ok(hits);
            }
        }
        if let Ok(roster) = Roster::load_or_build(self) {
            if roster.is_complete() {
                let mut hits = roster.locate(rng.values());
                hits.and_assign(eff);
                return Ok(hits);
            }
        }
        self.scan_discrete(rng, eff)
    }

    /// Bounds the hits of `rng` with the index alone: `(certain, possible)`.
    ///
    /// Without an index, nothing is certain and every valid row is
    /// possible. On an index error the index is dropped and the same
    /// nothing-certain answer is returned.
    ///
    /// # Errors
    ///
    /// Returns IO errors from reading the null mask.
    pub fn estimate_continuous(&self, rng: &ContinuousRange) -> Result<(Bitvector, Bitvector)> {
        let rows = self.rows();
        {
            let guard = self.index_guard();
            if let Some(idx) = guard.index() {
                let (mut low, mut high) = idx.estimate(rng);
                if low.size() != rows {
                    if high.size() == low.size() || high.is_empty() {
                        high = low.clone();
                    }
                    high.adjust_size(rows, rows);
                    low.adjust_size(0, rows);
                }
                return Ok((low, high));
            }
        }
        Ok((Bitvector::filled(false, rows), self.null_mask()?))
    }

    /// Estimated cost of answering `rng`, in bytes-read units. Without an
    /// index the cost of a full scan is reported.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_cost_continuous(&self, rng: &ContinuousRange) -> f64 {
        let guard = self.index_guard();
        match guard.index() {
            Some(idx) => idx.estimate_cost(rng),
            None => self.rows() as f64 * self.element_size().unwrap_or(4) as f64,
        }
    }

    /// Estimated cost of answering a membership set, in bytes-read units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_cost_discrete(&self, rng: &DiscreteRange) -> f64 {
        let guard = self.index_guard();
        match guard.index() {
            Some(idx) => idx.estimate_cost_discrete(rng),
            None => self.rows() as f64 * self.element_size().unwrap_or(4) as f64,
        }
    }

    /// Rows the index cannot classify for `rng`, with their fraction of
    /// the total. Without an index every valid row is undecidable.
    ///
    /// # Errors
    ///
    /// Returns IO errors from reading the null mask.
    pub fn get_undecidable(&self, rng: &ContinuousRange) -> Result<(f32, Bitvector)> {
        {
            let guard = self.index_guard();
            if let Some(idx) = guard.index() {
                return Ok(idx.undecidable(rng));
            }
        }
        Ok((1.0, self.null_mask()?))
    }
}
