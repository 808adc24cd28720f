//! A range-binned bitmap index.
//!
//! Values are sliced into equal-width bins between the observed minimum and
//! maximum; each bin carries a compressed bitvector of its rows plus the
//! actual value range inside the bin. A range condition resolves to the
//! union of fully-covered bins (certain hits) and boundary bins (the
//! candidate band a follow-up scan decides).
//!
//! The on-disk blob is a versioned bincode record in `<column>.idx`.

use super::ColumnIndex;
use crate::array::Element;
use crate::bitvector::Bitvector;
use crate::column::{with_fixed_type, ColumnType};
use crate::error::{Error, Result};
use crate::predicate::{ContinuousRange, DiscreteRange, RangeOp};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Version tag of the serialized blob.
const FORMAT: u32 = 1;

#[derive(Serialize, Deserialize)]
struct BinnedCore {
    format: u32,
    column: String,
    ctype: ColumnType,
    nrows: u64,
    /// `nbins + 1` edges; `edges[0]` is the observed minimum.
    edges: Vec<f64>,
    /// Actual smallest value in each bin; NaN for an empty bin.
    mins: Vec<f64>,
    /// Actual largest value in each bin; NaN for an empty bin.
    maxs: Vec<f64>,
    bitmaps: Vec<Bitvector>,
    sum: f64,
}

/// Leading fields of the blob. Must stay a prefix of [`BinnedCore`]'s
/// layout so the row count can be read without the bitmaps.
#[derive(Deserialize)]
struct BlobHeader {
    format: u32,
    _column: String,
    _ctype: ColumnType,
    nrows: u64,
}

/// Equal-width binned bitmap index over one column.
pub struct BinnedIndex {
    core: BinnedCore,
}

impl BinnedIndex {
    /// Builds the index from the valid values of a column.
    ///
    /// `values` and `rows` are aligned; positions must be ascending.
    pub(crate) fn build(
        column: &str,
        ctype: ColumnType,
        nrows: u64,
        nbins: usize,
        values: &[f64],
        rows: &[u64],
    ) -> Self {
        let nbins = nbins.max(1);
        let finite = values.iter().copied().filter(|v| !v.is_nan());
        let min = finite.clone().fold(f64::INFINITY, f64::min);
        let max = finite.fold(f64::NEG_INFINITY, f64::max);
        let (min, max) = if min > max { (0.0, 0.0) } else { (min, max) };

        #[allow(clippy::cast_precision_loss)]
        let edges: Vec<f64> = (0..=nbins)
            .map(|i| min + (max - min) * i as f64 / nbins as f64)
            .collect();

        let mut positions: Vec<Vec<u64>> = vec![Vec::new(); nbins];
        let mut mins = vec![f64::NAN; nbins];
        let mut maxs = vec![f64::NAN; nbins];
        let mut sum = 0.0;
        for (&v, &row) in values.iter().zip(rows) {
            if v.is_nan() {
                continue;
            }
            let j = bin_of(&edges, v);
            positions[j].push(row);
            if mins[j].is_nan() || v < mins[j] {
                mins[j] = v;
            }
            if maxs[j].is_nan() || v > maxs[j] {
                maxs[j] = v;
            }
            sum += v;
        }
        let bitmaps = positions
            .into_iter()
            .map(|p| Bitvector::from_sorted_positions(p, nrows))
            .collect();

        Self {
            core: BinnedCore {
                format: FORMAT,
                column: column.to_string(),
                ctype,
                nrows,
                edges,
                mins,
                maxs,
                bitmaps,
                sum,
            },
        }
    }

    /// Reads the blob from `path`.
    ///
    /// # Errors
    ///
    /// Returns IO errors, serialization errors, or an index fault for an
    /// unsupported format version.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let core: BinnedCore = bincode::deserialize_from(BufReader::new(file))?;
        if core.format != FORMAT {
            return Err(Error::IndexFault(format!(
                "unsupported index blob format {} in '{}'",
                core.format,
                path.display()
            )));
        }
        Ok(Self { core })
    }

    /// Number of rows the blob in `path` covers, read from the leading
    /// fields without materializing the bitmaps.
    ///
    /// # Errors
    ///
    /// Returns IO errors, serialization errors, or an index fault for an
    /// unsupported format version.
    pub(crate) fn peek_nrows(path: &Path) -> Result<u64> {
        let file = File::open(path)?;
        let header: BlobHeader = bincode::deserialize_from(BufReader::new(file))?;
        if header.format != FORMAT {
            return Err(Error::IndexFault(format!(
                "unsupported index blob format {} in '{}'",
                header.format,
                path.display()
            )));
        }
        Ok(header.nrows)
    }

    fn nbins(&self) -> usize {
        self.core.bitmaps.len()
    }

    /// Certain and possible bins for a continuous range.
    fn classify(&self, rng: &ContinuousRange) -> (Bitvector, Bitvector) {
        let mut sure = Bitvector::filled(false, self.core.nrows);
        let mut possible = Bitvector::filled(false, self.core.nrows);
        for j in 0..self.nbins() {
            let (lo, hi) = (self.core.mins[j], self.core.maxs[j]);
            if lo.is_nan() {
                continue;
            }
            if rng.contains(lo) && rng.contains(hi) && !excludes_interior(rng, lo, hi) {
                sure.or_assign(&self.core.bitmaps[j]);
                possible.or_assign(&self.core.bitmaps[j]);
            } else if interval_may_intersect(rng, lo, hi) {
                possible.or_assign(&self.core.bitmaps[j]);
            }
        }
        (sure, possible)
    }

    fn classify_discrete(&self, rng: &DiscreteRange) -> (Bitvector, Bitvector) {
        let mut sure = Bitvector::filled(false, self.core.nrows);
        let mut possible = Bitvector::filled(false, self.core.nrows);
        for j in 0..self.nbins() {
            let (lo, hi) = (self.core.mins[j], self.core.maxs[j]);
            if lo.is_nan() {
                continue;
            }
            let touches = rng
                .values()
                .iter()
                .any(|&v| v >= lo && v <= hi);
            if !touches {
                continue;
            }
            #[allow(clippy::float_cmp)]
            if lo == hi && rng.contains(lo) {
                // Single-valued bin, fully decided.
                sure.or_assign(&self.core.bitmaps[j]);
            }
            possible.or_assign(&self.core.bitmaps[j]);
        }
        (sure, possible)
    }

    fn element_size(&self) -> u64 {
        self.core.ctype.element_size().unwrap_or(4) as u64
    }
}

/// Maps a value into its bin index, clamping outliers into the edge bins.
fn bin_of(edges: &[f64], v: f64) -> usize {
    let nbins = edges.len() - 1;
    let (min, max) = (edges[0], edges[nbins]);
    if v <= min || max <= min {
        return 0;
    }
    if v >= max {
        return nbins - 1;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let j = ((v - min) / (max - min) * nbins as f64) as usize;
    j.min(nbins - 1)
}

/// True when the predicate is an equality pinning a value strictly inside
/// `(lo, hi)`; endpoint containment alone would misclassify such a bin as
/// fully covered.
fn excludes_interior(rng: &ContinuousRange, lo: f64, hi: f64) -> bool {
    let eq = |op: RangeOp, bound: f64| op == RangeOp::Eq && bound > lo && bound < hi;
    eq(rng.left_op, rng.left_bound) || eq(rng.right_op, rng.right_bound)
}

/// True when some value of `[lo, hi]` may satisfy the predicate.
fn interval_may_intersect(rng: &ContinuousRange, lo: f64, hi: f64) -> bool {
    rng.contains(lo)
        || rng.contains(hi)
        || (rng.left_op.is_defined() && rng.left_bound >= lo && rng.left_bound <= hi)
        || (rng.right_op.is_defined() && rng.right_bound >= lo && rng.right_bound <= hi)
}

impl ColumnIndex for BinnedIndex {
    fn name(&self) -> &'static str {
        "binned"
    }

    fn nrows(&self) -> u64 {
        self.core.nrows
    }

    fn estimate_cost(&self, rng: &ContinuousRange) -> f64 {
        let (sure, possible) = self.classify(rng);
        let residual = possible.cnt() - sure.cnt();
        #[allow(clippy::cast_precision_loss)]
        let bitmap_bytes: f64 = self
            .core
            .bitmaps
            .iter()
            .map(|b| b.bytes() as f64)
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let cost = bitmap_bytes + residual as f64 * self.element_size() as f64;
        cost
    }

    fn estimate_cost_discrete(&self, rng: &DiscreteRange) -> f64 {
        let (sure, possible) = self.classify_discrete(rng);
        let residual = possible.cnt() - sure.cnt();
        #[allow(clippy::cast_precision_loss)]
        let cost = residual as f64 * self.element_size() as f64
            + self.core.bitmaps.iter().map(|b| b.bytes() as f64).sum::<f64>();
        cost
    }

    fn estimate(&self, rng: &ContinuousRange) -> (Bitvector, Bitvector) {
        self.classify(rng)
    }

    fn evaluate(&self, rng: &ContinuousRange) -> Result<Bitvector> {
        let (sure, possible) = self.classify(rng);
        if possible.cnt() > sure.cnt() {
            return Err(Error::IndexFault(format!(
                "{} boundary rows undecided by the binned index",
                possible.cnt() - sure.cnt()
            )));
        }
        Ok(sure)
    }

    fn estimate_discrete(&self, rng: &DiscreteRange) -> (Bitvector, Bitvector) {
        self.classify_discrete(rng)
    }

    fn evaluate_discrete(&self, rng: &DiscreteRange) -> Result<Bitvector> {
        let (sure, possible) = self.classify_discrete(rng);
        if possible.cnt() > sure.cnt() {
            return Err(Error::IndexFault(format!(
                "{} boundary rows undecided by the binned index",
                possible.cnt() - sure.cnt()
            )));
        }
        Ok(sure)
    }

    fn undecidable(&self, rng: &ContinuousRange) -> (f32, Bitvector) {
        let (sure, possible) = self.classify(rng);
        let iffy = possible.minus(&sure);
        #[allow(clippy::cast_precision_loss)]
        let fraction = if self.core.nrows == 0 {
            0.0
        } else {
            iffy.cnt() as f32 / self.core.nrows as f32
        };
        (fraction, iffy)
    }

    fn expand_range(&self, rng: &mut ContinuousRange) -> bool {
        let mut changed = false;
        if matches!(rng.left_op, RangeOp::Lt | RangeOp::Le) {
            let snapped = snap_down(&self.core.edges, rng.left_bound);
            changed |= snapped != rng.left_bound;
            rng.left_bound = snapped;
        }
        if matches!(rng.right_op, RangeOp::Lt | RangeOp::Le) {
            let snapped = snap_up(&self.core.edges, rng.right_bound);
            changed |= snapped != rng.right_bound;
            rng.right_bound = snapped;
        }
        changed
    }

    fn contract_range(&self, rng: &mut ContinuousRange) -> bool {
        let mut changed = false;
        if matches!(rng.left_op, RangeOp::Lt | RangeOp::Le) {
            let snapped = snap_up(&self.core.edges, rng.left_bound);
            changed |= snapped != rng.left_bound;
            rng.left_bound = snapped;
        }
        if matches!(rng.right_op, RangeOp::Lt | RangeOp::Le) {
            let snapped = snap_down(&self.core.edges, rng.right_bound);
            changed |= snapped != rng.right_bound;
            rng.right_bound = snapped;
        }
        changed
    }

    fn bin_boundaries(&self) -> Vec<f64> {
        self.core.edges[1..].to_vec()
    }

    fn bin_weights(&self) -> Vec<u32> {
        self.core
            .bitmaps
            .iter()
            .map(|b| u32::try_from(b.cnt()).unwrap_or(u32::MAX))
            .collect()
    }

    fn get_min(&self) -> f64 {
        self.core
            .mins
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.min(v) })
    }

    fn get_max(&self) -> f64 {
        self.core
            .maxs
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.max(v) })
    }

    fn get_sum(&self) -> f64 {
        self.core.sum
    }

    fn append(&mut self, dest_dir: &Path, _src_dir: &Path, nnew: u64) -> Result<u64> {
        let elem = self.core.ctype.element_size().ok_or_else(|| {
            Error::IndexFault("binned index cannot extend over a TEXT column".to_string())
        })?;
        let path = dest_dir.join(&self.core.column);
        let mut file = File::open(&path)?;
        // The destination file was extended before the index; the appended
        // values sit at the old row offset.
        file.seek(SeekFrom::Start(self.core.nrows * elem as u64))?;
        let mut raw = vec![0u8; usize::try_from(nnew).unwrap_or(0) * elem];
        let got = read_fully(&mut file, &mut raw)?;
        raw.truncate(got - got % elem);

        let nold = self.core.nrows;
        let nrows = nold + nnew;
        let mut new_positions: Vec<Vec<u64>> = vec![Vec::new(); self.nbins()];
        let mut appended = 0u64;
        for (i, chunk) in raw.chunks_exact(elem).enumerate() {
            let v = with_fixed_type!(
                self.core.ctype,
                T => <T as crate::array::Element>::from_le_bytes(chunk).to_f64(),
                return Err(Error::IndexFault(
                    "binned index cannot extend over this column type".to_string()
                ))
            );
            let j = bin_of(&self.core.edges, v);
            new_positions[j].push(nold + i as u64);
            if self.core.mins[j].is_nan() || v < self.core.mins[j] {
                self.core.mins[j] = v;
            }
            if self.core.maxs[j].is_nan() || v > self.core.maxs[j] {
                self.core.maxs[j] = v;
            }
            self.core.sum += v;
            appended += 1;
        }
        for (bitmap, positions) in self.core.bitmaps.iter_mut().zip(new_positions) {
            bitmap.adjust_size(0, nrows);
            if !positions.is_empty() {
                bitmap.or_assign(&Bitvector::from_sorted_positions(positions, nrows));
            }
        }
        self.core.nrows = nrows;
        debug!(
            column = %self.core.column,
            appended, nrows, "extended binned index"
        );
        Ok(appended)
    }

    fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(format!("{}.idx", self.core.column));
        let file = File::create(&path)?;
        bincode::serialize_into(BufWriter::new(file), &self.core)?;
        Ok(())
    }
}

/// Largest edge at or below `v`, or `v` when none exists.
fn snap_down(edges: &[f64], v: f64) -> f64 {
    let e = edges
        .iter()
        .copied()
        .filter(|&e| e <= v)
        .fold(f64::NEG_INFINITY, f64::max);
    if e.is_finite() {
        e
    } else {
        v
    }
}

/// Smallest edge at or above `v`, or `v` when none exists.
fn snap_up(edges: &[f64], v: f64) -> f64 {
    let e = edges
        .iter()
        .copied()
        .filter(|&e| e >= v)
        .fold(f64::INFINITY, f64::min);
    if e.is_finite() {
        e
    } else {
        v
    }
}

fn read_fully(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Element;

    fn index_over(values: &[u32], nbins: usize) -> BinnedIndex {
        let f64s: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
        let rows: Vec<u64> = (0..values.len() as u64).collect();
        BinnedIndex::build("v", ColumnType::U32, values.len() as u64, nbins, &f64s, &rows)
    }

    #[test]
    fn test_estimate_brackets_true_hits() {
        let values: Vec<u32> = (0..200).map(|i| (i * 13) % 100).collect();
        let index = index_over(&values, 8);
        let rng = ContinuousRange::between(25.0, 60.0);
        let (sure, possible) = index.estimate(&rng);
        assert_eq!(sure.size(), 200);
        assert_eq!(possible.size(), 200);

        for (i, &v) in values.iter().enumerate() {
            let hit = rng.contains(f64::from(v));
            if sure.get(i as u64) {
                assert!(hit, "certain row {i} must satisfy the range");
            }
            if hit {
                assert!(possible.get(i as u64), "hit row {i} must be possible");
            }
        }
    }

    #[test]
    fn test_evaluate_refuses_boundary_bins() {
        let values: Vec<u32> = (0..100).collect();
        let index = index_over(&values, 4);
        // A range cutting through a bin leaves undecided rows.
        assert!(index.evaluate(&ContinuousRange::between(10.0, 60.0)).is_err());
        // A range covering everything is decided exactly.
        let all = index.evaluate(&ContinuousRange::at_least(0.0)).unwrap();
        assert_eq!(all.cnt(), 100);
    }

    #[test]
    fn test_undecidable_fraction() {
        let values: Vec<u32> = (0..100).collect();
        let index = index_over(&values, 4);
        let (fraction, iffy) = index.undecidable(&ContinuousRange::between(10.0, 60.0));
        assert!(fraction > 0.0 && fraction <= 1.0);
        assert_eq!(iffy.size(), 100);
        let (none, _) = index.undecidable(&ContinuousRange::at_least(0.0));
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_min_max_sum_and_weights() {
        let values: Vec<u32> = vec![5, 9, 1, 7];
        let index = index_over(&values, 3);
        assert_eq!(index.get_min(), 1.0);
        assert_eq!(index.get_max(), 9.0);
        assert_eq!(index.get_sum(), 22.0);
        assert_eq!(index.bin_weights().iter().sum::<u32>(), 4);
        assert_eq!(index.bin_boundaries().len(), 3);
        assert_eq!(index.nrows(), 4);
    }

    #[test]
    fn test_expand_and_contract_snap_to_edges() {
        let values: Vec<u32> = (0..100).collect();
        let index = index_over(&values, 10);
        let mut rng = ContinuousRange::between(12.0, 57.0);
        assert!(index.expand_range(&mut rng));
        let edges = {
            let mut e = index.bin_boundaries();
            e.insert(0, index.get_min());
            e
        };
        assert!(edges.iter().any(|&e| e == rng.left_bound));
        assert!(edges.iter().any(|&e| e == rng.right_bound));
        assert!(rng.left_bound <= 12.0 && rng.right_bound >= 57.0);

        let mut rng = ContinuousRange::between(12.0, 57.0);
        index.contract_range(&mut rng);
        assert!(rng.left_bound >= 12.0 && rng.right_bound <= 57.0);
    }

    #[test]
    fn test_blob_roundtrip_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<u32> = (0..50).collect();
        let index = index_over(&values, 5);
        index.write(dir.path()).unwrap();

        // Lay down the data file the append will read from.
        let mut bytes = Vec::new();
        for v in 0..50u32 {
            v.write_le_bytes(&mut bytes);
        }
        for v in [10u32, 48, 3] {
            v.write_le_bytes(&mut bytes);
        }
        std::fs::write(dir.path().join("v"), &bytes).unwrap();

        assert_eq!(BinnedIndex::peek_nrows(&dir.path().join("v.idx")).unwrap(), 50);
        let mut back = BinnedIndex::read(&dir.path().join("v.idx")).unwrap();
        assert_eq!(back.nrows(), 50);
        let appended = back.append(dir.path(), dir.path(), 3).unwrap();
        assert_eq!(appended, 3);
        assert_eq!(back.nrows(), 53);
        assert_eq!(back.bin_weights().iter().sum::<u32>(), 53);

        // Membership of the appended rows is reflected in the estimates.
        let (_, possible) = back.estimate(&ContinuousRange::equals(10.0));
        assert!(possible.get(50));
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.idx");
        std::fs::write(&path, b"not an index").unwrap();
        assert!(BinnedIndex::read(&path).is_err());
        assert!(BinnedIndex::peek_nrows(&path).is_err());
    }
}
