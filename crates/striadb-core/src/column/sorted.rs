//! Search paths for columns whose data file is sorted ascending.
//!
//! Range conditions on a sorted file reduce to two frontiers located with
//! `find` (lower bound) and `find_upper` (strict upper bound); equality
//! additionally probes the located element and walks its tie run. The same
//! frontier selection runs against an in-memory view or directly against
//! the file, where every probe reads a single element at its offset.
//!
//! Membership sets use one of two strategies chosen by cost: a single
//! linear march over the values file, or one binary search per needle.

use super::{with_fixed_type, Column};
use crate::array::{ArrayView, Element};
use crate::bitvector::Bitvector;
use crate::error::{Error, Result};
use crate::file_manager::AccessHint;
use crate::predicate::{ContinuousRange, DiscreteRange, RangeOp};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Ordered access to a sorted sequence of elements.
///
/// `find` and `find_upper` share their contract with
/// [`ArrayView::find`] and [`ArrayView::find_upper`].
pub(crate) trait SortedReader<T: Element> {
    /// Number of elements.
    fn len(&self) -> u64;

    /// Reads the element at `index`.
    fn value_at(&mut self, index: u64) -> Result<T>;

    /// Lower bound of `target`.
    fn find(&mut self, target: T) -> Result<u64>;

    /// Strict upper bound of `target`.
    fn find_upper(&mut self, target: T) -> Result<u64>;

    /// One past the last element of the tie run of `value` starting at
    /// `from`.
    fn tie_end(&mut self, from: u64, value: T) -> Result<u64> {
        let mut end = from + 1;
        while end < self.len() && self.value_at(end)? == value {
            end += 1;
        }
        Ok(end)
    }
}

/// In-memory reader over a typed view.
pub(crate) struct ViewReader<T: Element> {
    view: ArrayView<T>,
}

impl<T: Element> ViewReader<T> {
    pub(crate) fn new(view: ArrayView<T>) -> Self {
        Self { view }
    }
}

impl<T: Element> SortedReader<T> for ViewReader<T> {
    fn len(&self) -> u64 {
        self.view.len() as u64
    }

    fn value_at(&mut self, index: u64) -> Result<T> {
        Ok(self.view.get(index as usize))
    }

    fn find(&mut self, target: T) -> Result<u64> {
        Ok(self.view.find(target) as u64)
    }

    fn find_upper(&mut self, target: T) -> Result<u64> {
        Ok(self.view.find_upper(target) as u64)
    }

    fn tie_end(&mut self, _from: u64, value: T) -> Result<u64> {
        Ok(self.view.find_upper(value) as u64)
    }
}

/// Out-of-core reader probing the file one element per access.
pub(crate) struct FileSortedReader<T: Element> {
    file: File,
    len: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Element> FileSortedReader<T> {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.seek(SeekFrom::End(0))? / T::SIZE as u64;
        Ok(Self {
            file,
            len,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T: Element> SortedReader<T> for FileSortedReader<T> {
    fn len(&self) -> u64 {
        self.len
    }

    fn value_at(&mut self, index: u64) -> Result<T> {
        let mut raw = [0u8; 16];
        self.file.seek(SeekFrom::Start(index * T::SIZE as u64))?;
        self.file.read_exact(&mut raw[..T::SIZE])?;
        Ok(T::from_le_bytes(&raw[..T::SIZE]))
    }

    fn find(&mut self, target: T) -> Result<u64> {
        let mut lo = 0u64;
        let mut hi = self.len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value_at(mid)? < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn find_upper(&mut self, target: T) -> Result<u64> {
        let mut lo = 0u64;
        let mut hi = self.len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value_at(mid)? > target {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }
}

/// Locates the hits of a continuous range in a sorted sequence.
///
/// Frontier selection per operator, with fractional bounds snapped onto the
/// integer grid and bounds outside the representable range clamped before
/// any conversion. Impossible combinations produce the empty result.
pub(crate) fn sorted_range_hits<T: Element, R: SortedReader<T>>(
    reader: &mut R,
    rng: &ContinuousRange,
) -> Result<Bitvector> {
    let n = reader.len();
    if !rng.left_op.is_defined() && !rng.right_op.is_defined() {
        return Err(Error::EmptyRange("sorted search".to_string()));
    }
    // A NaN bound satisfies no comparison.
    if (rng.left_op.is_defined() && rng.left_bound.is_nan())
        || (rng.right_op.is_defined() && rng.right_bound.is_nan())
    {
        return Ok(Bitvector::filled(false, n));
    }

    // Equality pins the range to a single value; the other side degrades to
    // a feasibility check on the bounds themselves.
    let eq_value = match (rng.left_op, rng.right_op) {
        (RangeOp::Eq, RangeOp::Eq) => {
            if rng.left_bound == rng.right_bound {
                Some(rng.left_bound)
            } else {
                return Ok(Bitvector::filled(false, n));
            }
        }
        (RangeOp::Eq, _) => {
            let ok = match rng.right_op {
                RangeOp::Lt => rng.left_bound < rng.right_bound,
                RangeOp::Le => rng.left_bound <= rng.right_bound,
                RangeOp::Gt => rng.left_bound > rng.right_bound,
                RangeOp::Ge => rng.left_bound >= rng.right_bound,
                _ => true,
            };
            if ok {
                Some(rng.left_bound)
            } else {
                return Ok(Bitvector::filled(false, n));
            }
        }
        (_, RangeOp::Eq) => {
            let ok = match rng.left_op {
                RangeOp::Lt => rng.left_bound < rng.right_bound,
                RangeOp::Le => rng.left_bound <= rng.right_bound,
                RangeOp::Gt => rng.left_bound > rng.right_bound,
                RangeOp::Ge => rng.left_bound >= rng.right_bound,
                _ => true,
            };
            if ok {
                Some(rng.right_bound)
            } else {
                return Ok(Bitvector::filled(false, n));
            }
        }
        _ => None,
    };
    if let Some(value) = eq_value {
        return equality_hits(reader, value);
    }

    let mut start = 0u64;
    let mut end = n;
    // `a < col` and `col > b` open the left frontier; `a > col` and
    // `col < b` close the right one. `first_ge` and `first_gt` carry the
    // inclusive/exclusive tie-breaks.
    match rng.left_op {
        RangeOp::Lt => start = start.max(first_gt(reader, rng.left_bound)?),
        RangeOp::Le => start = start.max(first_ge(reader, rng.left_bound)?),
        RangeOp::Gt => end = end.min(first_ge(reader, rng.left_bound)?),
        RangeOp::Ge => end = end.min(first_gt(reader, rng.left_bound)?),
        _ => {}
    }
    match rng.right_op {
        RangeOp::Lt => end = end.min(first_ge(reader, rng.right_bound)?),
        RangeOp::Le => end = end.min(first_gt(reader, rng.right_bound)?),
        RangeOp::Gt => start = start.max(first_gt(reader, rng.right_bound)?),
        RangeOp::Ge => start = start.max(first_ge(reader, rng.right_bound)?),
        _ => {}
    }

    Ok(range_bits(start, end.min(n), n))
}

/// First index with `value > bound`.
fn first_gt<T: Element, R: SortedReader<T>>(reader: &mut R, bound: f64) -> Result<u64> {
    if bound < T::MIN_REPR {
        return Ok(0);
    }
    if bound >= T::MAX_REPR {
        return Ok(reader.len());
    }
    reader.find_upper(T::from_f64_floor(bound))
}

/// First index with `value >= bound`.
fn first_ge<T: Element, R: SortedReader<T>>(reader: &mut R, bound: f64) -> Result<u64> {
    if bound <= T::MIN_REPR {
        return Ok(0);
    }
    if bound > T::MAX_REPR {
        return Ok(reader.len());
    }
    reader.find(T::from_f64_ceil(bound))
}

#[allow(clippy::float_cmp)]
fn equality_hits<T: Element, R: SortedReader<T>>(reader: &mut R, value: f64) -> Result<Bitvector> {
    let n = reader.len();
    if value < T::MIN_REPR || value > T::MAX_REPR {
        return Ok(Bitvector::filled(false, n));
    }
    let t = T::from_f64_trunc(value);
    if t.to_f64() != value {
        // The bound is not representable in the column type.
        return Ok(Bitvector::filled(false, n));
    }
    let lo = reader.find(t)?;
    if lo < n && reader.value_at(lo)? == t {
        let hi = reader.tie_end(lo, t)?;
        Ok(range_bits(lo, hi, n))
    } else {
        Ok(Bitvector::filled(false, n))
    }
}

fn range_bits(start: u64, end: u64, n: u64) -> Bitvector {
    let mut hits = Bitvector::new();
    if start < end {
        hits.append_fill(false, start);
        hits.append_fill(true, end - start);
    }
    hits.adjust_size(0, n);
    hits
}

/// Marks the members of a sorted needle list in a sorted in-memory view.
///
/// A linear march wins when `k * (1 + ln rows) >= k + rows`; otherwise one
/// binary search per needle.
pub(crate) fn sorted_discrete_hits<T: Element>(
    view: &ArrayView<T>,
    rng: &DiscreteRange,
) -> Bitvector {
    let needles = rng.values();
    let n = view.len();
    let mut hits = Bitvector::new();
    #[allow(clippy::cast_precision_loss)]
    let march = needles.len() as f64 * (1.0 + (n.max(1) as f64).ln())
        >= (needles.len() + n) as f64;
    if march {
        let mut ju = 0usize;
        let mut jv = 0usize;
        while ju < needles.len() && jv < n {
            let v = view.get(jv).to_f64();
            if needles[ju] < v {
                ju += 1;
            } else if needles[ju] > v {
                jv += 1;
            } else {
                push_bit_at(&mut hits, jv as u64);
                jv += 1;
            }
        }
    } else {
        for &needle in needles {
            if needle < T::MIN_REPR || needle > T::MAX_REPR {
                continue;
            }
            let t = T::from_f64_trunc(needle);
            #[allow(clippy::float_cmp)]
            if t.to_f64() != needle {
                continue;
            }
            let mut loc = view.find(t);
            while loc < n && view.get(loc) == t {
                push_bit_at(&mut hits, loc as u64);
                loc += 1;
            }
        }
    }
    hits.adjust_size(0, n as u64);
    hits
}

/// Sequential membership scan of a sorted file, for data too large to
/// materialize. Reads fixed chunks and marches both cursors.
pub(crate) fn sorted_discrete_file<T: Element>(
    path: &Path,
    rng: &DiscreteRange,
) -> Result<Bitvector> {
    const CHUNK: usize = 8192;
    let needles = rng.values();
    let mut file = File::open(path)?;
    let nrows = file.metadata()?.len() / T::SIZE as u64;

    let mut hits = Bitvector::new();
    let mut buf = vec![0u8; CHUNK * T::SIZE];
    let mut ju = 0usize;
    let mut row = 0u64;
    'outer: loop {
        let read = read_some(&mut file, &mut buf)?;
        if read == 0 {
            break;
        }
        for chunk in buf[..read].chunks_exact(T::SIZE) {
            let v = T::from_le_bytes(chunk).to_f64();
            while ju < needles.len() && needles[ju] < v {
                ju += 1;
            }
            if ju >= needles.len() {
                break 'outer;
            }
            #[allow(clippy::float_cmp)]
            if needles[ju] == v {
                push_bit_at(&mut hits, row);
            }
            row += 1;
        }
    }
    hits.adjust_size(0, nrows);
    Ok(hits)
}

fn read_some(file: &mut File, buf: &mut [u8]) -> Result<usize> {
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

fn push_bit_at(hits: &mut Bitvector, pos: u64) {
    if pos > hits.size() {
        hits.append_fill(false, pos - hits.size());
    }
    hits.append_fill(true, 1);
}

impl Column {
    /// Exact hits of a continuous range against the sorted data file.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedSortedType` for OID and TEXT columns, the
    /// empty-range error when both operators are undefined, and IO errors
    /// from either read path.
    pub(crate) fn search_sorted_continuous(&self, rng: &ContinuousRange) -> Result<Bitvector> {
        let path = self.data_file();
        with_fixed_type!(
            self.ctype,
            T => match self.ctx.files().get_file(&path, AccessHint::MmapLargeFiles) {
                Ok(block) => {
                    let mut reader = ViewReader::new(ArrayView::<T>::new(block));
                    sorted_range_hits(&mut reader, rng)
                }
                Err(_) => {
                    debug!(column = %self.name, "sorted search probing out of core");
                    let mut reader = FileSortedReader::<T>::open(&path)?;
                    sorted_range_hits(&mut reader, rng)
                }
            },
            Err(Error::UnsupportedSortedType(self.ctype.type_word()))
        )
    }

    /// Exact hits of a membership set against the sorted data file.
    ///
    /// # Errors
    ///
    /// As [`Column::search_sorted_continuous`].
    pub(crate) fn search_sorted_discrete(&self, rng: &DiscreteRange) -> Result<Bitvector> {
        let path = self.data_file();
        with_fixed_type!(
            self.ctype,
            T => match self.ctx.files().get_file(&path, AccessHint::MmapLargeFiles) {
                Ok(block) => Ok(sorted_discrete_hits(&ArrayView::<T>::new(block), rng)),
                Err(_) => sorted_discrete_file::<T>(&path, rng),
            },
            Err(Error::UnsupportedSortedType(self.ctype.type_word()))
        )
    }

    /// Checks ascending order of the valid rows, for the sort-flag
    /// verification policy.
    pub(crate) fn verify_ascending(&self) -> Result<()> {
        let mask = self.null_mask()?;
        let values = self.select_values(&mask)?.to_f64_vec();
        for pair in values.windows(2) {
            if pair[0] > pair[1] {
                return Err(Error::Invariant(format!(
                    "column '{}' declared sorted but holds {} before {}",
                    self.name, pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayView;
    use crate::file_manager::FileBlock;
    use std::sync::Arc;

    fn view_of<T: Element>(values: &[T]) -> ArrayView<T> {
        let mut bytes = Vec::new();
        for &v in values {
            v.write_le_bytes(&mut bytes);
        }
        ArrayView::new(Arc::new(FileBlock::Heap(bytes)))
    }

    fn hits_of(bv: &Bitvector) -> Vec<u64> {
        bv.set_positions().collect()
    }

    fn brute<T: Element>(values: &[T], rng: &ContinuousRange) -> Vec<u64> {
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| rng.contains(v.to_f64()))
            .map(|(i, _)| i as u64)
            .collect()
    }

    fn check_against_brute(values: &[u32], rng: &ContinuousRange) {
        let mut reader = ViewReader::new(view_of(values));
        let hits = sorted_range_hits(&mut reader, rng).unwrap();
        assert_eq!(hits.size(), values.len() as u64);
        assert_eq!(hits_of(&hits), brute(values, rng), "range {rng}");
    }

    #[test]
    fn test_two_sided_ranges_match_brute_force() {
        let values: Vec<u32> = vec![1, 2, 2, 2, 5, 7, 7, 9, 12, 12];
        let ops = [RangeOp::Lt, RangeOp::Le, RangeOp::Gt, RangeOp::Ge];
        for &left in &ops {
            for &right in &ops {
                for a in [0.0, 2.0, 2.5, 7.0, 13.0] {
                    for b in [1.0, 5.0, 6.5, 12.0] {
                        check_against_brute(&values, &ContinuousRange::new(a, left, right, b));
                    }
                }
            }
        }
    }

    #[test]
    fn test_one_sided_ranges() {
        let values: Vec<u32> = (0..100).map(|i| i * 2).collect();
        check_against_brute(&values, &ContinuousRange::less_than(51.0));
        check_against_brute(&values, &ContinuousRange::at_most(50.0));
        check_against_brute(&values, &ContinuousRange::greater_than(120.0));
        check_against_brute(&values, &ContinuousRange::at_least(121.0));
    }

    #[test]
    fn test_equality_with_ties() {
        let values: Vec<u32> = vec![1, 3, 3, 3, 8];
        let mut reader = ViewReader::new(view_of(&values));
        let hits = sorted_range_hits(&mut reader, &ContinuousRange::equals(3.0)).unwrap();
        assert_eq!(hits_of(&hits), vec![1, 2, 3]);

        let hits = sorted_range_hits(&mut reader, &ContinuousRange::equals(3.5)).unwrap();
        assert_eq!(hits.cnt(), 0);
    }

    #[test]
    fn test_equality_combined_with_bound() {
        // 2 < col = 3 is satisfiable, 4 < col = 3 is not.
        let values: Vec<u32> = vec![1, 3, 3, 5];
        let mut reader = ViewReader::new(view_of(&values));
        let ok = ContinuousRange::new(2.0, RangeOp::Lt, RangeOp::Eq, 3.0);
        assert_eq!(
            hits_of(&sorted_range_hits(&mut reader, &ok).unwrap()),
            vec![1, 2]
        );
        let impossible = ContinuousRange::new(4.0, RangeOp::Lt, RangeOp::Eq, 3.0);
        assert_eq!(sorted_range_hits(&mut reader, &impossible).unwrap().cnt(), 0);
    }

    #[test]
    fn test_impossible_range_is_empty() {
        let values: Vec<u32> = (1..=10).collect();
        // 8 < col < 3 keeps nothing.
        let rng = ContinuousRange::new(8.0, RangeOp::Lt, RangeOp::Lt, 3.0);
        let mut reader = ViewReader::new(view_of(&values));
        assert_eq!(sorted_range_hits(&mut reader, &rng).unwrap().cnt(), 0);
    }

    #[test]
    fn test_undefined_both_sides_is_an_error() {
        let values: Vec<u32> = vec![1, 2];
        let mut reader = ViewReader::new(view_of(&values));
        let rng = ContinuousRange::new(0.0, RangeOp::Undefined, RangeOp::Undefined, 0.0);
        assert!(matches!(
            sorted_range_hits(&mut reader, &rng),
            Err(Error::EmptyRange(_))
        ));
    }

    #[test]
    fn test_negative_fractional_bounds() {
        let values: Vec<i32> = vec![-5, -3, -2, -2, 0, 4];
        let rng = ContinuousRange::greater_than(-2.5);
        let mut reader = ViewReader::new(view_of(&values));
        assert_eq!(hits_of(&sorted_range_hits(&mut reader, &rng).unwrap()), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_bounds_outside_type_range() {
        let values: Vec<u8> = vec![0, 1, 200, 255];
        let mut reader = ViewReader::new(view_of(&values));
        let all = sorted_range_hits(&mut reader, &ContinuousRange::greater_than(-10.0)).unwrap();
        assert_eq!(all.cnt(), 4);
        let none = sorted_range_hits(&mut reader, &ContinuousRange::greater_than(300.0)).unwrap();
        assert_eq!(none.cnt(), 0);
    }

    #[test]
    fn test_out_of_core_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vals");
        let values: Vec<u32> = (0..500).map(|i| i / 3).collect();
        let mut bytes = Vec::new();
        for &v in &values {
            v.write_le_bytes(&mut bytes);
        }
        std::fs::write(&path, &bytes).unwrap();

        for rng in [
            ContinuousRange::between(10.0, 40.0),
            ContinuousRange::equals(33.0),
            ContinuousRange::less_than(5.5),
            ContinuousRange::new(100.0, RangeOp::Lt, RangeOp::Le, 120.0),
        ] {
            let mut mem = ViewReader::new(view_of(&values));
            let mut ooc = FileSortedReader::<u32>::open(&path).unwrap();
            let expected = sorted_range_hits(&mut mem, &rng).unwrap();
            let actual = sorted_range_hits(&mut ooc, &rng).unwrap();
            assert_eq!(hits_of(&actual), hits_of(&expected), "range {rng}");
        }
    }

    #[test]
    fn test_discrete_march_and_binary_agree() {
        let values: Vec<u32> = (1..=12).collect();
        let needles = DiscreteRange::new(vec![2.0, 3.0, 5.0, 7.0, 11.0]);
        let hits = sorted_discrete_hits(&view_of(&values), &needles);
        assert_eq!(hits_of(&hits), vec![1, 2, 4, 6, 10]);

        // Few needles over many rows takes the binary-search path.
        let large: Vec<u32> = (0..10_000).collect();
        let sparse = DiscreteRange::new(vec![17.0, 4096.0]);
        let hits = sorted_discrete_hits(&view_of(&large), &sparse);
        assert_eq!(hits_of(&hits), vec![17, 4096]);
    }

    #[test]
    fn test_discrete_marks_whole_tie_runs() {
        let values: Vec<u32> = vec![1, 4, 4, 4, 9];
        let needles = DiscreteRange::new(vec![4.0]);
        let hits = sorted_discrete_hits(&view_of(&values), &needles);
        assert_eq!(hits_of(&hits), vec![1, 2, 3]);
    }

    #[test]
    fn test_discrete_file_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vals");
        let values: Vec<u16> = (0..1000).map(|i| i / 2).collect();
        let mut bytes = Vec::new();
        for &v in &values {
            v.write_le_bytes(&mut bytes);
        }
        std::fs::write(&path, &bytes).unwrap();

        let needles = DiscreteRange::new(vec![0.0, 250.0, 499.0]);
        let hits = sorted_discrete_file::<u16>(&path, &needles).unwrap();
        assert_eq!(hits_of(&hits), vec![0, 1, 500, 501, 998, 999]);
    }
}
