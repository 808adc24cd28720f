//! Word-aligned run-length compressed bitvector.
//!
//! The in-memory and on-disk representation packs bits into 31-bit groups.
//! A group is stored either as a *literal* word (bit 31 clear, low 31 bits
//! holding the group LSB-first) or folded into a *fill* word (bit 31 set,
//! bit 30 carrying the fill value, low 30 bits counting consecutive
//! identical groups). Bits past the last whole group live in an uncompressed
//! *active* word.
//!
//! # On-disk format
//!
//! `write` serializes little-endian `u32`s: a word count, the compressed
//! words, the active word, and the number of bits in the active word. An
//! absent mask file is interpreted by callers as all-ones.
//!
//! A bitvector is not thread-safe; callers provide their own locking.

mod iter;

pub use iter::{IndexSet, IndexSetIter, PositionIter};

use crate::error::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Bits per compressed group.
pub(crate) const GROUP_BITS: u32 = 31;
/// Marks a word as a fill.
const FILL_FLAG: u32 = 1 << 31;
/// Carries the fill value inside a fill word.
const FILL_ONE: u32 = 1 << 30;
/// Maximum number of groups a single fill word can count.
const MAX_FILL_GROUPS: u32 = FILL_ONE - 1;
/// Low 31 bits of a word.
pub(crate) const GROUP_MASK: u32 = 0x7FFF_FFFF;

/// A compressed sequence of boolean values.
#[derive(Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Bitvector {
    words: Vec<u32>,
    active_val: u32,
    active_bits: u32,
    nbits: u64,
}

impl Bitvector {
    /// Creates an empty bitvector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bitvector of `n` copies of `value`.
    #[must_use]
    pub fn filled(value: bool, n: u64) -> Self {
        let mut bv = Self::new();
        bv.append_fill(value, n);
        bv
    }

    /// Builds a bitvector of size `n` with ones at the given positions.
    ///
    /// Positions must be strictly increasing and less than `n`.
    #[must_use]
    pub fn from_sorted_positions<I>(positions: I, n: u64) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut bv = Self::new();
        for pos in positions {
            debug_assert!(pos >= bv.nbits && pos < n);
            if pos > bv.nbits {
                bv.append_fill(false, pos - bv.nbits);
            }
            bv.append_fill(true, 1);
        }
        if bv.nbits < n {
            bv.append_fill(false, n - bv.nbits);
        }
        bv
    }

    /// Logical bit count.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.nbits
    }

    /// Returns true if the bitvector holds no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Number of set bits.
    #[must_use]
    pub fn cnt(&self) -> u64 {
        let mut total = 0u64;
        for &w in &self.words {
            if w & FILL_FLAG != 0 {
                if w & FILL_ONE != 0 {
                    total += u64::from(w & MAX_FILL_GROUPS) * u64::from(GROUP_BITS);
                }
            } else {
                total += u64::from(w.count_ones());
            }
        }
        total + u64::from(self.active_val.count_ones())
    }

    /// Approximate in-memory footprint of the compressed words, in bytes.
    ///
    /// Used by selection heuristics to weigh seek count against page reads.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        (self.words.len() as u64 + 2) * 4
    }

    /// Resets the content to `n` copies of `value`.
    pub fn set(&mut self, value: bool, n: u64) {
        self.clear();
        self.append_fill(value, n);
    }

    /// Removes all bits.
    pub fn clear(&mut self) {
        self.words.clear();
        self.active_val = 0;
        self.active_bits = 0;
        self.nbits = 0;
    }

    /// Appends a single bit.
    pub fn push(&mut self, bit: bool) {
        self.active_val |= u32::from(bit) << self.active_bits;
        self.active_bits += 1;
        self.nbits += 1;
        if self.active_bits == GROUP_BITS {
            let group = self.active_val;
            self.active_val = 0;
            self.active_bits = 0;
            self.push_group(group);
        }
    }

    /// Appends `n` copies of `value`.
    pub fn append_fill(&mut self, value: bool, n: u64) {
        let mut remaining = n;
        // Complete the active word first.
        while remaining > 0 && self.active_bits != 0 {
            self.push(value);
            remaining -= 1;
        }
        // Bulk groups.
        let groups = remaining / u64::from(GROUP_BITS);
        if groups > 0 {
            self.push_fill_groups(value, groups);
            self.nbits += groups * u64::from(GROUP_BITS);
            remaining -= groups * u64::from(GROUP_BITS);
        }
        // Leftover bits go to the active word.
        for _ in 0..remaining {
            self.push(value);
        }
    }

    /// Appends the content of `other` after the last bit of `self`.
    pub fn append(&mut self, other: &Bitvector) {
        if self.active_bits == 0 {
            // Group-aligned: splice compressed words directly.
            for &w in &other.words {
                if w & FILL_FLAG != 0 {
                    self.push_fill_groups(w & FILL_ONE != 0, u64::from(w & MAX_FILL_GROUPS));
                    self.nbits +=
                        u64::from(w & MAX_FILL_GROUPS) * u64::from(GROUP_BITS);
                } else {
                    self.push_group(w);
                    self.nbits += u64::from(GROUP_BITS);
                }
            }
            for j in 0..other.active_bits {
                self.push(other.active_val >> j & 1 != 0);
            }
        } else {
            for run in other.runs() {
                self.append_fill_or_literal(run);
            }
        }
    }

    /// Pads with ones up to `active` bits, then with zeros up to `total`
    /// bits, truncating if the current size exceeds `total`.
    pub fn adjust_size(&mut self, active: u64, total: u64) {
        if self.nbits < active {
            self.append_fill(true, active - self.nbits);
        }
        if self.nbits < total {
            self.append_fill(false, total - self.nbits);
        } else if self.nbits > total {
            self.truncate(total);
        }
    }

    /// Shortens the bitvector to its first `n` bits.
    pub fn truncate(&mut self, n: u64) {
        if n >= self.nbits {
            return;
        }
        let mut out = Bitvector::new();
        let mut remaining = n;
        for run in self.runs() {
            if remaining == 0 {
                break;
            }
            match run {
                Run::Fill(bit, len) => {
                    let take = len.min(remaining);
                    out.append_fill(bit, take);
                    remaining -= take;
                }
                Run::Literal(pattern, width) => {
                    let take = u64::from(width).min(remaining) as u32;
                    for j in 0..take {
                        out.push(pattern >> j & 1 != 0);
                    }
                    remaining -= u64::from(take);
                }
            }
        }
        *self = out;
    }

    /// Bitwise AND; the shorter operand is zero-extended.
    #[must_use]
    pub fn and(&self, other: &Bitvector) -> Bitvector {
        binary_op(self, other, |a, b| a & b)
    }

    /// Bitwise OR; the shorter operand is zero-extended.
    #[must_use]
    pub fn or(&self, other: &Bitvector) -> Bitvector {
        binary_op(self, other, |a, b| a | b)
    }

    /// Bitwise difference `self AND NOT other`.
    #[must_use]
    pub fn minus(&self, other: &Bitvector) -> Bitvector {
        binary_op(self, other, |a, b| a & !b)
    }

    /// In-place AND.
    pub fn and_assign(&mut self, other: &Bitvector) {
        *self = self.and(other);
    }

    /// In-place OR.
    pub fn or_assign(&mut self, other: &Bitvector) {
        *self = self.or(other);
    }

    /// In-place difference.
    pub fn minus_assign(&mut self, other: &Bitvector) {
        *self = self.minus(other);
    }

    /// Exchanges the content of two bitvectors.
    pub fn swap(&mut self, other: &mut Bitvector) {
        std::mem::swap(self, other);
    }

    /// Projects the bits of `self` selected by `selector`.
    ///
    /// The result has `selector.cnt()` bits: bit `k` of the result is the
    /// bit of `self` at the position of the `k`-th set bit of `selector`.
    /// Used after deletions to rewrite a mask under a row selection.
    #[must_use]
    pub fn subset(&self, selector: &Bitvector) -> Bitvector {
        let mut out = Bitvector::new();
        for set in selector.index_sets() {
            match set {
                IndexSet::Range { begin, end } => {
                    let mut cursor = BitCursor::new(self, begin);
                    for _ in begin..end {
                        out.push(cursor.next_bit());
                    }
                }
                IndexSet::Literal(indices) => {
                    for idx in indices {
                        let mut cursor = BitCursor::new(self, idx);
                        out.push(cursor.next_bit());
                    }
                }
            }
        }
        out
    }

    /// Iterates over every set position in strictly increasing order.
    pub fn set_positions(&self) -> impl Iterator<Item = u64> + '_ {
        self.index_sets().flat_map(IndexSet::into_positions)
    }

    /// Iterates over maximal groups of set bits in strictly increasing
    /// position order.
    ///
    /// Each item is either a dense range of consecutive ones or a short
    /// literal list of positions.
    #[must_use]
    pub fn index_sets(&self) -> IndexSetIter<'_> {
        IndexSetIter::new(self)
    }

    /// Reads a bit at a given position. Linear in the compressed size; use
    /// [`Bitvector::index_sets`] for traversal.
    #[must_use]
    pub fn get(&self, pos: u64) -> bool {
        debug_assert!(pos < self.nbits);
        BitCursor::new(self, pos).next_bit()
    }

    /// Reads a serialized bitvector from `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or an invariant error
    /// if the content is malformed.
    pub fn read(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        Self::from_serialized(&raw)
    }

    /// Decodes the serialized form produced by [`Bitvector::write`].
    ///
    /// # Errors
    ///
    /// Returns an invariant error if the content is malformed.
    pub fn from_serialized(raw: &[u8]) -> Result<Self> {
        let word = |i: usize| -> Result<u32> {
            let start = i * 4;
            raw.get(start..start + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(|| Error::Invariant("bitvector file truncated".to_string()))
        };
        let nwords = word(0)? as usize;
        if raw.len() < (nwords + 3) * 4 {
            return Err(Error::Invariant(format!(
                "bitvector file holds {} bytes, needs {}",
                raw.len(),
                (nwords + 3) * 4
            )));
        }
        let mut bv = Bitvector::new();
        for i in 0..nwords {
            let w = word(1 + i)?;
            if w & FILL_FLAG != 0 {
                let groups = u64::from(w & MAX_FILL_GROUPS);
                bv.push_fill_groups(w & FILL_ONE != 0, groups);
                bv.nbits += groups * u64::from(GROUP_BITS);
            } else {
                bv.push_group(w);
                bv.nbits += u64::from(GROUP_BITS);
            }
        }
        let active_val = word(1 + nwords)?;
        let active_bits = word(2 + nwords)?;
        if active_bits >= GROUP_BITS || (active_bits < 32 && active_val >> active_bits != 0) {
            return Err(Error::Invariant(format!(
                "bitvector active word malformed: {active_bits} bits, value {active_val:#x}"
            )));
        }
        bv.active_val = active_val;
        bv.active_bits = active_bits;
        bv.nbits += u64::from(active_bits);
        Ok(bv)
    }

    /// Writes the serialized form to `path`, overwriting any existing file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        let nwords = u32::try_from(self.words.len())
            .map_err(|_| Error::Invariant("bitvector too large to serialize".to_string()))?;
        out.write_all(&nwords.to_le_bytes())?;
        for &w in &self.words {
            out.write_all(&w.to_le_bytes())?;
        }
        out.write_all(&self.active_val.to_le_bytes())?;
        out.write_all(&self.active_bits.to_le_bytes())?;
        out.flush()?;
        Ok(())
    }

    // ---- internal helpers ----------------------------------------------

    /// Appends one whole group, folding all-zero / all-one groups into fills.
    fn push_group(&mut self, group: u32) {
        debug_assert_eq!(group & FILL_FLAG, 0);
        if group == 0 {
            self.push_fill_groups(false, 1);
        } else if group == GROUP_MASK {
            self.push_fill_groups(true, 1);
        } else {
            self.words.push(group);
        }
    }

    /// Appends `groups` whole fill groups, merging with a trailing fill of
    /// the same value.
    fn push_fill_groups(&mut self, value: bool, mut groups: u64) {
        if groups == 0 {
            return;
        }
        let value_flag = if value { FILL_ONE } else { 0 };
        if let Some(last) = self.words.last_mut() {
            if *last & (FILL_FLAG | FILL_ONE) == FILL_FLAG | value_flag {
                let room = u64::from(MAX_FILL_GROUPS - (*last & MAX_FILL_GROUPS));
                let take = room.min(groups);
                *last += take as u32;
                groups -= take;
            }
        }
        while groups > 0 {
            let take = groups.min(u64::from(MAX_FILL_GROUPS));
            self.words.push(FILL_FLAG | value_flag | take as u32);
            groups -= take;
        }
    }

    fn append_fill_or_literal(&mut self, run: Run) {
        match run {
            Run::Fill(bit, len) => self.append_fill(bit, len),
            Run::Literal(pattern, width) => {
                for j in 0..width {
                    self.push(pattern >> j & 1 != 0);
                }
            }
        }
    }

    /// Iterates decoded runs, merging adjacent fills of the same value.
    pub(crate) fn runs(&self) -> RunIter<'_> {
        RunIter {
            bv: self,
            word_idx: 0,
            active_done: false,
            pending: None,
        }
    }
}

impl fmt::Debug for Bitvector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitvector({} of {} set)", self.cnt(), self.size())
    }
}

/// One decoded run of the compressed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Run {
    /// `len` copies of a bit.
    Fill(bool, u64),
    /// A literal group: `width` bits stored LSB-first in the pattern.
    Literal(u32, u32),
}

/// Iterator over decoded runs.
pub(crate) struct RunIter<'a> {
    bv: &'a Bitvector,
    word_idx: usize,
    active_done: bool,
    pending: Option<Run>,
}

impl Iterator for RunIter<'_> {
    type Item = Run;

    fn next(&mut self) -> Option<Run> {
        loop {
            let next = self.decode_next();
            match (self.pending, next) {
                (None, None) => return None,
                (Some(run), None) => {
                    self.pending = None;
                    return Some(run);
                }
                (None, Some(run)) => {
                    self.pending = Some(run);
                }
                (Some(Run::Fill(b1, l1)), Some(Run::Fill(b2, l2))) if b1 == b2 => {
                    self.pending = Some(Run::Fill(b1, l1 + l2));
                }
                (Some(run), Some(next)) => {
                    self.pending = Some(next);
                    return Some(run);
                }
            }
        }
    }
}

impl RunIter<'_> {
    fn decode_next(&mut self) -> Option<Run> {
        if self.word_idx < self.bv.words.len() {
            let w = self.bv.words[self.word_idx];
            self.word_idx += 1;
            if w & FILL_FLAG != 0 {
                Some(Run::Fill(
                    w & FILL_ONE != 0,
                    u64::from(w & MAX_FILL_GROUPS) * u64::from(GROUP_BITS),
                ))
            } else {
                Some(Run::Literal(w, GROUP_BITS))
            }
        } else if !self.active_done {
            self.active_done = true;
            if self.bv.active_bits > 0 {
                Some(Run::Literal(self.bv.active_val, self.bv.active_bits))
            } else {
                None
            }
        } else {
            None
        }
    }
}

/// Sequential bit reader starting from an arbitrary position.
struct BitCursor<'a> {
    runs: RunIter<'a>,
    current: Option<Run>,
    offset: u64,
}

impl<'a> BitCursor<'a> {
    fn new(bv: &'a Bitvector, start: u64) -> Self {
        let mut cursor = Self {
            runs: bv.runs(),
            current: None,
            offset: 0,
        };
        cursor.skip(start);
        cursor
    }

    fn skip(&mut self, mut n: u64) {
        while n > 0 {
            match self.ensure_current() {
                Some(len) => {
                    let left = len - self.offset;
                    if n < left {
                        self.offset += n;
                        return;
                    }
                    n -= left;
                    self.current = None;
                    self.offset = 0;
                }
                None => return,
            }
        }
    }

    fn ensure_current(&mut self) -> Option<u64> {
        if self.current.is_none() {
            self.current = self.runs.next();
            self.offset = 0;
        }
        self.current.map(|run| match run {
            Run::Fill(_, len) => len,
            Run::Literal(_, width) => u64::from(width),
        })
    }

    fn next_bit(&mut self) -> bool {
        let Some(len) = self.ensure_current() else {
            return false;
        };
        let bit = match self.current {
            Some(Run::Fill(b, _)) => b,
            Some(Run::Literal(pattern, _)) => pattern >> self.offset & 1 != 0,
            None => false,
        };
        self.offset += 1;
        if self.offset == len {
            self.current = None;
            self.offset = 0;
        }
        bit
    }
}

/// Applies a bitwise combination group by group; the shorter operand is
/// treated as zero-extended to the longer one.
fn binary_op(a: &Bitvector, b: &Bitvector, f: impl Fn(u32, u32) -> u32) -> Bitvector {
    let nbits = a.size().max(b.size());
    let total_groups = nbits.div_ceil(u64::from(GROUP_BITS));
    let mut ga = GroupRuns::new(a, total_groups);
    let mut gb = GroupRuns::new(b, total_groups);
    let mut out = Bitvector::new();
    let mut emitted = 0u64;
    while emitted < total_groups {
        let (pa, ra) = ga.peek();
        let (pb, rb) = gb.peek();
        let take = ra.min(rb).min(total_groups - emitted);
        let pattern = f(pa, pb) & GROUP_MASK;
        ga.advance(take);
        gb.advance(take);
        // Whole-group output, except the final partial group which lands in
        // the active word.
        let tail = nbits % u64::from(GROUP_BITS);
        let last_is_partial = tail != 0 && emitted + take == total_groups;
        let whole = if last_is_partial { take - 1 } else { take };
        if pattern == 0 || pattern == GROUP_MASK {
            out.push_fill_groups(pattern != 0, whole);
            out.nbits += whole * u64::from(GROUP_BITS);
        } else {
            for _ in 0..whole {
                out.push_group(pattern);
                out.nbits += u64::from(GROUP_BITS);
            }
        }
        if last_is_partial {
            out.active_val = pattern & ((1 << tail) - 1);
            out.active_bits = tail as u32;
            out.nbits += tail;
        }
        emitted += take;
    }
    out
}

/// Run-compressed stream of whole groups, zero-padded to a target length.
struct GroupRuns<'a> {
    runs: std::vec::IntoIter<(u32, u64)>,
    current: (u32, u64),
    _marker: std::marker::PhantomData<&'a ()>,
}

impl<'a> GroupRuns<'a> {
    fn new(bv: &'a Bitvector, total_groups: u64) -> Self {
        // Materialize the group-run list; the compressed form keeps this
        // short even for very long vectors.
        let mut list: Vec<(u32, u64)> = Vec::with_capacity(bv.words.len() + 2);
        for &w in &bv.words {
            if w & FILL_FLAG != 0 {
                let pattern = if w & FILL_ONE != 0 { GROUP_MASK } else { 0 };
                list.push((pattern, u64::from(w & MAX_FILL_GROUPS)));
            } else {
                list.push((w, 1));
            }
        }
        if bv.active_bits > 0 {
            list.push((bv.active_val, 1));
        }
        let have: u64 = list.iter().map(|(_, n)| n).sum();
        if have < total_groups {
            list.push((0, total_groups - have));
        }
        let mut runs = list.into_iter();
        let current = runs.next().unwrap_or((0, 0));
        Self {
            runs,
            current,
            _marker: std::marker::PhantomData,
        }
    }

    fn peek(&self) -> (u32, u64) {
        self.current
    }

    fn advance(&mut self, n: u64) {
        debug_assert!(n <= self.current.1);
        self.current.1 -= n;
        if self.current.1 == 0 {
            self.current = self.runs.next().unwrap_or((0, u64::MAX));
        }
    }
}

#[cfg(test)]
mod tests;
