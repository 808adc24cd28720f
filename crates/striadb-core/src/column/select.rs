//! Typed selection of masked values.
//!
//! Given a mask `M`, selection produces a contiguous typed vector holding
//! the values of the rows where `M` and the null mask are both set, in
//! logical row order. Two read paths exist:
//!
//! - read the whole file and copy through the mask's index sets, or
//! - for large, sparse selections, map the file without reading it
//!   (`try_get_file`) and fall back to positional reads when mapping is
//!   refused: contiguous runs are read in one seek, literal sets one
//!   element at a time.
//!
//! Only widening casts are permitted on the way out; narrowing and
//! signedness-hostile conversions are rejected. CATEGORY and TEXT columns
//! present 32-bit unsigned identifiers.

use super::{with_fixed_type, Column, ColumnType};
use crate::array::{ArrayView, Element};
use crate::bitvector::{Bitvector, IndexSet};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::file_manager::{AccessHint, FileManager};
use crate::oid::Oid;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/// Row-count threshold below which selection always reads the whole file.
const SELECTIVE_MIN_ROWS: u64 = 1 << 20;

/// A type-erased selection result in the column's native width.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuesVec {
    /// Values of an I8 column.
    I8(Vec<i8>),
    /// Values of a U8 column.
    U8(Vec<u8>),
    /// Values of an I16 column.
    I16(Vec<i16>),
    /// Values of a U16 column.
    U16(Vec<u16>),
    /// Values of an I32 column.
    I32(Vec<i32>),
    /// Values of a U32, CATEGORY, or TEXT column (identifier surface).
    U32(Vec<u32>),
    /// Values of an I64 column.
    I64(Vec<i64>),
    /// Values of a U64 column.
    U64(Vec<u64>),
    /// Values of an F32 column.
    F32(Vec<f32>),
    /// Values of an F64 column.
    F64(Vec<f64>),
    /// Values of an OID column.
    Oid(Vec<Oid>),
}

impl ValuesVec {
    /// Number of selected values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Oid(v) => v.len(),
        }
    }

    /// Returns true when nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the carried element type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::I8(_) => "i8",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::U16(_) => "u16",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Oid(_) => "oid",
        }
    }

    /// Returns true when this vector carries the native width of `ctype`.
    ///
    /// CATEGORY accepts its u32 identifier surface; TEXT accepts nothing,
    /// since identifiers cannot be written back as strings.
    #[must_use]
    pub fn matches_column(&self, ctype: ColumnType) -> bool {
        matches!(
            (self, ctype),
            (Self::I8(_), ColumnType::I8)
                | (Self::U8(_), ColumnType::U8)
                | (Self::I16(_), ColumnType::I16)
                | (Self::U16(_), ColumnType::U16)
                | (Self::I32(_), ColumnType::I32)
                | (Self::U32(_), ColumnType::U32 | ColumnType::Category)
                | (Self::I64(_), ColumnType::I64)
                | (Self::U64(_), ColumnType::U64)
                | (Self::F32(_), ColumnType::F32)
                | (Self::F64(_), ColumnType::F64)
                | (Self::Oid(_), ColumnType::Oid)
        )
    }

    /// Appends the little-endian byte image of every value to `out`.
    pub fn write_le_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::I8(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::U8(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::I16(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::U16(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::I32(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::U32(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::I64(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::U64(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::F32(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::F64(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
            Self::Oid(v) => v.iter().for_each(|x| x.write_le_bytes(out)),
        }
    }

    /// The values converted to `f64`, for statistics over any numeric type.
    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Self::I8(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::U8(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::I16(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::U16(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::I32(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::U32(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::I64(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::U64(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::F32(v) => v.iter().map(|&x| x.to_f64()).collect(),
            Self::F64(v) => v.clone(),
            Self::Oid(v) => v.iter().map(|&x| x.to_f64()).collect(),
        }
    }
}

macro_rules! impl_values_from {
    ($($t:ty => $variant:ident),* $(,)?) => {$(
        impl From<Vec<$t>> for ValuesVec {
            fn from(v: Vec<$t>) -> Self {
                Self::$variant(v)
            }
        }
    )*};
}

impl_values_from!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32, u32 => U32,
    i64 => I64, u64 => U64, f32 => F32, f64 => F64, Oid => Oid,
);

/// A typed selection target.
///
/// Implemented for every element type a caller may request; the
/// implementation performs the permitted widening conversions from the
/// column's native width and rejects everything else.
pub trait SelectTarget: Element {
    /// Converts a native selection result, or reports a type mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for a narrowing or
    /// signedness-hostile conversion.
    fn cast_from(values: ValuesVec, column: &Column) -> Result<Vec<Self>>;
}

macro_rules! impl_select_target {
    ($t:ty, [$($variant:ident),* $(,)?]) => {
        impl SelectTarget for $t {
            #[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
            fn cast_from(values: ValuesVec, column: &Column) -> Result<Vec<$t>> {
                match values {
                    $(ValuesVec::$variant(v) => {
                        Ok(v.into_iter().map(|x| x as $t).collect())
                    })*
                    other => Err(Error::TypeMismatch {
                        column: other.type_name(),
                        name: column.name().to_string(),
                        requested: stringify!($t),
                    }),
                }
            }
        }
    };
}

impl_select_target!(i8, [I8]);
impl_select_target!(u8, [U8]);
impl_select_target!(i16, [I16, I8, U8]);
impl_select_target!(u16, [U16, U8]);
impl_select_target!(i32, [I32, I16, I8, U16, U8]);
impl_select_target!(u32, [U32, U16, U8]);
impl_select_target!(i64, [I64, I32, I16, I8, U32, U16, U8]);
impl_select_target!(u64, [U64, U32, U16, U8]);
impl_select_target!(f32, [F32]);
impl_select_target!(f64, [F64, F32]);

impl SelectTarget for Oid {
    fn cast_from(values: ValuesVec, column: &Column) -> Result<Vec<Oid>> {
        match values {
            ValuesVec::Oid(v) => Ok(v),
            other => Err(Error::TypeMismatch {
                column: other.type_name(),
                name: column.name().to_string(),
                requested: "oid",
            }),
        }
    }
}

impl Column {
    /// Selects the values of the rows set in `mask`, in the column's
    /// native width.
    ///
    /// The mask is intersected with the null mask first; the result length
    /// equals the count of that intersection.
    ///
    /// # Errors
    ///
    /// Returns IO errors from the read paths and a size mismatch when the
    /// data file cannot supply every selected row.
    pub fn select_values(&self, mask: &Bitvector) -> Result<ValuesVec> {
        let eff = self.effective_mask(mask)?;
        match self.ctype {
            ColumnType::Text => Ok(ValuesVec::U32(self.select_text_ids(&eff)?)),
            ColumnType::Oid => Ok(ValuesVec::Oid(self.select_fixed::<Oid>(&eff)?)),
            ctype => {
                with_fixed_type!(ctype, T => self.select_fixed::<T>(&eff).map(ValuesVec::from), unreachable!())
            }
        }
    }

    /// Selects values converted to the requested element type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] unless the conversion from the
    /// column's native width is widening, plus any error of
    /// [`Column::select_values`].
    pub fn select_values_as<T: SelectTarget>(&self, mask: &Bitvector) -> Result<Vec<T>> {
        T::cast_from(self.select_values(mask)?, self)
    }

    /// Selects values together with their absolute row indices.
    ///
    /// The indices are strictly ascending and aligned one to one with the
    /// value vector.
    ///
    /// # Errors
    ///
    /// As [`Column::select_values_as`]; TEXT columns are not supported on
    /// this path.
    pub fn select_values_with_indices<T: SelectTarget>(
        &self,
        mask: &Bitvector,
    ) -> Result<(Vec<T>, Vec<u64>)> {
        let eff = self.effective_mask(mask)?;
        let (values, inds) = match self.ctype {
            ColumnType::Text => {
                return Err(Error::TypeMismatch {
                    column: "text",
                    name: self.name.clone(),
                    requested: T::NAME,
                })
            }
            ColumnType::Oid => {
                let (v, i) = self.select_fixed_with_indices::<Oid>(&eff)?;
                (ValuesVec::Oid(v), i)
            }
            ctype => {
                with_fixed_type!(
                    ctype,
                    T2 => {
                        let (v, i) = self.select_fixed_with_indices::<T2>(&eff)?;
                        (ValuesVec::from(v), i)
                    },
                    unreachable!()
                )
            }
        };
        Ok((T::cast_from(values, self)?, inds))
    }

    pub(crate) fn effective_mask(&self, mask: &Bitvector) -> Result<Bitvector> {
        Ok(self.null_mask()?.and(mask))
    }

    /// Selection of any fixed-width column as `f64`, with row indices.
    /// Shared by statistics and index construction.
    pub(crate) fn select_f64_with_indices(
        &self,
        mask: &Bitvector,
    ) -> Result<(Vec<f64>, Vec<u64>)> {
        let eff = self.effective_mask(mask)?;
        with_fixed_type!(
            self.ctype,
            T => {
                let (v, inds) = self.select_fixed_with_indices::<T>(&eff)?;
                Ok((v.into_iter().map(Element::to_f64).collect(), inds))
            },
            Err(Error::NotApplicable {
                name: self.name.clone(),
                ctype: self.ctype.type_word(),
            })
        )
    }

    /// Core selection in the column's exact native type.
    pub(crate) fn select_fixed<T: Element>(&self, mask: &Bitvector) -> Result<Vec<T>> {
        let mut values = Vec::new();
        self.select_fixed_impl::<T>(mask, &mut values, None)?;
        Ok(values)
    }

    fn select_fixed_with_indices<T: Element>(
        &self,
        mask: &Bitvector,
    ) -> Result<(Vec<T>, Vec<u64>)> {
        let mut values = Vec::new();
        let mut inds = Vec::new();
        self.select_fixed_impl::<T>(mask, &mut values, Some(&mut inds))?;
        Ok((values, inds))
    }

    fn select_fixed_impl<T: Element>(
        &self,
        mask: &Bitvector,
        values: &mut Vec<T>,
        mut inds: Option<&mut Vec<u64>>,
    ) -> Result<()> {
        if self.element_size() != Some(T::SIZE) {
            return Err(Error::TypeMismatch {
                column: self.ctype.type_word(),
                name: self.name.clone(),
                requested: T::NAME,
            });
        }
        let total = mask.cnt();
        if total == 0 {
            return Ok(());
        }
        values.reserve(usize::try_from(total).unwrap_or(0));

        let path = self.data_file();
        let fm = self.ctx.files();
        let rows = mask.size();

        // For very large, sparse selections, prefer mapping without reading:
        // the mask word count approximates the seeks a positional read would
        // take, the page count what a full read would touch.
        let page = FileManager::page_size() as u64;
        let selective = rows >= SELECTIVE_MIN_ROWS
            && total * 2 <= rows
            && mask.bytes() / 4 < rows * T::SIZE as u64 / page / 8;
        let block = if selective {
            fm.try_get_file(&path, AccessHint::MmapLargeFiles)
        } else {
            Some(fm.get_file(&path, AccessHint::MmapLargeFiles)?)
        };

        match block {
            Some(block) => {
                let view: ArrayView<T> = ArrayView::new(block);
                let nr = (view.len() as u64).min(rows);
                for set in mask.index_sets() {
                    match set {
                        IndexSet::Range { begin, end } => {
                            let stop = end.min(nr);
                            for i in begin..stop {
                                values.push(view.get(i as usize));
                                if let Some(inds) = inds.as_deref_mut() {
                                    inds.push(i);
                                }
                            }
                        }
                        IndexSet::Literal(indices) => {
                            for i in indices {
                                if i >= nr {
                                    break;
                                }
                                values.push(view.get(i as usize));
                                if let Some(inds) = inds.as_deref_mut() {
                                    inds.push(i);
                                }
                            }
                        }
                    }
                }
            }
            None => self.select_positional::<T>(mask, values, &mut inds)?,
        }

        if values.len() as u64 != total {
            return Err(Error::SizeMismatch {
                path: path.display().to_string(),
                message: format!("selected {} of {} requested values", values.len(), total),
            });
        }
        Ok(())
    }

    /// Positional-read fallback: one seek per contiguous run, single-element
    /// reads for sparse sets.
    fn select_positional<T: Element>(
        &self,
        mask: &Bitvector,
        values: &mut Vec<T>,
        inds: &mut Option<&mut Vec<u64>>,
    ) -> Result<()> {
        let path = self.data_file();
        let mut file = File::open(&path)?;
        let file_rows = file.seek(SeekFrom::End(0))? / T::SIZE as u64;
        let nr = file_rows.min(mask.size());
        let fm = self.ctx.files();
        let mut buf = vec![0u8; 0];

        for set in mask.index_sets() {
            match set {
                IndexSet::Range { begin, end } => {
                    let stop = end.min(nr);
                    if begin >= stop {
                        continue;
                    }
                    let nelm = (stop - begin) as usize;
                    buf.resize(nelm * T::SIZE, 0);
                    file.seek(SeekFrom::Start(begin * T::SIZE as u64))?;
                    file.read_exact(&mut buf)?;
                    fm.record_pages(begin * T::SIZE as u64, stop * T::SIZE as u64);
                    for j in 0..nelm {
                        values.push(T::from_le_bytes(&buf[j * T::SIZE..]));
                        if let Some(inds) = inds.as_deref_mut() {
                            inds.push(begin + j as u64);
                        }
                    }
                }
                IndexSet::Literal(indices) => {
                    let mut one = [0u8; 16];
                    for i in indices {
                        if i >= nr {
                            break;
                        }
                        file.seek(SeekFrom::Start(i * T::SIZE as u64))?;
                        file.read_exact(&mut one[..T::SIZE])?;
                        values.push(T::from_le_bytes(&one[..T::SIZE]));
                        if let Some(inds) = inds.as_deref_mut() {
                            inds.push(i);
                        }
                    }
                }
            }
        }
        debug!(
            column = %self.name,
            selected = values.len(),
            "selection used positional reads"
        );
        Ok(())
    }

    /// TEXT selection: walks the NUL-terminated strings sequentially and
    /// translates the selected ones into identifiers through the
    /// dictionary sidecar.
    fn select_text_ids(&self, mask: &Bitvector) -> Result<Vec<u32>> {
        let total = mask.cnt();
        if total == 0 {
            return Ok(Vec::new());
        }
        let block = self
            .ctx
            .files()
            .get_file(&self.data_file(), AccessHint::MmapLargeFiles)?;
        let bytes = block.as_bytes();

        let dic_path = self.dictionary_file();
        let mut dic = if dic_path.exists() {
            Dictionary::read(&dic_path)?
        } else {
            Dictionary::new()
        };

        let mut ids = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        let mut wanted = mask.set_positions();
        let mut next = wanted.next();
        let mut row = 0u64;
        let mut start = 0usize;
        for (i, &b) in bytes.iter().enumerate() {
            if b != 0 {
                continue;
            }
            if next == Some(row) {
                let term = std::str::from_utf8(&bytes[start..i]).map_err(|_| {
                    Error::Invariant(format!(
                        "column '{}' holds non-UTF-8 text at row {row}",
                        self.name
                    ))
                })?;
                ids.push(dic.intern(term));
                next = wanted.next();
            }
            row += 1;
            start = i + 1;
            if next.is_none() {
                break;
            }
        }

        if ids.len() as u64 != total {
            return Err(Error::SizeMismatch {
                path: self.data_file().display().to_string(),
                message: format!("selected {} of {total} requested strings", ids.len()),
            });
        }
        Ok(ids)
    }
}
