//! The column engine.
//!
//! A column ties together the typed storage file, the persisted null mask,
//! the cached bounds, the sorted-file search paths, and the per-column
//! bitmap index. It never owns its partition; it reads the row count, data
//! directory, state, and policies through a shared
//! [`PartitionContext`](crate::partition::PartitionContext).
//!
//! # Locking
//!
//! - `index: RwLock<...>` guards the index pointer and the structure of the
//!   data file. Readers pin the index through [`Column::index_guard`];
//!   writers wait for the pin count to reach zero.
//! - `cached: Mutex<...>` guards the cached mask and the min/max fields.
//!   It is never acquired while holding another column's mutex.
//! - The write lock is never held across a user callback.

pub mod schema;

mod append;
mod evaluate;
mod index_ops;
mod mask;
mod maintenance;
mod scan;
mod select;
mod sorted;
mod stats;

pub use schema::{ColumnSchema, ColumnType};
pub use select::{SelectTarget, ValuesVec};

use crate::bitvector::Bitvector;
use crate::index::ColumnIndex;
use crate::partition::PartitionContext;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Monomorphizes an expression over the fixed-width element type of a
/// column. CATEGORY presents its u32 identifier surface; OID and TEXT fall
/// through to the last arm.
macro_rules! with_fixed_type {
    ($ctype:expr, $T:ident => $body:expr, $fallback:expr $(,)?) => {
        match $ctype {
            $crate::column::ColumnType::I8 => {
                type $T = i8;
                $body
            }
            $crate::column::ColumnType::U8 => {
                type $T = u8;
                $body
            }
            $crate::column::ColumnType::I16 => {
                type $T = i16;
                $body
            }
            $crate::column::ColumnType::U16 => {
                type $T = u16;
                $body
            }
            $crate::column::ColumnType::I32 => {
                type $T = i32;
                $body
            }
            $crate::column::ColumnType::U32 | $crate::column::ColumnType::Category => {
                type $T = u32;
                $body
            }
            $crate::column::ColumnType::I64 => {
                type $T = i64;
                $body
            }
            $crate::column::ColumnType::U64 => {
                type $T = u64;
                $body
            }
            $crate::column::ColumnType::F32 => {
                type $T = f32;
                $body
            }
            $crate::column::ColumnType::F64 => {
                type $T = f64;
                $body
            }
            _ => $fallback,
        }
    };
}
pub(crate) use with_fixed_type;

/// Fields guarded by the short per-column mutex.
struct CachedState {
    mask: Option<Bitvector>,
    lower: f64,
    upper: f64,
}

/// One attribute across all rows of a partition.
pub struct Column {
    ctx: Arc<PartitionContext>,
    name: String,
    ctype: ColumnType,
    description: String,
    index_hint: String,
    sorted: AtomicBool,
    cached: Mutex<CachedState>,
    index: RwLock<Option<Box<dyn ColumnIndex>>>,
    pins: Mutex<u32>,
    pin_cv: Condvar,
}

impl Column {
    /// Builds the runtime column for a parsed schema.
    pub(crate) fn new(ctx: Arc<PartitionContext>, schema: ColumnSchema) -> Self {
        Self {
            ctx,
            name: schema.name,
            ctype: schema.ctype,
            description: schema.description,
            index_hint: schema.index_hint,
            sorted: AtomicBool::new(schema.sorted),
            cached: Mutex::new(CachedState {
                mask: None,
                lower: schema.lower,
                upper: schema.upper,
            }),
            index: RwLock::new(None),
            pins: Mutex::new(0),
            pin_cv: Condvar::new(),
        }
    }

    /// Column name, unique within the partition.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value type.
    #[must_use]
    pub fn ctype(&self) -> ColumnType {
        self.ctype
    }

    /// Free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Preferred index encoding, free-form.
    #[must_use]
    pub fn index_hint(&self) -> &str {
        &self.index_hint
    }

    /// The owning partition's context.
    #[must_use]
    pub fn context(&self) -> &Arc<PartitionContext> {
        &self.ctx
    }

    /// Logical row count of the owning partition.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.ctx.rows()
    }

    /// On-disk element size, or `None` for TEXT.
    #[must_use]
    pub fn element_size(&self) -> Option<usize> {
        self.ctype.element_size()
    }

    /// Path of the raw values file in the active data directory.
    #[must_use]
    pub fn data_file(&self) -> PathBuf {
        self.data_file_in(self.ctx.data_dir())
    }

    /// Path of the raw values file in `dir`.
    #[must_use]
    pub fn data_file_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }

    /// Path of the persisted null mask in the active data directory.
    #[must_use]
    pub fn mask_file(&self) -> PathBuf {
        self.mask_file_in(self.ctx.data_dir())
    }

    /// Path of the persisted null mask in `dir`.
    #[must_use]
    pub fn mask_file_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.msk", self.name))
    }

    /// Path of the opaque index blob in `dir`.
    #[must_use]
    pub fn index_file_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.idx", self.name))
    }

    /// Path of the dictionary sidecar in the active data directory.
    #[must_use]
    pub fn dictionary_file(&self) -> PathBuf {
        self.ctx.data_dir().join(format!("{}.dic", self.name))
    }

    /// Whether the on-disk values are declared strictly ascending after
    /// null-mask application.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted.load(Ordering::Acquire)
    }

    /// Declares the on-disk values sorted or unsorted.
    ///
    /// The engine trusts the declaration. With the `verify_sorted` policy
    /// enabled, declaring `true` first checks ascending order over the
    /// valid rows and refuses the flag on disorder.
    ///
    /// # Errors
    ///
    /// Returns an invariant error when verification is on and fails, or an
    /// IO error when verification cannot read the data file.
    pub fn set_sorted(&self, sorted: bool) -> crate::error::Result<()> {
        if sorted && self.ctx.column_config().verify_sorted {
            self.verify_ascending()?;
        }
        let _structure = self.index.write();
        self.sorted.store(sorted, Ordering::Release);
        Ok(())
    }

    /// Cached `(lower, upper)` bounds; `lower > upper` means unset.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64) {
        let cached = self.cached.lock();
        (cached.lower, cached.upper)
    }

    /// Returns true if the cached bounds carry information.
    #[must_use]
    pub fn has_bounds(&self) -> bool {
        let (lower, upper) = self.bounds();
        upper >= lower
    }

    pub(crate) fn set_bounds(&self, lower: f64, upper: f64) {
        let mut cached = self.cached.lock();
        cached.lower = lower;
        cached.upper = upper;
    }

    /// Snapshot of the static description, as serialized to the metadata
    /// file.
    #[must_use]
    pub fn schema(&self) -> ColumnSchema {
        let (lower, upper) = self.bounds();
        ColumnSchema {
            name: self.name.clone(),
            ctype: self.ctype,
            description: self.description.clone(),
            lower,
            upper,
            index_hint: self.index_hint.clone(),
            sorted: self.is_sorted(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lower, upper) = self.bounds();
        write!(
            f,
            "{}: {} ({}) [{}, {}]",
            self.name, self.description, self.ctype, lower, upper
        )
    }
}
