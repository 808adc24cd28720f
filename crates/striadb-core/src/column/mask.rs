//! Null-mask loading, reconciliation, and persistence.
//!
//! The persisted `.msk` bitvector marks valid (1) versus null (0) rows. An
//! absent file means every stored row is valid. The mask is materialized
//! lazily on first read and reconciled against both the data file length
//! and the partition row count:
//!
//! 1. `file_rows = data file size / element size`.
//! 2. A `.msk` shorter than `file_rows` covers the leading portion of the
//!    file; the remaining stored rows are valid, so the mask is padded
//!    with ones up to `file_rows`.
//! 3. Rows past the end of the data file are implicitly null, so the mask
//!    is padded with zeros up to the partition row count. The corrected
//!    mask is persisted back only when the partition is stable.

use super::Column;
use crate::bitvector::Bitvector;
use crate::column::ColumnType;
use crate::error::Result;
use crate::file_manager::AccessHint;
use crate::partition::PartitionState;
use tracing::{debug, warn};

impl Column {
    /// Returns the reconciled null mask, a copy of the cached one when the
    /// size still matches the partition.
    ///
    /// OID columns are always fully valid; their mask is synthesized.
    ///
    /// # Errors
    ///
    /// Surfaces IO errors from persisting a corrected mask. Read failures
    /// degrade to an all-valid mask over the stored rows.
    pub fn null_mask(&self) -> Result<Bitvector> {
        let rows = self.rows();
        {
            let cached = self.cached.lock();
            if let Some(mask) = cached.mask.as_ref() {
                if mask.size() == rows {
                    return Ok(mask.clone());
                }
            }
        }

        if self.ctype == ColumnType::Oid {
            let mask = Bitvector::filled(true, rows);
            self.cached.lock().mask = Some(mask.clone());
            return Ok(mask);
        }

        let mask = self.load_mask_from_disk(rows)?;
        self.cached.lock().mask = Some(mask.clone());
        Ok(mask)
    }

    fn load_mask_from_disk(&self, rows: u64) -> Result<Bitvector> {
        let data_path = self.data_file();
        let Ok(meta) = std::fs::metadata(&data_path) else {
            // No data file yet; every logical row is valid.
            return Ok(Bitvector::filled(true, rows));
        };
        let file_rows = match self.element_size() {
            Some(elem) => meta.len() / elem as u64,
            None => rows,
        };

        let mask_path = self.mask_file();
        let mut mask = match self.ctx.files().get_file(&mask_path, AccessHint::ReadFully) {
            Ok(block) => match Bitvector::from_serialized(block.as_bytes()) {
                Ok(bv) => bv,
                Err(e) => {
                    warn!(
                        column = %self.name,
                        error = %e,
                        "malformed mask file; treating stored rows as valid"
                    );
                    Bitvector::filled(true, file_rows)
                }
            },
            Err(_) => Bitvector::filled(true, file_rows),
        };

        if mask.size() != rows {
            let persist = self.ctx.state() == PartitionState::Stable;
            mask.adjust_size(file_rows, rows);
            if persist {
                self.ctx.files().flush_file(&mask_path);
                mask.write(&mask_path)?;
                debug!(
                    column = %self.name,
                    set = mask.cnt(),
                    size = mask.size(),
                    "reconciled and persisted null mask"
                );
            }
        }
        Ok(mask)
    }

    /// Installs `mask` as the column's null mask, persisting it, or
    /// removing the `.msk` file when the mask is all ones.
    ///
    /// # Errors
    ///
    /// Returns an invariant error if `mask.size()` differs from the
    /// partition row count, or an IO error from persisting.
    pub fn set_null_mask(&self, mask: &Bitvector) -> Result<()> {
        let rows = self.rows();
        if mask.size() != rows {
            return Err(crate::error::Error::Invariant(format!(
                "null mask for column '{}' has {} bits, partition has {} rows",
                self.name,
                mask.size(),
                rows
            )));
        }
        self.persist_mask_file(&self.mask_file(), mask)?;
        self.cached.lock().mask = Some(mask.clone());
        Ok(())
    }

    /// Writes `mask` to `path`, or removes the file when the mask is all
    /// ones. Flushes the file-manager entry either way.
    pub(crate) fn persist_mask_file(
        &self,
        path: &std::path::Path,
        mask: &Bitvector,
    ) -> Result<()> {
        self.ctx.files().flush_file(path);
        if mask.cnt() != mask.size() {
            mask.write(path)?;
        } else if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Replaces the cached mask without touching disk. Used when an append
    /// into the active directory has already merged and persisted the
    /// combined mask.
    pub(crate) fn swap_cached_mask(&self, mask: &mut Bitvector) {
        let mut cached = self.cached.lock();
        match cached.mask.as_mut() {
            Some(current) => current.swap(mask),
            None => cached.mask = Some(mask.clone()),
        }
    }

    /// Drops the cached mask so the next read reconciles from disk.
    pub(crate) fn invalidate_cached_mask(&self) {
        self.cached.lock().mask = None;
    }
}
