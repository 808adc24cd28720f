//! Directory-level append.
//!
//! Appending copies the next `nnew` rows of a column from a source
//! directory onto the end of the destination directory's data file,
//! merges the two null masks, reconciles the persisted index, and clears
//! the sorted flag. A short destination file is repaired with zero bytes
//! before extension; a missing source contributes null rows.

use super::{Column, ColumnType};
use crate::bitvector::Bitvector;
use crate::error::{Error, Result};
use crate::index::{BinnedIndex, ColumnIndex};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Copy-buffer size for streaming the source file.
const COPY_CHUNK: usize = 1 << 20;

impl Column {
    /// Appends `nnew` rows from `src_dir` to this column's file in
    /// `dest_dir`, where the destination currently holds `nold` rows.
    ///
    /// Returns `nnew` on success. Appending into the active data directory
    /// also swaps the cached mask and drops the in-memory index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for TEXT columns, identical directories,
    /// or a configured append ceiling exceeded; otherwise IO errors.
    pub fn append(
        &self,
        dest_dir: &Path,
        src_dir: &Path,
        nold: u64,
        nnew: u64,
    ) -> Result<u64> {
        if nnew == 0 {
            return Ok(0);
        }
        if dest_dir == src_dir {
            return Err(Error::InvalidArgument(
                "append source and destination directories are the same".to_string(),
            ));
        }
        let Some(elem) = self.element_size() else {
            return Err(Error::InvalidArgument(format!(
                "column '{}' of type TEXT cannot be appended by rows",
                self.name
            )));
        };
        let elem = elem as u64;
        if let Some(ceiling) = self.ctx.column_config().append_byte_ceiling {
            if (nold + nnew) * elem >= ceiling {
                return Err(Error::InvalidArgument(format!(
                    "append would grow '{}' to {} bytes, over the configured ceiling {}",
                    self.name,
                    (nold + nnew) * elem,
                    ceiling
                )));
            }
        }

        let copied_rows = {
            let _structure = self.index.write();
            let (copied_rows, old_file_rows) =
                self.append_data_file(dest_dir, src_dir, nold, nnew, elem)?;
            if self.ctype != ColumnType::Oid {
                let mut combined =
                    self.merge_masks(dest_dir, src_dir, nold, nnew, copied_rows, old_file_rows)?;
                if dest_dir == self.ctx.data_dir() {
                    self.swap_cached_mask(&mut combined);
                }
            }
            self.reconcile_index(dest_dir, src_dir, nold, nnew);
            // Appended rows land after the old ones in file order, so the
            // sort declaration no longer holds.
            self.sorted.store(false, std::sync::atomic::Ordering::Release);
            copied_rows
        };
        if dest_dir == self.ctx.data_dir() {
            self.unload_index();
        }
        debug!(
            column = %self.name,
            nold, nnew, copied_rows, "appended rows"
        );
        Ok(nnew)
    }

    /// Extends the destination data file; returns the number of rows
    /// actually copied from the source (the rest were zero-filled) and the
    /// number of whole rows the destination held beforehand.
    fn append_data_file(
        &self,
        dest_dir: &Path,
        src_dir: &Path,
        nold: u64,
        nnew: u64,
        elem: u64,
    ) -> Result<(u64, u64)> {
        let dest_path = self.data_file_in(dest_dir);
        self.ctx.files().flush_file(&dest_path);
        let mut dest = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&dest_path)?;

        let old_bytes = nold * elem;
        let mut pos = dest.seek(SeekFrom::End(0))?;
        let old_file_rows = (pos / elem).min(nold);
        if pos < old_bytes {
            // Repair a short file before extending it.
            write_zeros(&mut dest, old_bytes - pos)?;
        }
        dest.seek(SeekFrom::Start(old_bytes))?;
        pos = old_bytes;

        let target = nnew * elem;
        let mut copied = 0u64;
        match std::fs::File::open(self.data_file_in(src_dir)) {
            Ok(mut src) => {
                let mut buf = vec![0u8; COPY_CHUNK];
                while copied < target {
                    let want = usize::try_from((target - copied).min(COPY_CHUNK as u64))
                        .unwrap_or(COPY_CHUNK);
                    let got = src.read(&mut buf[..want])?;
                    if got == 0 {
                        break;
                    }
                    dest.write_all(&buf[..got])?;
                    copied += got as u64;
                }
            }
            Err(e) => {
                warn!(
                    column = %self.name,
                    error = %e,
                    "source data file unreadable; appending zero rows in its place"
                );
            }
        }
        pos += copied;

        let final_bytes = (nold + nnew) * elem;
        if pos < final_bytes {
            write_zeros(&mut dest, final_bytes - pos)?;
        }
        // Trim anything beyond the expected size, e.g. a pre-existing
        // over-long destination.
        let end = dest.seek(SeekFrom::End(0))?;
        if end > final_bytes {
            dest.set_len(final_bytes)?;
        }
        dest.flush()?;
        Ok((copied / elem, old_file_rows))
    }

    /// Merges the source and destination masks: source bits cover the
    /// copied rows (missing source rows are null), destination bits cover
    /// the rows the destination file really held (repaired rows are null).
    fn merge_masks(
        &self,
        dest_dir: &Path,
        src_dir: &Path,
        nold: u64,
        nnew: u64,
        copied_rows: u64,
        old_file_rows: u64,
    ) -> Result<Bitvector> {
        let src_mask_path = self.mask_file_in(src_dir);
        let mut appended = Bitvector::read(&src_mask_path).unwrap_or_default();
        appended.adjust_size(copied_rows, nnew);

        let dest_mask_path = self.mask_file_in(dest_dir);
        let mut combined = Bitvector::read(&dest_mask_path).unwrap_or_default();
        combined.adjust_size(old_file_rows, nold);
        combined.append(&appended);
        if combined.size() != nold + nnew {
            warn!(
                column = %self.name,
                size = combined.size(),
                expected = nold + nnew,
                "combined mask has unexpected size; forcing"
            );
            combined.adjust_size(nold + nnew, nold + nnew);
        }
        self.persist_mask_file(&dest_mask_path, &combined)?;
        Ok(combined)
    }

    /// Extends a persisted index that still matches the old row count;
    /// deletes it otherwise.
    fn reconcile_index(&self, dest_dir: &Path, src_dir: &Path, nold: u64, nnew: u64) {
        let idx_path = self.index_file_in(dest_dir);
        if !idx_path.exists() {
            return;
        }
        self.ctx.files().flush_file(&idx_path);
        // The header alone decides staleness; the bitmaps are materialized
        // only for an extension.
        let extended = match BinnedIndex::peek_nrows(&idx_path) {
            Ok(index_rows) if index_rows == nold => match BinnedIndex::read(&idx_path) {
                Ok(mut index) => match index.append(dest_dir, src_dir, nnew) {
                    Ok(n) if n == nnew => index.write(dest_dir).is_ok(),
                    Ok(n) => {
                        debug!(
                            column = %self.name,
                            extended = n,
                            expected = nnew,
                            "index extension fell short"
                        );
                        false
                    }
                    Err(e) => {
                        debug!(column = %self.name, error = %e, "index extension failed");
                        false
                    }
                },
                Err(e) => {
                    debug!(column = %self.name, error = %e, "unreadable index; discarding");
                    false
                }
            },
            Ok(index_rows) => {
                debug!(
                    column = %self.name,
                    index_rows,
                    nold,
                    "index row count does not match; discarding"
                );
                false
            }
            Err(e) => {
                debug!(column = %self.name, error = %e, "unreadable index; discarding");
                false
            }
        };
        if !extended {
            if let Err(e) = std::fs::remove_file(&idx_path) {
                warn!(column = %self.name, error = %e, "failed to remove stale index file");
            }
        }
    }
}

fn write_zeros(file: &mut std::fs::File, mut remaining: u64) -> Result<()> {
    let zeros = [0u8; 8192];
    while remaining > 0 {
        let n = usize::try_from(remaining.min(zeros.len() as u64)).unwrap_or(zeros.len());
        file.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}
