//! Structural maintenance: truncation, selective rewrite, in-memory
//! append.

use super::select::ValuesVec;
use super::Column;
use crate::bitvector::{Bitvector, IndexSet};
use crate::error::{Error, Result};
use crate::file_manager::AccessHint;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

impl Column {
    /// Shortens (or zero-extends) the data file and mask in `dir` to
    /// exactly `rows` rows.
    ///
    /// Fixed-width files are cut at `rows * element_size`; TEXT files are
    /// cut after the `rows`-th NUL terminator, appending NUL bytes when
    /// the file holds fewer strings.
    ///
    /// # Errors
    ///
    /// Returns IO errors from resizing the files.
    pub fn truncate_data(&self, dir: &Path, rows: u64) -> Result<u64> {
        let path = self.data_file_in(dir);
        self.ctx.files().flush_file(&path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let (kept_rows, byte_len) = match self.element_size() {
            Some(elem) => {
                let elem = elem as u64;
                let present = file.metadata()?.len() / elem;
                if present < rows {
                    let mut file = &file;
                    file.seek(SeekFrom::End(0))?;
                    write_zeros(&mut file, (rows - present) * elem)?;
                }
                (present.min(rows), rows * elem)
            }
            None => {
                let mut raw = std::fs::read(&path)?;
                let mut seen = 0u64;
                let mut offset = raw.len();
                for (i, &b) in raw.iter().enumerate() {
                    if b == 0 {
                        seen += 1;
                        if seen == rows {
                            offset = i + 1;
                            break;
                        }
                    }
                }
                if seen < rows {
                    raw.resize(raw.len() + usize::try_from(rows - seen).unwrap_or(0), 0);
                    offset = raw.len();
                    std::fs::write(&path, &raw)?;
                }
                (seen.min(rows), offset as u64)
            }
        };
        file.set_len(byte_len)?;
        drop(file);

        // The mask keeps its leading bits; rows the file never held stay
        // null, rows cut off disappear.
        let mask_path = self.mask_file_in(dir);
        let mut mask = if dir == self.ctx.data_dir() {
            self.null_mask()?
        } else {
            Bitvector::read(&mask_path).unwrap_or_default()
        };
        mask.adjust_size(kept_rows, rows);
        self.persist_mask_file(&mask_path, &mask)?;
        if dir == self.ctx.data_dir() {
            self.invalidate_cached_mask();
            self.unload_index();
        }
        debug!(column = %self.name, rows, byte_len, "truncated column data");
        Ok(rows)
    }

    /// Rewrites the data file and mask in `dest_dir` keeping only the rows
    /// set in `sel`. Returns the number of kept rows.
    ///
    /// The rewrite goes through a temporary file replaced atomically; the
    /// persisted index is purged, since it no longer matches.
    ///
    /// # Errors
    ///
    /// Returns IO errors from the rewrite.
    pub fn save_selected(&self, sel: &Bitvector, dest_dir: &Path) -> Result<u64> {
        if sel.size() != self.rows() {
            return Err(Error::Invariant(format!(
                "selection has {} bits for {} rows",
                sel.size(),
                self.rows()
            )));
        }
        let kept = sel.cnt();
        {
            let _structure = self.index.write();
            let src_path = self.data_file();
            let dest_path = self.data_file_in(dest_dir);
            let tmp_path = dest_dir.join(format!("{}.tmp", self.name));

            match self.element_size() {
                Some(elem) => {
                    let block = self.ctx.files().get_file(&src_path, AccessHint::MmapLargeFiles)?;
                    let bytes = block.as_bytes();
                    let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp_path)?);
                    for set in sel.index_sets() {
                        match set {
                            IndexSet::Range { begin, end } => {
                                let lo = usize::try_from(begin).unwrap_or(usize::MAX) * elem;
                                let hi = usize::try_from(end).unwrap_or(usize::MAX) * elem;
                                if lo < bytes.len() {
                                    out.write_all(&bytes[lo..hi.min(bytes.len())])?;
                                }
                            }
                            IndexSet::Literal(indices) => {
                                for i in indices {
                                    let lo = usize::try_from(i).unwrap_or(usize::MAX) * elem;
                                    if lo + elem <= bytes.len() {
                                        out.write_all(&bytes[lo..lo + elem])?;
                                    }
                                }
                            }
                        }
                    }
                    out.flush()?;
                }
                None => self.save_selected_text(&src_path, &tmp_path, sel)?,
            }

            self.ctx.files().flush_file(&src_path);
            self.ctx.files().flush_file(&dest_path);
            std::fs::rename(&tmp_path, &dest_path)?;

            let mask = self.null_mask()?.subset(sel);
            self.persist_mask_file(&self.mask_file_in(dest_dir), &mask)?;

            let idx_path = self.index_file_in(dest_dir);
            self.ctx.files().flush_file(&idx_path);
            if idx_path.exists() {
                if let Err(e) = std::fs::remove_file(&idx_path) {
                    warn!(column = %self.name, error = %e, "failed to purge index after rewrite");
                }
            }
            if dest_dir == self.ctx.data_dir() {
                self.invalidate_cached_mask();
            }
        }
        if dest_dir == self.ctx.data_dir() {
            self.unload_index();
        }
        debug!(column = %self.name, kept, "saved selected rows");
        Ok(kept)
    }

    fn save_selected_text(&self, src: &Path, tmp: &Path, sel: &Bitvector) -> Result<()> {
        let raw = std::fs::read(src)?;
        let mut out = std::io::BufWriter::new(std::fs::File::create(tmp)?);
        let mut wanted = sel.set_positions();
        let mut next = wanted.next();
        let mut row = 0u64;
        let mut start = 0usize;
        for (i, &b) in raw.iter().enumerate() {
            if b != 0 {
                continue;
            }
            if next == Some(row) {
                out.write_all(&raw[start..=i])?;
                next = wanted.next();
            }
            row += 1;
            start = i + 1;
            if next.is_none() {
                break;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Extends the mask with `nnew` null rows, leaving the data file
    /// untouched; rows past the end of the file are implicitly null.
    /// Returns the row count after the append; the caller commits it.
    ///
    /// # Errors
    ///
    /// Returns IO errors from persisting the mask.
    pub fn append_nulls(&self, nnew: u64) -> Result<u64> {
        let mut mask = self.null_mask()?;
        mask.append_fill(false, nnew);
        self.persist_mask_file(&self.mask_file(), &mask)?;
        {
            let mut cached = self.cached.lock();
            cached.mask = Some(mask);
        }
        Ok(self.rows() + nnew)
    }

    /// Appends typed in-memory values with their validity bits to the
    /// active data directory. Returns the row count after the append; the
    /// caller commits it to the partition.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when `values` is not the column's native
    /// width, an invariant error when `valid` disagrees with the value
    /// count, or IO errors.
    pub fn append_values(&self, values: &ValuesVec, valid: Option<&Bitvector>) -> Result<u64> {
        if !values.matches_column(self.ctype) {
            return Err(Error::TypeMismatch {
                column: self.ctype.type_word(),
                name: self.name.clone(),
                requested: values.type_name(),
            });
        }
        let nnew = values.len() as u64;
        if let Some(valid) = valid {
            if valid.size() != nnew {
                return Err(Error::Invariant(format!(
                    "validity mask has {} bits for {} appended values",
                    valid.size(),
                    nnew
                )));
            }
        }
        let nold = self.rows();
        let elem = self.element_size().unwrap_or(0) as u64;

        let _structure = self.index.write();
        let path = self.data_file();
        self.ctx.files().flush_file(&path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let end = file.seek(SeekFrom::End(0))?;
        if elem > 0 && end < nold * elem {
            write_zeros(&mut file, nold * elem - end)?;
        }
        let mut raw = Vec::with_capacity(values.len() * elem.max(1) as usize);
        values.write_le_bytes(&mut raw);
        file.write_all(&raw)?;
        file.flush()?;
        drop(file);

        let mut mask = self.null_mask()?;
        match valid {
            Some(valid) => mask.append(valid),
            None => mask.append_fill(true, nnew),
        }
        self.persist_mask_file(&self.mask_file(), &mask)?;
        {
            let mut cached = self.cached.lock();
            cached.mask = Some(mask);
        }
        self.sorted.store(false, std::sync::atomic::Ordering::Release);
        Ok(nold + nnew)
    }
}

fn write_zeros<W: Write>(out: &mut W, mut remaining: u64) -> Result<()> {
    let zeros = [0u8; 8192];
    while remaining > 0 {
        let n = usize::try_from(remaining.min(zeros.len() as u64)).unwrap_or(zeros.len());
        out.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}
