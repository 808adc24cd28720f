//! Index lifecycle: load, pin, unload, purge.
//!
//! Exactly one index may be materialized in memory per column at any
//! moment. Readers pin it through [`IndexGuard`]: the pin count rises
//! before the shared lock is taken and falls after it is released. The
//! write side ([`Column::unload_index`]) holds the pin mutex while waiting
//! for the count to reach zero, which also fences out new pins, then takes
//! the exclusive lock and drops the index.
//!
//! A thread must release its guard before unloading; holding both
//! deadlocks by construction.

use super::{Column, ColumnType};
use crate::config::StaleIndexPolicy;
use crate::error::Result;
use crate::index::{BinnedIndex, ColumnIndex};
use parking_lot::RwLockReadGuard;
use tracing::{debug, warn};

/// Shared, pinned access to a column's materialized index.
pub(crate) struct IndexGuard<'a> {
    column: &'a Column,
    guard: Option<RwLockReadGuard<'a, Option<Box<dyn ColumnIndex>>>>,
}

impl IndexGuard<'_> {
    /// The pinned index, when one is materialized.
    pub(crate) fn index(&self) -> Option<&dyn ColumnIndex> {
        self.guard.as_ref().and_then(|g| g.as_deref())
    }
}

impl Drop for IndexGuard<'_> {
    fn drop(&mut self) {
        // Release the shared lock before touching the pin count, so an
        // unloader woken by the notify can take the exclusive lock.
        self.guard.take();
        let mut pins = self.column.pins.lock();
        *pins -= 1;
        self.column.pin_cv.notify_all();
    }
}

impl Column {
    /// Pins the index for shared use, materializing it first if needed.
    pub(crate) fn index_guard(&self) -> IndexGuard<'_> {
        {
            let needs_load = self.index.read().is_none();
            if needs_load {
                self.load_index();
            }
        }
        {
            let mut pins = self.pins.lock();
            *pins += 1;
        }
        IndexGuard {
            column: self,
            guard: Some(self.index.read()),
        }
    }

    /// Materializes the index from its `.idx` blob, or builds it from the
    /// column data. Failures are logged and leave the column without an
    /// index; evaluation falls back to scans.
    pub fn load_index(&self) {
        if self.rows() == 0 || matches!(self.ctype, ColumnType::Oid | ColumnType::Text) {
            return;
        }
        let mut slot = self.index.write();
        if slot.is_some() {
            return;
        }
        match self.create_index() {
            Ok(Some(index)) => {
                debug!(column = %self.name, index = index.name(), "materialized index");
                *slot = Some(index);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(column = %self.name, error = %e, "failed to materialize index");
            }
        }
    }

    fn create_index(&self) -> Result<Option<Box<dyn ColumnIndex>>> {
        if self.index_hint.to_ascii_lowercase().contains("noindex") {
            return Ok(None);
        }
        let rows = self.rows();
        let path = self.index_file_in(self.ctx.data_dir());
        if path.exists() {
            // The blob header carries the row count; a mismatched or
            // unreadable blob is decided without materializing the bitmaps.
            let salvage = self.ctx.column_config().stale_index == StaleIndexPolicy::Salvage;
            match BinnedIndex::peek_nrows(&path) {
                Ok(index_rows) if index_rows == rows || (index_rows > rows && salvage) => {
                    if index_rows != rows {
                        debug!(
                            column = %self.name,
                            index_rows,
                            rows,
                            "salvaging over-long index"
                        );
                    }
                    match BinnedIndex::read(&path) {
                        Ok(index) => return Ok(Some(Box::new(index))),
                        Err(e) => {
                            warn!(column = %self.name, error = %e, "unreadable index blob; rebuilding");
                            self.purge_index_file();
                        }
                    }
                }
                Ok(index_rows) => {
                    debug!(
                        column = %self.name,
                        index_rows,
                        rows,
                        "discarding index with mismatched row count"
                    );
                    self.purge_index_file();
                }
                Err(e) => {
                    warn!(column = %self.name, error = %e, "unreadable index blob; rebuilding");
                    self.purge_index_file();
                }
            }
        }
        if !self.data_file().exists() {
            return Ok(None);
        }

        let mask = self.null_mask()?;
        let (values, positions) = self.select_f64_with_indices(&mask)?;
        let index = BinnedIndex::build(
            &self.name,
            self.ctype,
            rows,
            self.num_bins(),
            &values,
            &positions,
        );
        if let Err(e) = index.write(self.ctx.data_dir()) {
            warn!(column = %self.name, error = %e, "failed to persist freshly built index");
        }
        Ok(Some(Box::new(index)))
    }

    /// Destroys the in-memory index, blocking until every reader has
    /// unpinned it. A no-op when no index is materialized.
    pub fn unload_index(&self) {
        let mut pins = self.pins.lock();
        while *pins > 0 {
            self.pin_cv.wait(&mut pins);
        }
        let mut slot = self.index.write();
        if slot.take().is_some() {
            debug!(column = %self.name, "unloaded index");
        }
    }

    /// Removes the `.idx` blob from the active data directory.
    pub fn purge_index_file(&self) {
        let path = self.index_file_in(self.ctx.data_dir());
        self.ctx.files().flush_file(&path);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(column = %self.name, error = %e, "failed to remove index file");
            }
        }
    }

    /// Size of the persisted index blob in bytes, or `None` when absent.
    #[must_use]
    pub fn index_size(&self) -> Option<u64> {
        std::fs::metadata(self.index_file_in(self.ctx.data_dir()))
            .ok()
            .map(|m| m.len())
    }

    /// Number of bins requested by the index hint (`no=K`), defaulting
    /// to 10.
    #[must_use]
    pub fn num_bins(&self) -> usize {
        let hint = self.index_hint.to_ascii_lowercase();
        if let Some(pos) = hint.find("no=") {
            let digits: String = hint[pos + 3..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(n) = digits.parse::<usize>() {
                if n > 0 {
                    return n;
                }
            }
        }
        10
    }

    /// Expands `rng` outward onto bin boundaries. Returns true when the
    /// range changed; false without an index.
    pub fn expand_range(&self, rng: &mut crate::predicate::ContinuousRange) -> bool {
        let guard = self.index_guard();
        guard.index().is_some_and(|idx| idx.expand_range(rng))
    }

    /// Contracts `rng` inward onto bin boundaries. Returns true when the
    /// range changed; false without an index.
    pub fn contract_range(&self, rng: &mut crate::predicate::ContinuousRange) -> bool {
        let guard = self.index_guard();
        guard.index().is_some_and(|idx| idx.contract_range(rng))
    }
}
