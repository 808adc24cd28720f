//! Data partitions.
//!
//! A partition is a horizontal slice of a table: a data directory, a row
//! count, and an ordered set of columns. Each column stores its values in
//! a separate dense binary file inside the partition's directory; the
//! partition metadata lives in a line-oriented `-part.txt` file whose
//! column stanzas are defined in [`crate::column::schema`].
//!
//! Columns never own their partition. They hold a shared
//! [`PartitionContext`] carrying exactly what a column needs from its
//! owner: the row count, the data directory, the partition state, the file
//! manager, and the column policies.

use crate::column::{Column, ColumnSchema};
use crate::config::{ColumnConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::file_manager::FileManager;
use indexmap::IndexMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the metadata file inside a partition directory.
pub const METADATA_FILE: &str = "-part.txt";

/// Lifecycle state of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// All files are consistent with the recorded row count.
    Stable,
    /// An append or rewrite is in progress; derived files may lag.
    Transition,
}

impl PartitionState {
    fn from_u8(v: u8) -> Self {
        if v == 0 {
            Self::Stable
        } else {
            Self::Transition
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stable => 0,
            Self::Transition => 1,
        }
    }
}

/// The slice of a partition its columns are allowed to see.
pub struct PartitionContext {
    name: String,
    data_dir: PathBuf,
    rows: AtomicU64,
    state: AtomicU8,
    files: Arc<FileManager>,
    column_config: ColumnConfig,
}

impl PartitionContext {
    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the per-column files.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Logical number of rows; every column of the partition has this many.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Acquire)
    }

    pub(crate) fn set_rows(&self, rows: u64) {
        self.rows.store(rows, Ordering::Release);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PartitionState {
        PartitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PartitionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// The shared file manager all columns read through.
    #[must_use]
    pub fn files(&self) -> &FileManager {
        &self.files
    }

    /// Column policies.
    #[must_use]
    pub fn column_config(&self) -> &ColumnConfig {
        &self.column_config
    }
}

/// A partition and its columns.
pub struct Partition {
    ctx: Arc<PartitionContext>,
    columns: IndexMap<String, Arc<Column>>,
}

impl Partition {
    /// Creates an empty partition with zero rows in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created or the
    /// metadata file cannot be written.
    pub fn create(
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        files: Arc<FileManager>,
        config: &StoreConfig,
    ) -> Result<Self> {
        let data_dir = dir.into();
        fs::create_dir_all(&data_dir)?;
        let part = Self {
            ctx: Arc::new(PartitionContext {
                name: name.into(),
                data_dir,
                rows: AtomicU64::new(0),
                state: AtomicU8::new(PartitionState::Stable.as_u8()),
                files,
                column_config: config.column.clone(),
            }),
            columns: IndexMap::new(),
        };
        part.write_metadata()?;
        info!(partition = %part.ctx.name, dir = %part.ctx.data_dir.display(), "created partition");
        Ok(part)
    }

    /// Loads a partition from the metadata file in `dir`.
    ///
    /// Malformed column stanzas are skipped with a warning; the partition
    /// itself loads as long as the header is intact.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the metadata file cannot be read, or a schema
    /// error if the header is malformed.
    pub fn open(
        dir: impl Into<PathBuf>,
        files: Arc<FileManager>,
        config: &StoreConfig,
    ) -> Result<Self> {
        let data_dir = dir.into();
        let text = fs::read_to_string(data_dir.join(METADATA_FILE))?;

        let mut name = String::new();
        let mut rows = 0u64;
        let mut schemas = Vec::new();
        let mut lines = text.lines();
        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if starts_ignore_case(trimmed, "Begin Column")
                || starts_ignore_case(trimmed, "Begin Property")
            {
                match ColumnSchema::parse_stanza(&mut lines) {
                    Ok(schema) => schemas.push(schema),
                    Err(e) => warn!(error = %e, "skipping malformed column stanza"),
                }
            } else if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                if key.eq_ignore_ascii_case("name") {
                    name = value.trim_matches('"').to_string();
                } else if key.eq_ignore_ascii_case("number_of_rows") {
                    rows = value.parse().map_err(|_| {
                        Error::Schema(format!("invalid row count '{value}' in partition header"))
                    })?;
                } else if !key.eq_ignore_ascii_case("number_of_columns") {
                    debug!(key, "skipping unrecognized partition header line");
                }
            }
        }
        if name.is_empty() {
            return Err(Error::Schema(
                "partition metadata has no Name entry".to_string(),
            ));
        }

        let ctx = Arc::new(PartitionContext {
            name,
            data_dir,
            rows: AtomicU64::new(rows),
            state: AtomicU8::new(PartitionState::Stable.as_u8()),
            files,
            column_config: config.column.clone(),
        });
        let mut columns = IndexMap::new();
        for schema in schemas {
            let column = Arc::new(Column::new(Arc::clone(&ctx), schema));
            columns.insert(column.name().to_string(), column);
        }
        info!(
            partition = %ctx.name,
            rows,
            columns = columns.len(),
            "opened partition"
        );
        Ok(Self { ctx, columns })
    }

    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Logical row count.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.ctx.rows()
    }

    /// The shared context handed to columns.
    #[must_use]
    pub fn context(&self) -> &Arc<PartitionContext> {
        &self.ctx
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Arc<Column>> {
        self.columns.get(name)
    }

    /// All columns in stanza order.
    pub fn columns(&self) -> impl Iterator<Item = &Arc<Column>> {
        self.columns.values()
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Adds a column described by `schema`.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the name is empty or already taken.
    pub fn add_column(&mut self, schema: ColumnSchema) -> Result<Arc<Column>> {
        if schema.name.is_empty() {
            return Err(Error::Schema("column name must not be empty".to_string()));
        }
        if self.columns.contains_key(&schema.name) {
            return Err(Error::Schema(format!(
                "column '{}' already exists in partition '{}'",
                schema.name,
                self.ctx.name()
            )));
        }
        let column = Arc::new(Column::new(Arc::clone(&self.ctx), schema));
        self.columns
            .insert(column.name().to_string(), Arc::clone(&column));
        Ok(column)
    }

    /// Serializes the partition header and all column stanzas to
    /// `-part.txt`, replacing the previous file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn write_metadata(&self) -> Result<()> {
        let mut text = String::new();
        let _ = writeln!(text, "Name = \"{}\"", self.ctx.name());
        let _ = writeln!(text, "Number_of_rows = {}", self.ctx.rows());
        let _ = writeln!(text, "Number_of_columns = {}", self.columns.len());
        for column in self.columns.values() {
            column.schema().write_stanza(&mut text);
        }
        let path = self.ctx.data_dir().join(METADATA_FILE);
        self.ctx.files().flush_file(&path);
        fs::write(&path, text)?;
        Ok(())
    }

    /// Appends `nnew` rows to every column from the per-column files in
    /// `src_dir`, then commits the new row count.
    ///
    /// Columns whose file is absent in `src_dir` receive null rows. The
    /// partition is in the transition state while data moves; the state and
    /// the metadata file are restored on success.
    ///
    /// # Errors
    ///
    /// Returns the first column error encountered; the row count is not
    /// committed in that case.
    pub fn append_from(&self, src_dir: &Path, nnew: u64) -> Result<u64> {
        if nnew == 0 {
            return Ok(0);
        }
        let nold = self.ctx.rows();
        self.ctx.set_state(PartitionState::Transition);
        let result = self.append_columns(src_dir, nold, nnew);
        match &result {
            Ok(appended) => {
                self.ctx.set_rows(nold + appended);
                self.ctx.set_state(PartitionState::Stable);
                self.write_metadata()?;
            }
            Err(e) => {
                warn!(error = %e, "append failed; partition left in transition state");
            }
        }
        result
    }

    fn append_columns(&self, src_dir: &Path, nold: u64, nnew: u64) -> Result<u64> {
        let dest = self.ctx.data_dir().to_path_buf();
        let mut appended = nnew;
        for column in self.columns.values() {
            let n = column.append(&dest, src_dir, nold, nnew)?;
            appended = appended.min(n);
        }
        Ok(appended)
    }

    /// Shortens every column and the recorded row count to exactly `rows`.
    ///
    /// # Errors
    ///
    /// Returns the first column error encountered.
    pub fn truncate(&self, rows: u64) -> Result<()> {
        for column in self.columns.values() {
            column.truncate_data(self.ctx.data_dir(), rows)?;
        }
        self.ctx.set_rows(rows);
        self.write_metadata()?;
        Ok(())
    }

    /// Appends `nnew` in-memory rows. `batch` maps column names to their
    /// new values (with optional validity bits); columns not in the batch
    /// receive null rows.
    ///
    /// # Errors
    ///
    /// Returns a schema error for an unknown column name, an invariant
    /// error when a value vector does not hold `nnew` values, and column
    /// errors from the appends.
    pub fn append_values(
        &self,
        batch: &[(&str, crate::column::ValuesVec, Option<&crate::bitvector::Bitvector>)],
        nnew: u64,
    ) -> Result<u64> {
        for (name, values, _) in batch {
            if !self.columns.contains_key(*name) {
                return Err(Error::Schema(format!(
                    "append names unknown column '{name}'"
                )));
            }
            if values.len() as u64 != nnew {
                return Err(Error::Invariant(format!(
                    "column '{name}' received {} values for {nnew} appended rows",
                    values.len()
                )));
            }
        }
        let nold = self.ctx.rows();
        self.ctx.set_state(PartitionState::Transition);
        for column in self.columns.values() {
            match batch.iter().find(|(name, _, _)| *name == column.name()) {
                Some((_, values, valid)) => column.append_values(values, *valid)?,
                None => column.append_nulls(nnew)?,
            };
        }
        self.ctx.set_rows(nold + nnew);
        self.ctx.set_state(PartitionState::Stable);
        self.write_metadata()?;
        Ok(nold + nnew)
    }

    /// Keeps only the rows set in `sel`, rewriting every column in place
    /// and committing the reduced row count.
    ///
    /// # Errors
    ///
    /// Returns an invariant error when `sel` does not span the current
    /// rows, and column errors from the rewrites.
    pub fn save_selected(&self, sel: &crate::bitvector::Bitvector) -> Result<u64> {
        let kept = sel.cnt();
        self.ctx.set_state(PartitionState::Transition);
        for column in self.columns.values() {
            column.save_selected(sel, self.ctx.data_dir())?;
        }
        self.ctx.set_rows(kept);
        self.ctx.set_state(PartitionState::Stable);
        self.write_metadata()?;
        Ok(kept)
    }
}

fn starts_ignore_case(line: &str, keyword: &str) -> bool {
    line.len() >= keyword.len() && line[..keyword.len()].eq_ignore_ascii_case(keyword)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn store() -> (Arc<FileManager>, StoreConfig) {
        let config = StoreConfig::default();
        (Arc::new(FileManager::new(&config.file_manager)), config)
    }

    #[test]
    fn test_create_and_reopen_empty_partition() {
        let dir = tempfile::tempdir().unwrap();
        let (fm, config) = store();

        let part = Partition::create(dir.path(), "events", Arc::clone(&fm), &config).unwrap();
        assert_eq!(part.rows(), 0);

        let back = Partition::open(dir.path(), fm, &config).unwrap();
        assert_eq!(back.name(), "events");
        assert_eq!(back.column_count(), 0);
    }

    #[test]
    fn test_metadata_roundtrip_with_columns() {
        let dir = tempfile::tempdir().unwrap();
        let (fm, config) = store();

        let mut part = Partition::create(dir.path(), "events", Arc::clone(&fm), &config).unwrap();
        let mut schema = ColumnSchema::new("energy", ColumnType::F64);
        schema.lower = 0.0;
        schema.upper = 100.0;
        part.add_column(schema.clone()).unwrap();
        part.add_column(ColumnSchema::new("run", ColumnType::U32))
            .unwrap();
        part.write_metadata().unwrap();

        let back = Partition::open(dir.path(), fm, &config).unwrap();
        assert_eq!(back.column_count(), 2);
        let energy = back.column("energy").unwrap();
        assert_eq!(energy.schema(), schema);
        // Stanza order survives the round trip.
        let names: Vec<_> = back.columns().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["energy", "run"]);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (fm, config) = store();
        let mut part = Partition::create(dir.path(), "p", fm, &config).unwrap();
        part.add_column(ColumnSchema::new("x", ColumnType::I32))
            .unwrap();
        assert!(part
            .add_column(ColumnSchema::new("x", ColumnType::I32))
            .is_err());
    }
}
