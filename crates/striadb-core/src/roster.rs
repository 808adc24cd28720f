//! Rosters: persistent sorted permutations of row indices.
//!
//! A roster orders the rows of a column by value, enabling membership
//! lookups without a bitmap index and without sorted data. The permutation
//! persists in an `.ind` sidecar (little-endian `u32` row numbers in value
//! order); the values themselves are re-read through the column on load.

use crate::bitvector::Bitvector;
use crate::column::Column;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

/// A sorted permutation of the valid rows of one column.
pub struct Roster {
    rows: u64,
    /// Row numbers in ascending value order.
    perm: Vec<u32>,
    /// Values aligned with `perm`, ascending.
    sorted_values: Vec<f64>,
}

impl Roster {
    /// Loads the `.ind` sidecar for `column`, or builds and persists it.
    ///
    /// The roster covers the valid rows only; [`Roster::is_complete`]
    /// reports whether it spans every row of the partition.
    ///
    /// # Errors
    ///
    /// Returns IO errors from reading the column or writing the sidecar.
    pub fn load_or_build(column: &Column) -> Result<Self> {
        let rows = column.rows();
        let mask = column.null_mask()?;
        let (values, positions) = column.select_f64_with_indices(&mask)?;

        let path = roster_path(column);
        if let Ok(perm) = read_permutation(&path) {
            if perm.len() == values.len() {
                if let Some(sorted_values) = reorder(&values, &positions, &perm) {
                    return Ok(Self {
                        rows,
                        perm,
                        sorted_values,
                    });
                }
            }
            debug!(column = column.name(), "stale roster sidecar; rebuilding");
        }

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let perm: Vec<u32> = order
            .iter()
            .map(|&i| u32::try_from(positions[i]).unwrap_or(u32::MAX))
            .collect();
        let sorted_values: Vec<f64> = order.iter().map(|&i| values[i]).collect();

        if let Err(e) = write_permutation(&path, &perm) {
            warn!(column = column.name(), error = %e, "failed to persist roster");
        }
        Ok(Self {
            rows,
            perm,
            sorted_values,
        })
    }

    /// Number of entries in the permutation.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.perm.len() as u64
    }

    /// Returns true when the roster holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    /// Returns true when the roster spans every row of the partition.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.len() == self.rows
    }

    /// Marks the rows whose value is a member of `needles`.
    ///
    /// `needles` must be sorted and distinct; the result has one bit per
    /// partition row.
    #[must_use]
    pub fn locate(&self, needles: &[f64]) -> Bitvector {
        let mut hits: Vec<u64> = Vec::new();
        for &needle in needles {
            let lo = self
                .sorted_values
                .partition_point(|&v| v.total_cmp(&needle).is_lt());
            let mut i = lo;
            #[allow(clippy::float_cmp)]
            while i < self.sorted_values.len() && self.sorted_values[i] == needle {
                hits.push(u64::from(self.perm[i]));
                i += 1;
            }
        }
        hits.sort_unstable();
        hits.dedup();
        Bitvector::from_sorted_positions(hits, self.rows)
    }
}

fn roster_path(column: &Column) -> std::path::PathBuf {
    column
        .context()
        .data_dir()
        .join(format!("{}.ind", column.name()))
}

fn read_permutation(path: &Path) -> Result<Vec<u32>> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;
    if raw.len() % 4 != 0 {
        return Err(Error::Invariant(format!(
            "roster file '{}' is not a whole number of entries",
            path.display()
        )));
    }
    Ok(raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn write_permutation(path: &Path, perm: &[u32]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for &p in perm {
        out.write_all(&p.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Reapplies a persisted permutation to freshly read values; `None` when
/// the permutation references rows the column no longer has.
fn reorder(values: &[f64], positions: &[u64], perm: &[u32]) -> Option<Vec<f64>> {
    // Map row number -> value for the valid rows.
    let mut by_row = rustc_hash::FxHashMap::default();
    for (&v, &row) in values.iter().zip(positions) {
        by_row.insert(row, v);
    }
    let mut sorted = Vec::with_capacity(perm.len());
    for &p in perm {
        sorted.push(*by_row.get(&u64::from(p))?);
    }
    // A permutation that no longer sorts the data is stale.
    if sorted.windows(2).any(|w| w[0].total_cmp(&w[1]).is_gt()) {
        return None;
    }
    Some(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnSchema, ColumnType, ValuesVec};
    use crate::config::StoreConfig;
    use crate::file_manager::FileManager;
    use crate::partition::Partition;
    use std::sync::Arc;

    fn column_with(values: Vec<u32>, dir: &std::path::Path) -> Partition {
        let config = StoreConfig::default();
        let files = Arc::new(FileManager::new(&config.file_manager));
        let mut part = Partition::create(dir, "t", files, &config).unwrap();
        part.add_column(ColumnSchema::new("v", ColumnType::U32)).unwrap();
        let n = values.len() as u64;
        part.append_values(&[("v", ValuesVec::U32(values), None)], n)
            .unwrap();
        part
    }

    #[test]
    fn test_locate_unsorted_values() {
        let dir = tempfile::tempdir().unwrap();
        let part = column_with(vec![9, 2, 7, 2, 5], dir.path());
        let roster = Roster::load_or_build(part.column("v").unwrap()).unwrap();
        assert!(roster.is_complete());

        let hits = roster.locate(&[2.0, 7.0]);
        assert_eq!(hits.size(), 5);
        assert_eq!(hits.set_positions().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(roster.locate(&[4.0]).cnt(), 0);
    }

    #[test]
    fn test_sidecar_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let part = column_with(vec![3, 1, 2], dir.path());
        let col = part.column("v").unwrap();
        Roster::load_or_build(col).unwrap();
        assert!(dir.path().join("v.ind").exists());

        // A second load reads the permutation back instead of re-sorting.
        let again = Roster::load_or_build(col).unwrap();
        assert_eq!(
            again.locate(&[1.0]).set_positions().collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn test_stale_sidecar_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let part = column_with(vec![3, 1, 2], dir.path());
        let col = part.column("v").unwrap();

        // A permutation that does not sort the data must be discarded.
        write_permutation(&dir.path().join("v.ind"), &[0, 1, 2]).unwrap();
        let roster = Roster::load_or_build(col).unwrap();
        assert_eq!(
            roster.locate(&[3.0]).set_positions().collect::<Vec<_>>(),
            vec![0]
        );
    }
}
