//! Shared file-to-memory manager.
//!
//! Maps a path to an in-memory block, either by memory-mapping the file or
//! by reading it fully into the heap, and hands out shared references.
//! Callers never mmap directly; the manager chooses the access path from
//! the file size and an [`AccessHint`]. The cache is process-wide from the
//! point of view of its users and internally synchronized, but it is an
//! explicit handle passed into the partition so tests can run isolated
//! instances.
//!
//! A [`FileManager::flush_file`] call is mandatory before overwriting a
//! file in place; it drops the cached block so later readers see the new
//! content.

use crate::config::FileManagerConfig;
use crate::error::Result;
use memmap2::Mmap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Preference for how a file should be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessHint {
    /// Memory-map files above the configured threshold, read smaller ones.
    #[default]
    MmapLargeFiles,
    /// Always read the file fully into the heap.
    ReadFully,
    /// Always memory-map.
    MmapAlways,
}

/// An immutable in-memory image of a file.
pub enum FileBlock {
    /// Memory-mapped content.
    Mapped(Mmap),
    /// Heap-resident content.
    Heap(Vec<u8>),
}

impl FileBlock {
    /// The raw bytes of the file image.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Heap(buf) => buf,
        }
    }

    /// Length of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the file was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves paths to shared in-memory blocks and tracks page access.
pub struct FileManager {
    cache: RwLock<FxHashMap<PathBuf, Arc<FileBlock>>>,
    mmap_threshold: u64,
    pages_recorded: AtomicU64,
}

impl FileManager {
    /// Creates a manager with the given configuration.
    #[must_use]
    pub fn new(config: &FileManagerConfig) -> Self {
        Self {
            cache: RwLock::new(FxHashMap::default()),
            mmap_threshold: config.mmap_threshold_bytes,
            pages_recorded: AtomicU64::new(0),
        }
    }

    /// Materializes `path` into memory and returns a shared reference.
    ///
    /// The last outstanding reference releases the mapping once the entry
    /// has been flushed from the cache.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be opened, mapped, or read.
    pub fn get_file(&self, path: &Path, hint: AccessHint) -> Result<Arc<FileBlock>> {
        if let Some(block) = self.cache.read().get(path) {
            trace!(path = %path.display(), "file cache hit");
            return Ok(Arc::clone(block));
        }

        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let use_mmap = match hint {
            AccessHint::MmapAlways => true,
            AccessHint::ReadFully => false,
            AccessHint::MmapLargeFiles => size >= self.mmap_threshold,
        };
        let block = if use_mmap {
            // SAFETY: the mapping is created from a file we just opened
            // read-only. StriaDB data directories are single-writer and every
            // in-place rewrite is preceded by flush_file, so the mapping is
            // not resized or truncated while the Arc is alive.
            let map = unsafe { Mmap::map(&file)? };
            debug!(path = %path.display(), size, "memory-mapped file");
            Arc::new(FileBlock::Mapped(map))
        } else {
            let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
            let mut file = file;
            file.read_to_end(&mut buf)?;
            debug!(path = %path.display(), size, "read file into heap");
            Arc::new(FileBlock::Heap(buf))
        };

        let mut cache = self.cache.write();
        let entry = cache
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::clone(&block));
        Ok(Arc::clone(entry))
    }

    /// Non-blocking variant of [`FileManager::get_file`].
    ///
    /// Returns the block only when it is already resident, or when the hint
    /// permits mapping it without reading its content. Returns `None` when
    /// honoring the request would require reading the file into the heap.
    #[must_use]
    pub fn try_get_file(&self, path: &Path, hint: AccessHint) -> Option<Arc<FileBlock>> {
        if let Some(block) = self.cache.read().get(path) {
            return Some(Arc::clone(block));
        }
        // Mapping is cheap: no bytes are transferred until pages are touched.
        let may_map = match hint {
            AccessHint::MmapAlways => true,
            AccessHint::ReadFully => false,
            AccessHint::MmapLargeFiles => {
                std::fs::metadata(path).is_ok_and(|m| m.len() >= self.mmap_threshold)
            }
        };
        if !may_map {
            return None;
        }
        let file = File::open(path).ok()?;
        // SAFETY: read-only mapping of a file under the single-writer /
        // flush-before-rewrite discipline described in get_file.
        let map = unsafe { Mmap::map(&file).ok()? };
        let block = Arc::new(FileBlock::Mapped(map));
        let mut cache = self.cache.write();
        let entry = cache
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::clone(&block));
        Some(Arc::clone(entry))
    }

    /// Invalidates the cached block for `path`.
    ///
    /// Outstanding references keep their image alive; new readers will see
    /// the file as it is on disk. Mandatory before any in-place rewrite.
    pub fn flush_file(&self, path: &Path) {
        if self.cache.write().remove(path).is_some() {
            debug!(path = %path.display(), "flushed file from cache");
        }
    }

    /// Records an access to the half-open page range `[lo, hi)`.
    ///
    /// A statistics hook for access-pattern learning; the counts feed later
    /// access-preference decisions.
    pub fn record_pages(&self, lo: u64, hi: u64) {
        let page = Self::page_size() as u64;
        let first = lo / page;
        let last = hi.div_ceil(page);
        self.pages_recorded
            .fetch_add(last.saturating_sub(first), Ordering::Relaxed);
    }

    /// Total pages recorded so far.
    #[must_use]
    pub fn pages_recorded(&self) -> u64 {
        self.pages_recorded.load(Ordering::Relaxed)
    }

    /// OS page granularity in bytes.
    #[must_use]
    pub fn page_size() -> usize {
        #[cfg(unix)]
        {
            // SAFETY: sysconf with a valid name has no preconditions.
            let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if ret > 0 {
                return ret as usize;
            }
        }
        4096
    }

    /// Number of blocks currently cached.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileManagerConfig;

    fn manager(threshold: u64) -> FileManager {
        FileManager::new(&FileManagerConfig {
            mmap_threshold_bytes: threshold,
        })
    }

    #[test]
    fn test_get_file_reads_small_files_into_heap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let fm = manager(1 << 20);
        let block = fm.get_file(&path, AccessHint::MmapLargeFiles).unwrap();
        assert!(matches!(*block, FileBlock::Heap(_)));
        assert_eq!(block.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_mmap_always() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, vec![7u8; 64]).unwrap();

        let fm = manager(1 << 20);
        let block = fm.get_file(&path, AccessHint::MmapAlways).unwrap();
        assert!(matches!(*block, FileBlock::Mapped(_)));
        assert_eq!(block.len(), 64);
    }

    #[test]
    fn test_cache_returns_same_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, [9u8; 16]).unwrap();

        let fm = manager(1 << 20);
        let a = fm.get_file(&path, AccessHint::ReadFully).unwrap();
        let b = fm.get_file(&path, AccessHint::ReadFully).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fm.resident_count(), 1);
    }

    #[test]
    fn test_try_get_file_refuses_heap_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, [1u8; 32]).unwrap();

        let fm = manager(1 << 20);
        // Small file under MmapLargeFiles would need a heap read.
        assert!(fm.try_get_file(&path, AccessHint::MmapLargeFiles).is_none());
        // Once resident, the same call succeeds.
        fm.get_file(&path, AccessHint::ReadFully).unwrap();
        assert!(fm.try_get_file(&path, AccessHint::MmapLargeFiles).is_some());
    }

    #[test]
    fn test_flush_file_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, [1u8, 2]).unwrap();

        let fm = manager(1 << 20);
        let old = fm.get_file(&path, AccessHint::ReadFully).unwrap();
        fm.flush_file(&path);
        std::fs::write(&path, [3u8, 4, 5]).unwrap();
        let new = fm.get_file(&path, AccessHint::ReadFully).unwrap();
        assert_eq!(old.as_bytes(), &[1, 2]);
        assert_eq!(new.as_bytes(), &[3, 4, 5]);
    }

    #[test]
    fn test_record_pages() {
        let fm = manager(1 << 20);
        let page = FileManager::page_size() as u64;
        fm.record_pages(0, page * 3);
        assert_eq!(fm.pages_recorded(), 3);
    }
}
