//! File source: the single owner of the backing file.
//!
//! Opens the file, exposes its length, serves arbitrary byte ranges out of
//! a memory mapping, and carries the reader-reservation count that decides
//! when the mapping may be released. Change detection lives in the
//! [`watcher`] submodule.

pub mod watcher;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, warn};
use memmap2::Mmap;
use parking_lot::RwLock;

use crate::error::{LoglensError, Result};

/// Memory-mapped source of file bytes.
///
/// The mapping always covers the file as it was at the last
/// [`refresh`](FileSource::refresh); reads beyond it report
/// `TruncatedDuringRead` rather than touching unmapped pages.
pub struct FileSource {
    path: PathBuf,
    inner: RwLock<SourceInner>,
    attached_readers: AtomicI32,
}

struct SourceInner {
    file: File,
    mmap: Option<Mmap>,
    size: i64,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("size", &self.size())
            .field("attached_readers", &self.attached_readers.load(Ordering::SeqCst))
            .finish()
    }
}

impl FileSource {
    /// Open the backing file and map its current contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoglensError::FileNotFound { path: path.clone() },
            _ => LoglensError::read_failed(format!("Failed to open {}", path.display()), e),
        })?;

        let size = file
            .metadata()
            .map_err(|e| LoglensError::read_failed("Failed to get file metadata", e))?
            .len() as i64;

        let mmap = map_file(&file, size)?;
        debug!("Opened {} ({} bytes)", path.display(), size);

        Ok(Self {
            path,
            inner: RwLock::new(SourceInner { file, mmap, size }),
            attached_readers: AtomicI32::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file at the last refresh, in bytes.
    pub fn size(&self) -> i64 {
        self.inner.read().size
    }

    /// Read `length` bytes starting at `offset` into a fresh buffer.
    pub fn read(&self, offset: i64, length: usize) -> Result<Vec<u8>> {
        self.with_bytes(offset, length, |bytes| bytes.to_vec())
    }

    /// Run `f` over the requested byte range without copying it out.
    ///
    /// The mapping is pinned for the duration of `f`; keep `f` to pure
    /// computation (decoding, scanning).
    pub fn with_bytes<R>(&self, offset: i64, length: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.ensure_mapped()?;

        let inner = self.inner.read();
        let end = offset
            .checked_add(length as i64)
            .ok_or_else(|| LoglensError::internal("byte range overflow"))?;
        if offset < 0 || end > inner.size {
            return Err(LoglensError::TruncatedDuringRead { offset });
        }
        if length == 0 {
            return Ok(f(&[]));
        }

        let mmap = inner
            .mmap
            .as_ref()
            .ok_or_else(|| LoglensError::internal("file mapping missing after ensure_mapped"))?;
        Ok(f(&mmap[offset as usize..end as usize]))
    }

    /// Re-stat the open handle and remap to the current length. Used after
    /// the watcher reports growth or truncation of the same file.
    pub fn refresh(&self) -> Result<i64> {
        let mut inner = self.inner.write();
        let size = inner
            .file
            .metadata()
            .map_err(|e| LoglensError::read_failed("Failed to get file metadata", e))?
            .len() as i64;
        inner.mmap = map_file(&inner.file, size)?;
        inner.size = size;
        debug!("Refreshed mapping of {} to {} bytes", self.path.display(), size);
        Ok(size)
    }

    /// Re-open the path from scratch. Used when the file was atomically
    /// replaced and the old handle points at the deleted inode.
    pub fn reopen(&self) -> Result<i64> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoglensError::FileNotFound {
                path: self.path.clone(),
            },
            _ => LoglensError::read_failed(format!("Failed to open {}", self.path.display()), e),
        })?;
        let size = file
            .metadata()
            .map_err(|e| LoglensError::read_failed("Failed to get file metadata", e))?
            .len() as i64;

        let mut inner = self.inner.write();
        inner.mmap = map_file(&file, size)?;
        inner.file = file;
        inner.size = size;
        Ok(size)
    }

    /// Declare interest in the file contents. While at least one reader is
    /// attached the mapping stays resident.
    pub fn attach_reader(&self) {
        self.attached_readers.fetch_add(1, Ordering::SeqCst);
    }

    /// Withdraw a reservation. When the last reader detaches, the mapping
    /// is released; a later read remaps lazily.
    pub fn detach_reader(&self) {
        let previous = self.attached_readers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "detach_reader without a matching attach");
        if previous == 1 {
            let mut inner = self.inner.write();
            if self.attached_readers.load(Ordering::SeqCst) == 0 {
                inner.mmap = None;
                debug!("Released mapping of {}", self.path.display());
            }
        }
    }

    fn ensure_mapped(&self) -> Result<()> {
        if self.inner.read().mmap.is_some() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        if inner.mmap.is_none() && inner.size > 0 {
            inner.mmap = map_file(&inner.file, inner.size)?;
        }
        Ok(())
    }
}

fn map_file(file: &File, size: i64) -> Result<Option<Mmap>> {
    if size == 0 {
        return Ok(None);
    }

    // Safety: the mapping is never outlived by the file handle, and reads
    // past a concurrent truncation are fenced by the size recorded with it.
    let mmap = unsafe {
        Mmap::map(file).map_err(|e| LoglensError::read_failed("Failed to memory map file", e))?
    };

    #[cfg(unix)]
    if let Err(e) = mmap.advise(memmap2::Advice::Sequential) {
        warn!("Failed to set mmap advice: {}", e);
    }

    Ok(Some(mmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(content).expect("write test data");
        file.flush().expect("flush test data");
        file
    }

    #[test]
    fn test_open_and_read() {
        let file = create_test_file(b"line1\nline2\n");
        let source = FileSource::open(file.path()).unwrap();

        assert_eq!(source.size(), 12);
        assert_eq!(source.read(0, 5).unwrap(), b"line1");
        assert_eq!(source.read(6, 5).unwrap(), b"line2");
    }

    #[test]
    fn test_open_missing_file() {
        let result = FileSource::open("/nonexistent/loglens-test.log");
        assert!(matches!(result, Err(LoglensError::FileNotFound { .. })));
    }

    #[test]
    fn test_read_past_end_reports_truncation() {
        let file = create_test_file(b"short");
        let source = FileSource::open(file.path()).unwrap();

        assert!(matches!(
            source.read(3, 10),
            Err(LoglensError::TruncatedDuringRead { offset: 3 })
        ));
    }

    #[test]
    fn test_empty_file() {
        let file = create_test_file(b"");
        let source = FileSource::open(file.path()).unwrap();

        assert_eq!(source.size(), 0);
        assert_eq!(source.read(0, 0).unwrap(), Vec::<u8>::new());
        assert!(source.read(0, 1).is_err());
    }

    #[test]
    fn test_refresh_picks_up_growth() {
        let mut file = create_test_file(b"first\n");
        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.size(), 6);

        file.write_all(b"second\n").unwrap();
        file.flush().unwrap();

        assert_eq!(source.refresh().unwrap(), 13);
        assert_eq!(source.read(6, 6).unwrap(), b"second");
    }

    #[test]
    fn test_detach_releases_and_read_remaps() {
        let file = create_test_file(b"contents\n");
        let source = FileSource::open(file.path()).unwrap();

        source.attach_reader();
        assert_eq!(source.read(0, 8).unwrap(), b"contents");
        source.detach_reader();

        // Mapping was dropped with the last reader; a read lazily remaps.
        assert_eq!(source.read(0, 8).unwrap(), b"contents");
    }

    #[test]
    fn test_with_bytes_zero_copy() {
        let file = create_test_file(b"abcdef");
        let source = FileSource::open(file.path()).unwrap();

        let length = source.with_bytes(2, 3, |bytes| {
            assert_eq!(bytes, b"cde");
            bytes.len()
        });
        assert_eq!(length.unwrap(), 3);
    }
}
