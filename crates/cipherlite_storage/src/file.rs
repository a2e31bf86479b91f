//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Open file plus the length the backend has observed or produced.
#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

impl Handle {
    fn seek_to(&mut self, offset: u64) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// A file-based storage backend.
///
/// Used for the database file, its rollback journal, and its write-ahead log.
///
/// # Durability
///
/// - `flush()` hands buffered writes to the OS
/// - `sync()` calls `File::sync_all()`; commit paths rely on it as a barrier
///
/// # Thread Safety
///
/// One mutex covers the file handle and its length, so a seek and the read
/// or write that follows it are never interleaved with another caller.
///
/// # Example
///
/// ```no_run
/// use cipherlite_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data.db")).unwrap();
/// backend.write_at(4096, &[0u8; 4096]).unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
}

impl FileBackend {
    /// Opens the file at `path`, creating an empty one if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle { file, len }),
        })
    }

    /// Like [`open`](Self::open), but creates missing parent directories
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
            _ => {}
        }
        Self::open(path)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        let size = handle.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let mut buffer = vec![0u8; len];
        if len > 0 {
            handle.seek_to(offset)?;
            handle.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let handle = self.handle.get_mut();
        handle.seek_to(offset)?;
        handle.file.write_all(data)?;
        handle.len = handle.len.max(offset + data.len() as u64);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.handle.get_mut().len;
        self.write_at(offset, data)?;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.handle.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.handle.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if new_size > handle.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: handle.len,
            });
        }
        handle.file.set_len(new_size)?;
        handle.file.sync_all()?;
        handle.len = new_size;
        Ok(())
    }

    fn try_lock_exclusive(&self) -> StorageResult<()> {
        let handle = self.handle.lock();
        FileExt::try_lock_exclusive(&handle.file).map_err(|_| StorageError::Locked)
    }
}
