//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A byte store held entirely in memory.
///
/// Backs `:memory:` databases and lets the journal and WAL tests build
/// damaged images without touching the file system. Nothing survives a drop.
///
/// # Example
///
/// ```rust
/// use cipherlite_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.write_at(8, b"tail").unwrap();
/// assert_eq!(backend.read_at(0, 12).unwrap(), b"\0\0\0\0\0\0\0\0tail");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `bytes`, such as a copy of a damaged file.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    /// Snapshot of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let start = usize::try_from(offset).ok();
        match start.and_then(|s| bytes.get(s..s.checked_add(len)?)) {
            Some(range) => Ok(range.to_vec()),
            None => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let bytes = self.bytes.get_mut();
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let bytes = self.bytes.get_mut();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let bytes = self.bytes.get_mut();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        bytes.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_at(0, 0).unwrap().is_empty());
        assert!(backend.read_at(0, 1).is_err());
    }

    #[test]
    fn positional_writes_overwrite_and_extend() {
        let mut backend = InMemoryBackend::with_data(b"page-one".to_vec());
        backend.write_at(5, b"two").unwrap();
        assert_eq!(backend.data(), b"page-two");

        backend.write_at(10, b"!").unwrap();
        assert_eq!(backend.data(), b"page-two\0\0!");
    }

    #[test]
    fn append_reports_where_frames_land() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hdr").unwrap(), 0);
        assert_eq!(backend.append(b"frame").unwrap(), 3);
        assert_eq!(backend.size().unwrap(), 8);
    }

    #[test]
    fn reads_never_cross_the_end() {
        let backend = InMemoryBackend::with_data(vec![1; 10]);
        assert!(matches!(
            backend.read_at(8, 4),
            Err(StorageError::ReadPastEnd { offset: 8, len: 4, size: 10 })
        ));
        assert!(backend.read_at(u64::MAX, 1).is_err());
        assert_eq!(backend.read_at(10, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn truncate_only_shrinks() {
        let mut backend = InMemoryBackend::with_data(b"journal".to_vec());
        backend.truncate(3).unwrap();
        assert_eq!(backend.data(), b"jou");
        assert!(backend.truncate(4).is_err());
    }

    proptest! {
        #[test]
        fn written_ranges_read_back(offset in 0u64..8192, data in prop::collection::vec(any::<u8>(), 1..512)) {
            let mut backend = InMemoryBackend::new();
            backend.write_at(offset, &data).unwrap();
            prop_assert_eq!(backend.size().unwrap(), offset + data.len() as u64);
            prop_assert_eq!(backend.read_at(offset, data.len()).unwrap(), data);
        }
    }
}
