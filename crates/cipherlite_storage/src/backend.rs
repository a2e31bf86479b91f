//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level random-access storage backend.
///
/// Storage backends are **opaque byte stores**. The pager lays fixed-size
/// pages over them, the journal and WAL append records to them. Backends do
/// not understand any of those formats.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes previously written at that range
/// - `write_at` past the current end extends the storage, zero-filling any gap
/// - `append` returns the offset where data was written
/// - `sync` makes all prior writes durable
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, extending the storage if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to shrink the database after a journal rollback and to reset the
    /// WAL after a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Takes an exclusive advisory lock so no other process can open the
    /// same storage.
    ///
    /// Backends without a process-visible identity accept this as a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Locked`] if another process holds the lock.
    fn try_lock_exclusive(&self) -> StorageResult<()> {
        Ok(())
    }
}
