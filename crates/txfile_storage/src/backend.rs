//! Byte store trait definition.

use crate::error::{StorageError, StorageResult};
use std::sync::Arc;

/// A positional byte store underneath a transactional file.
///
/// Byte stores are **opaque**. They provide reads and writes at arbitrary
/// offsets, a size, truncation and a durability barrier. The WAL region owns
/// all interpretation of the bytes.
///
/// # Invariants
///
/// - `read_at` returns the bytes most recently written at that offset
/// - `read_at` may return fewer bytes than requested only at end-of-store
/// - `write_at` past the end extends the store; any gap reads as zeroes
/// - `flush` makes every preceding `write_at`/`truncate` durable
/// - A failed operation never corrupts bytes written by earlier operations
///
/// All methods take `&self`; implementations use interior locking so that
/// concurrent readers do not serialize on each other.
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait ByteStore: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read. A return of `0` for a non-empty
    /// buffer means `offset` is at or past the end of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize>;

    /// Writes all of `data` at `offset`, extending the store if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Sets the size of the store.
    ///
    /// Shrinking discards trailing bytes. Growing appends zeroes.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;

    /// Flushes all pending writes to durable storage.
    ///
    /// After this returns successfully, all previously written data
    /// is guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the store ends before the
    /// buffer is filled, or any error from [`ByteStore::read_at`].
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read_at(offset + done as u64, &mut buf[done..])?;
            if n == 0 {
                return Err(StorageError::ReadPastEnd {
                    offset,
                    len: buf.len(),
                    size: self.size()?,
                });
            }
            done += n;
        }
        Ok(())
    }
}

impl<T: ByteStore + ?Sized> ByteStore for Arc<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        (**self).write_at(offset, data)
    }

    fn size(&self) -> StorageResult<u64> {
        (**self).size()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        (**self).truncate(new_size)
    }

    fn flush(&self) -> StorageResult<()> {
        (**self).flush()
    }
}
