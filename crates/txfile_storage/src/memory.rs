//! In-memory byte store for testing.

use crate::backend::ByteStore;
use crate::error::StorageResult;
use parking_lot::RwLock;

/// An in-memory byte store.
///
/// This store keeps all data in memory and is suitable for:
/// - Unit tests
/// - Crash simulations that snapshot the bytes
/// - Ephemeral files that don't need persistence
///
/// # Thread Safety
///
/// Readers share a lock; writers take it exclusively.
///
/// # Example
///
/// ```rust
/// use txfile_storage::{ByteStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.write_at(0, b"test data").unwrap();
/// assert_eq!(store.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all bytes in the store.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl ByteStore for MemoryStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let data = self.data.read();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        if new_data.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + new_data.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.data.write().resize(new_size as usize, 0);
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn memory_new_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.size().unwrap(), 0);
        assert!(store.data().is_empty());
    }

    #[test]
    fn memory_write_and_read_back() {
        let store = MemoryStore::new();
        store.write_at(0, b"hello world").unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn memory_write_past_end_zero_fills_gap() {
        let store = MemoryStore::new();
        store.write_at(4, b"ab").unwrap();
        assert_eq!(store.data(), vec![0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn memory_overwrite_in_place() {
        let store = MemoryStore::with_data(b"abcdef".to_vec());
        store.write_at(2, b"XY").unwrap();
        assert_eq!(store.data(), b"abXYef");
    }

    #[test]
    fn memory_short_read_at_end() {
        let store = MemoryStore::with_data(b"hello".to_vec());
        let mut buf = [0u8; 10];
        assert_eq!(store.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(store.read_at(5, &mut buf).unwrap(), 0);
        assert_eq!(store.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn memory_read_exact_past_end_fails() {
        let store = MemoryStore::with_data(b"hello".to_vec());
        let mut buf = [0u8; 10];
        let result = store.read_exact_at(3, &mut buf);
        assert!(matches!(
            result,
            Err(StorageError::ReadPastEnd {
                offset: 3,
                len: 10,
                size: 5
            })
        ));
    }

    #[test]
    fn memory_empty_write_is_noop() {
        let store = MemoryStore::new();
        store.write_at(100, b"").unwrap();
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn memory_truncate_shrinks_and_grows() {
        let store = MemoryStore::with_data(b"hello world".to_vec());
        store.truncate(5).unwrap();
        assert_eq!(store.data(), b"hello");

        store.truncate(8).unwrap();
        assert_eq!(store.data(), b"hello\0\0\0");
    }

    #[test]
    fn memory_flush_succeeds() {
        let store = MemoryStore::new();
        store.write_at(0, b"data").unwrap();
        assert!(store.flush().is_ok());
    }

    #[test]
    fn memory_shared_through_arc() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let shared: std::sync::Arc<dyn ByteStore> = store.clone();
        shared.write_at(0, b"xyz").unwrap();
        assert_eq!(store.data(), b"xyz");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn memory_matches_vec_model(
                ops in prop::collection::vec((0u64..64, prop::collection::vec(any::<u8>(), 0..16)), 0..32)
            ) {
                let store = MemoryStore::new();
                let mut model: Vec<u8> = Vec::new();
                for (offset, data) in &ops {
                    store.write_at(*offset, data).unwrap();
                    if !data.is_empty() {
                        let end = *offset as usize + data.len();
                        if model.len() < end {
                            model.resize(end, 0);
                        }
                        model[*offset as usize..end].copy_from_slice(data);
                    }
                }
                prop_assert_eq!(store.data(), model);
            }
        }
    }
}
