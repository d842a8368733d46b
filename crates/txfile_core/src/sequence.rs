//! Persistent id sequence.
//!
//! ```text
//! | magic (8, BE) | next value (8, BE) |
//! ```
//!
//! Ids are handed out from an in-memory batch of `cache` values. When the
//! batch runs out, the stored value is advanced by `cache` in a transaction of
//! its own, so an id is never handed out twice, even across a crash. Ids left
//! in a batch when the sequence is dropped are skipped.

use crate::error::{CoreError, CoreResult};
use crate::txfile::{Transaction, TxFile};
use parking_lot::Mutex;
use tracing::debug;

const MAGIC: u64 = 0x7365_7175_656e_6365;

#[derive(Debug)]
struct Batch {
    next: u64,
    limit: u64,
}

/// A crash-safe, monotonically increasing `u64` sequence stored in a
/// [`TxFile`].
#[derive(Debug)]
pub struct Sequence {
    offset: u64,
    cache: u64,
    batch: Mutex<Batch>,
    refill_lock: Mutex<()>,
}

impl Sequence {
    /// Bytes taken by a sequence in the file.
    pub const SIZE: u64 = 16;

    /// Ids reserved per persisted batch by default.
    pub const DEFAULT_CACHE: u64 = 1;

    /// Writes a new sequence at `offset` that starts at `initial`.
    ///
    /// The transaction must already cover `offset + SIZE` bytes.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    pub fn init(tx: &mut Transaction, offset: u64, initial: u64) -> CoreResult<()> {
        let mut buf = [0u8; Self::SIZE as usize];
        buf[..8].copy_from_slice(&MAGIC.to_be_bytes());
        buf[8..].copy_from_slice(&initial.to_be_bytes());
        tx.write_at(offset, &buf)
    }

    /// Opens the sequence at `offset`, reserving `cache` ids at a time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero `cache`, and `InvalidFormat` if
    /// no sequence is stored at `offset`.
    pub fn open(file: &TxFile, offset: u64, cache: u64) -> CoreResult<Self> {
        if cache == 0 {
            return Err(CoreError::invalid_argument(
                "sequence cache size must be at least 1",
            ));
        }

        let tx = file.begin_read();
        let mut buf = [0u8; Self::SIZE as usize];
        tx.read_exact_at(offset, &mut buf).map_err(|e| match e {
            CoreError::InvalidArgument { .. } => {
                CoreError::invalid_format(format!("no sequence stored at {offset}"))
            }
            other => other,
        })?;
        let (magic, stored) = buf.split_at(8);
        let magic = u64::from_be_bytes(be_u64(magic));
        if magic != MAGIC {
            return Err(CoreError::invalid_format(format!(
                "sequence magic mismatch at {offset}: {magic:#018x}"
            )));
        }
        let stored = u64::from_be_bytes(be_u64(stored));

        Ok(Self {
            offset,
            cache,
            batch: Mutex::new(Batch {
                next: stored,
                limit: stored,
            }),
            refill_lock: Mutex::new(()),
        })
    }

    /// Returns the next id.
    ///
    /// # Errors
    ///
    /// Returns an error if a new batch cannot be persisted.
    pub fn next(&self, file: &TxFile) -> CoreResult<u64> {
        loop {
            if let Some(id) = self.try_next() {
                return Ok(id);
            }
            self.refill(file)?;
        }
    }

    /// Takes the next id from the current batch, if any is left.
    pub(crate) fn try_next(&self) -> Option<u64> {
        let mut batch = self.batch.lock();
        if batch.next < batch.limit {
            batch.next += 1;
            Some(batch.next - 1)
        } else {
            None
        }
    }

    /// Persists a new batch of ids.
    ///
    /// Must not be called while a transaction of the caller is starting.
    pub(crate) fn refill(&self, file: &TxFile) -> CoreResult<()> {
        let _refill = self.refill_lock.lock();
        {
            let batch = self.batch.lock();
            if batch.next < batch.limit {
                return Ok(());
            }
        }

        let value_offset = self.offset + 8;
        let mut tx = file.begin()?;
        let mut buf = [0u8; 8];
        tx.read_exact_at(value_offset, &mut buf)?;
        let stored = u64::from_be_bytes(buf);
        let limit = stored.checked_add(self.cache).ok_or_else(|| {
            CoreError::invalid_argument(format!("sequence at {} is exhausted", self.offset))
        })?;
        tx.write_at(value_offset, &limit.to_be_bytes())?;
        tx.commit()?;

        debug!(name = %file.name(), offset = self.offset, from = stored, to = limit, "reserved sequence ids");
        *self.batch.lock() = Batch {
            next: stored,
            limit,
        };
        Ok(())
    }
}

fn be_u64(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use tempfile::tempdir;
    use txfile_storage::{FileStore, MemoryStore};

    fn file_with_sequence(initial: u64) -> TxFile {
        let file = TxFile::create(Arc::new(MemoryStore::new()), Config::new().wal_len(4096)).unwrap();
        let mut tx = file.begin().unwrap();
        tx.resize(Sequence::SIZE).unwrap();
        Sequence::init(&mut tx, 0, initial).unwrap();
        tx.commit().unwrap();
        file
    }

    #[test]
    fn sequence_increases_and_reopens() {
        let file = file_with_sequence(17);
        {
            let s = Sequence::open(&file, 0, Sequence::DEFAULT_CACHE).unwrap();
            assert_eq!(s.next(&file).unwrap(), 17);
            assert_eq!(s.next(&file).unwrap(), 18);
            assert_eq!(s.next(&file).unwrap(), 19);
        }
        let s = Sequence::open(&file, 0, Sequence::DEFAULT_CACHE).unwrap();
        assert_eq!(s.next(&file).unwrap(), 20);
        assert_eq!(s.next(&file).unwrap(), 21);
    }

    #[test]
    fn cached_ids_are_skipped_on_reopen() {
        let file = file_with_sequence(0);
        {
            let s = Sequence::open(&file, 0, 1000).unwrap();
            assert_eq!(s.next(&file).unwrap(), 0);
            assert_eq!(s.next(&file).unwrap(), 1);
            assert_eq!(s.next(&file).unwrap(), 2);
        }
        let s = Sequence::open(&file, 0, Sequence::DEFAULT_CACHE).unwrap();
        assert_eq!(s.next(&file).unwrap(), 1000);
        assert_eq!(s.next(&file).unwrap(), 1001);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let file = TxFile::create(Arc::new(MemoryStore::new()), Config::new().wal_len(4096)).unwrap();
        let mut tx = file.begin().unwrap();
        tx.resize(Sequence::SIZE).unwrap();
        tx.write_at(0, b"aaaaaaaa").unwrap();
        tx.commit().unwrap();

        let err = Sequence::open(&file, 0, 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn missing_sequence_is_invalid_format() {
        let file = TxFile::create(Arc::new(MemoryStore::new()), Config::new().wal_len(4096)).unwrap();
        let err = Sequence::open(&file, 0, 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn zero_cache_is_rejected() {
        let file = file_with_sequence(0);
        let err = Sequence::open(&file, 0, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn file_sequence_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seq.tx");
        let config = Config::new().wal_len(1024);
        {
            let file = TxFile::create(Arc::new(FileStore::open(&path).unwrap()), config.clone()).unwrap();
            let mut tx = file.begin().unwrap();
            tx.resize(Sequence::SIZE).unwrap();
            Sequence::init(&mut tx, 0, 100).unwrap();
            tx.commit().unwrap();
            let s = Sequence::open(&file, 0, 10).unwrap();
            assert_eq!(s.next(&file).unwrap(), 100);
        }
        let file = TxFile::open(Arc::new(FileStore::open(&path).unwrap()), config).unwrap();
        let s = Sequence::open(&file, 0, 10).unwrap();
        assert_eq!(s.next(&file).unwrap(), 110);
    }
}
