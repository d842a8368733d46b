//! Transactional file facade.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::sequence::Sequence;
use crate::sequencer::{SequencerTx, TxSequencer};
use crate::stats::WalStats;
use crate::wal::{WalRegion, WalTransaction};
use std::sync::Arc;
use txfile_storage::ByteStore;

/// A byte file with atomic, durable, repeatable-read transactions.
///
/// `TxFile` is cheap to clone; clones share the same WAL and sequencer.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use txfile_core::{Config, TxFile};
/// use txfile_storage::MemoryStore;
///
/// let file = TxFile::create(Arc::new(MemoryStore::new()), Config::default())?;
///
/// let mut tx = file.begin()?;
/// tx.resize(4)?;
/// tx.write_at(0, b"AAAA")?;
/// tx.commit()?;
///
/// let reader = file.begin_read();
/// let mut buf = [0u8; 4];
/// reader.read_at(0, &mut buf)?;
/// ```
#[derive(Debug, Clone)]
pub struct TxFile {
    region: Arc<WalRegion>,
    sequencer: Arc<TxSequencer>,
    config: Arc<Config>,
}

impl TxFile {
    /// Initializes an empty transactional file in `store`.
    ///
    /// Existing contents of the store are overwritten.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad configuration, or a storage error.
    pub fn create(store: Arc<dyn ByteStore>, config: Config) -> CoreResult<Self> {
        let region = WalRegion::create(store, &config)?;
        Ok(Self::from_region(region, config))
    }

    /// Opens a transactional file, recovering committed transactions from
    /// its WAL.
    ///
    /// # Errors
    ///
    /// Returns `WalCorrupted` if the WAL cannot be recovered. The file must
    /// not be used in that case.
    pub fn open(store: Arc<dyn ByteStore>, config: Config) -> CoreResult<Self> {
        let region = WalRegion::open(store, &config)?;
        Ok(Self::from_region(region, config))
    }

    fn from_region(region: Arc<WalRegion>, config: Config) -> Self {
        Self {
            region,
            sequencer: TxSequencer::new(),
            config: Arc::new(config),
        }
    }

    /// Begins a read-write transaction.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if no WAL transaction id is available.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let wal = self.region.begin()?;
        let (seq, (), size) = self.anchor(|| ());
        Ok(self.transaction(seq, Some(wal), size))
    }

    /// Begins a read-only transaction.
    #[must_use]
    pub fn begin_read(&self) -> Transaction {
        let (seq, (), size) = self.anchor(|| ());
        self.transaction(seq, None, size)
    }

    /// Joins the sequencer and pins the committed size in one step, so a
    /// snapshot's bytes and size agree.
    fn anchor<R>(&self, f: impl FnOnce() -> R) -> (SequencerTx, R, u64) {
        self.region.with_committed_size(|size| {
            let (seq, value) = self.sequencer.begin_with(f);
            (seq, value, size)
        })
    }

    fn transaction(&self, seq: SequencerTx, mut wal: Option<WalTransaction>, size: u64) -> Transaction {
        if let Some(wal) = wal.as_mut() {
            wal.pin_size(size);
        }
        Transaction {
            region: Arc::clone(&self.region),
            seq,
            wal,
            snapshot_size: size,
        }
    }

    /// Begins a transaction and takes the next id from `sequence` at the
    /// same instant.
    ///
    /// Transactions that receive higher ids observe every commit that
    /// transactions with lower ids observe.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if no WAL transaction id is available, or an error
    /// persisting a new batch of sequence ids.
    pub fn begin_with_sequence(
        &self,
        sequence: &Sequence,
        read_only: bool,
    ) -> CoreResult<(Transaction, u64)> {
        loop {
            let wal = if read_only {
                None
            } else {
                Some(self.region.begin()?)
            };
            let (seq, id, size) = self.anchor(|| sequence.try_next());
            if let Some(id) = id {
                return Ok((self.transaction(seq, wal, size), id));
            }

            // Refilling commits a transaction of its own, so nothing may be
            // held here.
            drop(seq);
            drop(wal);
            sequence.refill(self)?;
        }
    }

    /// Writes committed changes to the store and rotates the WAL.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if running transactions do not fit in a segment,
    /// or a storage error.
    pub fn compact(&self) -> CoreResult<()> {
        self.region.compact()
    }

    /// Returns the committed file size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.region.size()
    }

    /// Returns WAL statistics.
    #[must_use]
    pub fn stats(&self) -> &WalStats {
        self.region.stats()
    }

    /// Returns the configuration this file was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the label used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        self.region.name()
    }
}

/// A transaction on a [`TxFile`].
///
/// Reads see the file as it was when the transaction began, plus the
/// transaction's own writes. Writes become visible to transactions begun
/// after [`Transaction::commit`].
///
/// Dropping an uncommitted transaction rolls it back.
///
/// # Panics
///
/// Writing through a read-only transaction panics.
#[derive(Debug)]
pub struct Transaction {
    region: Arc<WalRegion>,
    seq: SequencerTx,
    wal: Option<WalTransaction>,
    /// Committed size when the transaction began.
    snapshot_size: u64,
}

impl Transaction {
    /// Returns true for transactions from [`TxFile::begin_read`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.wal.is_none()
    }

    /// Returns the file size as seen by this transaction.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.size(),
            None => self.snapshot_size,
        }
    }

    /// Reads up to `buf.len()` bytes at `offset`.
    ///
    /// Returns the number of bytes read, which is 0 at or past the end of
    /// the file and may be short of `buf.len()` otherwise.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> CoreResult<usize> {
        let seq = &self.seq;
        let snapshot = |off: u64, b: &mut [u8], len: &mut usize| seq.read_at(off, b, len);
        match &self.wal {
            Some(wal) => wal.read_at_with(offset, buf, snapshot),
            None => self
                .region
                .read_at_with(offset, buf, Some(self.snapshot_size), snapshot),
        }
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range extends past the end of the
    /// file, or a storage error.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> CoreResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read_at(offset + done as u64, &mut buf[done..])?;
            if n == 0 {
                return Err(CoreError::invalid_argument(format!(
                    "read of {} bytes at {offset} is past end of file (size {})",
                    buf.len(),
                    self.size()
                )));
            }
            done += n;
        }
        Ok(())
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the write extends past [`Self::size`],
    /// or `WalFull` if the WAL has no room.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.wal_mut().write_at(offset, data)
    }

    /// Writes the same `data` at each of `offsets`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_at`].
    pub fn write_at_many(&mut self, offsets: &[u64], data: &[u8]) -> CoreResult<()> {
        self.wal_mut().write_at_many(offsets, data)
    }

    /// Sets the file size.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if the WAL has no room.
    pub fn resize(&mut self, new_size: u64) -> CoreResult<()> {
        self.wal_mut().resize(new_size)
    }

    /// Copies `len` bytes from `src` to `dst`, as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either range extends past
    /// [`Self::size`], or `WalFull` if the WAL has no room.
    pub fn copy(&mut self, src: u64, dst: u64, len: u64) -> CoreResult<()> {
        let seq = &self.seq;
        let wal = self
            .wal
            .as_mut()
            .unwrap_or_else(|| panic!("write through a read-only transaction"));
        wal.copy_with(src, dst, len, |off, b, l| seq.read_at(off, b, l))
    }

    /// Commits the transaction.
    ///
    /// Committing a read-only transaction only ends it.
    ///
    /// # Errors
    ///
    /// Returns `WalFull` if the commit record does not fit, or a storage
    /// error. The transaction is rolled back on error.
    pub fn commit(self) -> CoreResult<()> {
        let Self { seq, wal, .. } = self;
        match wal {
            Some(wal) => wal.commit_with(|undo| seq.commit(undo)),
            None => Ok(()),
        }
    }

    /// Rolls the transaction back.
    pub fn rollback(self) {
        drop(self);
    }

    fn wal_mut(&mut self) -> &mut WalTransaction {
        self.wal
            .as_mut()
            .unwrap_or_else(|| panic!("write through a read-only transaction"))
    }
}
