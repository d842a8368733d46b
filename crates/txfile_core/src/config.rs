//! Transactional file configuration.

use crate::error::{CoreError, CoreResult};

/// Bytes taken by a segment header plus an `InvalidatePreviousWal` and an
/// `End` record.
const MIN_SEGMENT_LEN: u64 = 12;

/// Configuration for creating or opening a transactional file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Label attached to log events.
    pub name: String,

    /// Byte offset of the WAL region in the store.
    pub wal_offset: u64,

    /// Length of the WAL region. Split into two equal segments.
    pub wal_len: u64,

    /// Commit ids reserved per persisted reservation.
    pub commit_id_batch: u32,

    /// Compact the WAL right after committing a transaction that copied bytes.
    ///
    /// A `Copy` record read its source from the file state at commit time,
    /// so replaying it over a file that already holds later bytes is unsafe.
    /// Compacting moves the log past it.
    pub compact_after_copy: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from("txfile"),
            wal_offset: 0,
            wal_len: 32 * 1024, // 32 KiB
            commit_id_batch: 1 << 16,
            compact_after_copy: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the label used in logs.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the WAL region offset.
    #[must_use]
    pub const fn wal_offset(mut self, offset: u64) -> Self {
        self.wal_offset = offset;
        self
    }

    /// Sets the WAL region length.
    #[must_use]
    pub const fn wal_len(mut self, len: u64) -> Self {
        self.wal_len = len;
        self
    }

    /// Sets the commit id reservation batch.
    #[must_use]
    pub const fn commit_id_batch(mut self, batch: u32) -> Self {
        self.commit_id_batch = batch;
        self
    }

    /// Sets whether copies force a compaction after commit.
    #[must_use]
    pub const fn compact_after_copy(mut self, value: bool) -> Self {
        self.compact_after_copy = value;
        self
    }

    /// Returns the length of one WAL segment.
    #[must_use]
    pub const fn segment_len(&self) -> u64 {
        self.wal_len / 2
    }

    /// Returns the first logical byte after the WAL region.
    #[must_use]
    pub const fn wal_end(&self) -> u64 {
        self.wal_offset + self.wal_len
    }

    /// Checks that the configuration describes a usable layout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the WAL region cannot hold two segments,
    /// is not evenly divisible into them, or if the commit batch is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.wal_len % 2 != 0 {
            return Err(CoreError::invalid_argument(format!(
                "WAL length {} does not split into two equal segments",
                self.wal_len
            )));
        }
        if self.segment_len() < MIN_SEGMENT_LEN {
            return Err(CoreError::invalid_argument(format!(
                "WAL length {} is too small, need at least {} bytes",
                self.wal_len,
                2 * MIN_SEGMENT_LEN
            )));
        }
        if self.wal_offset.checked_add(self.wal_len).is_none() {
            return Err(CoreError::invalid_argument("WAL region overflows u64"));
        }
        if self.commit_id_batch == 0 {
            return Err(CoreError::invalid_argument("commit id batch must be positive"));
        }
        Ok(())
    }
}
