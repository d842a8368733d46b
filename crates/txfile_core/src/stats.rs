//! WAL statistics.
//!
//! Counters are atomic and can be read while commits are in progress.
//!
//! ```rust,ignore
//! let file = TxFile::create(store, Config::default())?;
//! // Perform transactions...
//! let stats = file.stats().snapshot();
//! println!("commits: {}", stats.commits);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a WAL region.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Committed transactions.
    commits: AtomicU64,
    /// Records appended, of any kind.
    writes: AtomicU64,
    /// Completed compactions.
    compactions: AtomicU64,
    /// Flushes issued to the byte store.
    file_flushes: AtomicU64,
}

impl WalStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.file_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of committed transactions.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of appended WAL records.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the number of store flushes.
    pub fn file_flushes(&self) -> u64 {
        self.file_flushes.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.commits(),
            writes: self.writes(),
            compactions: self.compactions(),
            file_flushes: self.file_flushes(),
        }
    }
}

/// A point-in-time copy of [`WalStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Committed transactions.
    pub commits: u64,
    /// Records appended.
    pub writes: u64,
    /// Completed compactions.
    pub compactions: u64,
    /// Store flushes.
    pub file_flushes: u64,
}
