//! Crash recovery testing for txfile.
//!
//! This module provides utilities for testing crash recovery behavior.
//! [`CrashableStore`] wraps a byte store and stops accepting writes at a
//! chosen point, leaving the inner store exactly as a power loss would.
//! Reopening the inner store then exercises WAL recovery.
//!
//! ## Test Strategy
//!
//! 1. **Crash during commit** - Every flush and word boundary of a commit
//! 2. **Crash during compaction** - Committed data must survive
//! 3. **Crash during recovery** - Recovery must be repeatable
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txfile_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.run_all().iter().all(|r| r.passed));
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use txfile_core::{Config, CoreResult, TxFile};
use tracing::debug;
use txfile_storage::{ByteStore, MemoryStore, StorageError, StorageResult};

use crate::fixtures::read_all;

/// Writes are torn at this granularity.
///
/// Stores guarantee that an aligned word is written whole, and every WAL
/// record boundary is word aligned.
pub const TORN_WRITE_ALIGN: u64 = 4;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash once this many more bytes are written. The write crossing the
    /// limit is torn.
    AfterBytes(u64),
    /// Crash once this many more flushes have completed.
    AfterFlushes(u64),
    /// Crash on the next flush.
    OnFlush,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Crash points exercised.
    pub crash_points: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, crash_points: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            crash_points,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, crash_points: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            crash_points,
            error: Some(error.to_string()),
        }
    }
}

/// A byte store wrapper that can simulate crashes.
///
/// Once crashed, every write, truncate and flush fails and nothing more
/// reaches the inner store. Reads keep working.
pub struct CrashableStore {
    inner: Arc<dyn ByteStore>,
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    flushes_left: AtomicU64,
    flushes: AtomicU64,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashableStore {
    /// Creates a new crashable store wrapping an inner store.
    pub fn new(inner: Arc<dyn ByteStore>) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            flushes_left: AtomicU64::new(u64::MAX),
            flushes: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        }
    }

    /// Returns the wrapped store, as it would be found after a restart.
    pub fn inner(&self) -> Arc<dyn ByteStore> {
        Arc::clone(&self.inner)
    }

    /// Arms a crash, counting from now.
    pub fn arm(&self, point: CrashPoint) {
        match point {
            CrashPoint::AfterBytes(bytes) => self.crash_after(bytes),
            CrashPoint::AfterFlushes(n) => self.crash_after_flushes(n),
            CrashPoint::OnFlush => self.set_fail_on_flush(true),
        }
    }

    /// Sets the store to crash after writing the specified number of bytes.
    pub fn crash_after(&self, bytes: u64) {
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets the store to crash after `n` more successful flushes.
    pub fn crash_after_flushes(&self, n: u64) {
        self.flushes_left.store(n, Ordering::SeqCst);
    }

    /// Sets whether flush should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.flushes_left.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Returns whether the store has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the bytes written since the last arm or reset.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Returns the number of successful flushes so far.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn check_alive(&self, what: &str) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{what} after simulated crash"),
            )));
        }
        Ok(())
    }
}

impl ByteStore for CrashableStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_alive("write")?;
        let len = data.len() as u64;
        let current = self.bytes_written.fetch_add(len, Ordering::SeqCst);
        let crash_threshold = self.crash_after_bytes.load(Ordering::SeqCst);

        if current >= crash_threshold {
            return Err(self.crash("write"));
        }

        // Check if this write will cross the crash threshold
        if current + len > crash_threshold {
            let partial = (crash_threshold - current) / TORN_WRITE_ALIGN * TORN_WRITE_ALIGN;
            if partial > 0 {
                self.inner.write_at(offset, &data[..partial as usize])?;
            }
            return Err(self.crash("partial write"));
        }

        self.inner.write_at(offset, data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        self.inner.truncate(new_size)
    }

    fn flush(&self) -> StorageResult<()> {
        self.check_alive("flush")?;
        if self.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        let left = self.flushes_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(self.crash("flush"));
        }
        if left != u64::MAX {
            self.flushes_left.store(left - 1, Ordering::SeqCst);
        }
        self.inner.flush()?;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Base contents every harness scenario starts from.
const BASE: &[u8; 16] = b"aaaaaaaaaaaaaaaa";

/// Contents after the harness's second transaction.
const UPDATED: &[u8; 16] = b"aaaabbbbbbbbaaaa";

/// Test harness for crash recovery scenarios.
///
/// Each scenario takes a snapshot of a memory store, replays the same
/// operation against copies of it with a crash armed at every reachable
/// point, and checks what a restart finds.
pub struct CrashRecoveryHarness {
    /// Configuration of the files under test.
    pub config: Config,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new() -> Self {
        Self::with_config(Config::new().name("crash").wal_len(1024))
    }

    /// Creates a harness for files using `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_crash_during_commit_flushes(),
            self.test_torn_commit_writes(),
            self.test_crash_during_compaction(),
            self.test_crash_during_recovery(),
        ]
    }

    /// Crashes a commit after each of its flushes.
    pub fn test_crash_during_commit_flushes(&mut self) -> CrashRecoveryResult {
        self.sweep(
            "Commit is atomic across flush crash points",
            CrashPoint::AfterFlushes,
            |file| update(file).is_ok(),
        )
    }

    /// Tears the writes of a commit at every word boundary.
    pub fn test_torn_commit_writes(&mut self) -> CrashRecoveryResult {
        self.sweep(
            "Commit is atomic across torn writes",
            |n| CrashPoint::AfterBytes(n * TORN_WRITE_ALIGN),
            |file| update(file).is_ok(),
        )
    }

    /// Crashes a compaction that follows a commit.
    pub fn test_crash_during_compaction(&mut self) -> CrashRecoveryResult {
        self.sweep(
            "Committed data survives a crashed compaction",
            CrashPoint::AfterFlushes,
            |file| {
                let acknowledged = update(file).is_ok();
                if acknowledged {
                    let _ = file.compact();
                }
                acknowledged
            },
        )
    }

    /// Crashes recovery itself, then recovers twice more.
    pub fn test_crash_during_recovery(&mut self) -> CrashRecoveryResult {
        let description = "Recovery is repeatable after a crash";
        let result = (|| -> Result<CrashRecoveryResult, String> {
            let image = self.base_image(true).map_err(|e| e.to_string())?;
            let mut points = 0;
            for n in 0.. {
                let inner: Arc<dyn ByteStore> = Arc::new(MemoryStore::with_data(image.clone()));
                let store = Arc::new(CrashableStore::new(Arc::clone(&inner)));
                store.arm(CrashPoint::AfterFlushes(n));
                drop(TxFile::open(store.clone(), self.config.clone()));
                points += 1;

                for attempt in 0..2 {
                    let found = reopen_contents(Arc::clone(&inner), &self.config)?;
                    if found != UPDATED {
                        return Ok(CrashRecoveryResult::fail(
                            description,
                            points,
                            &format!("found {found:?} on attempt {attempt} at crash point {n}"),
                        ));
                    }
                }
                if !store.has_crashed() {
                    break;
                }
            }
            Ok(CrashRecoveryResult::pass(description, points))
        })();

        let result = result.unwrap_or_else(|e| CrashRecoveryResult::fail(description, 0, &e));
        self.results.push(result.clone());
        result
    }

    /// Builds a store holding [`BASE`], and optionally [`UPDATED`] in the
    /// WAL only.
    fn base_image(&self, with_update: bool) -> CoreResult<Vec<u8>> {
        let store = Arc::new(MemoryStore::new());
        let file = TxFile::create(store.clone(), self.config.clone())?;
        let mut tx = file.begin()?;
        tx.resize(BASE.len() as u64)?;
        tx.write_at(0, BASE)?;
        tx.commit()?;
        file.compact()?;
        if with_update {
            update(&file)?;
        }
        drop(file);
        Ok(store.data())
    }

    /// Runs `op` on copies of the base image with a crash armed at
    /// `point(0)`, `point(1)`, ... until it completes without crashing.
    ///
    /// `op` returns whether the update was acknowledged. A restart must
    /// find the update if so, and either the base or the update otherwise.
    fn sweep<P, U>(&mut self, description: &str, point: P, op: U) -> CrashRecoveryResult
    where
        P: Fn(u64) -> CrashPoint,
        U: Fn(&TxFile) -> bool,
    {
        let result = (|| -> Result<CrashRecoveryResult, String> {
            let image = self.base_image(false).map_err(|e| e.to_string())?;
            let mut points = 0;
            for n in 0.. {
                let inner: Arc<dyn ByteStore> = Arc::new(MemoryStore::with_data(image.clone()));
                let store = Arc::new(CrashableStore::new(Arc::clone(&inner)));
                let file =
                    TxFile::open(store.clone(), self.config.clone()).map_err(|e| e.to_string())?;
                store.arm(point(n));
                let acknowledged = op(&file);
                drop(file);
                points += 1;

                let found = reopen_contents(inner, &self.config)?;
                debug!(scenario = description, point = n, acknowledged, "checked crash point");
                if acknowledged && found != UPDATED {
                    return Ok(CrashRecoveryResult::fail(
                        description,
                        points,
                        &format!("acknowledged commit lost at crash point {n}"),
                    ));
                }
                if found != BASE && found != UPDATED {
                    return Ok(CrashRecoveryResult::fail(
                        description,
                        points,
                        &format!("mixed contents {found:?} at crash point {n}"),
                    ));
                }
                if !store.has_crashed() {
                    break;
                }
            }
            Ok(CrashRecoveryResult::pass(description, points))
        })();

        let result = result.unwrap_or_else(|e| CrashRecoveryResult::fail(description, 0, &e));
        self.results.push(result.clone());
        result
    }
}

/// Overwrites bytes 4..12 with `b`.
fn update(file: &TxFile) -> CoreResult<()> {
    let mut tx = file.begin()?;
    tx.write_at(4, b"bbbbbbbb")?;
    tx.commit()
}

fn reopen_contents(store: Arc<dyn ByteStore>, config: &Config) -> Result<Vec<u8>, String> {
    let file = TxFile::open(store, config.clone()).map_err(|e| format!("recovery failed: {e}"))?;
    Ok(read_all(&file))
}
