//! Stress tests for txfile.
//!
//! These tests verify behavior under heavy load and concurrent access.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use txfile_core::{CommitManager, CoreError, CoreResult, Sequence, TxFile};

use crate::fixtures::scenarios;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
    /// Consistency violations observed.
    pub violations: Vec<String>,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
            violations: Vec::new(),
        }
    }

    /// Returns true if no violation was observed.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Violations: {}", self.violations.len());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
        }
    }
}

impl StressConfig {
    /// A configuration small enough for unit tests.
    pub fn quick() -> Self {
        Self {
            operations: 100,
            threads: 4,
        }
    }
}

/// Runs `body` in `threads` threads and collects the outcomes.
fn run_threads<F>(config: &StressConfig, body: F) -> StressTestResult
where
    F: Fn(usize, usize) -> CoreResult<()> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|thread_id| {
            let body = Arc::clone(&body);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let operations = config.operations;
            thread::spawn(move || {
                for op in 0..operations {
                    match body(thread_id, op) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Retries `f` while it fails with a retryable error.
fn retry<T>(mut f: impl FnMut() -> CoreResult<T>) -> CoreResult<T> {
    loop {
        match f() {
            Err(e) if e.is_retryable() => thread::yield_now(),
            other => return other,
        }
    }
}

/// Each thread repeatedly overwrites its own 8-byte slot with a counter.
///
/// Afterwards every slot must hold its thread's last counter.
pub fn concurrent_writers(file: &TxFile, config: &StressConfig) -> StressTestResult {
    let slots = config.threads as u64 * 8;
    retry(|| {
        let mut tx = file.begin()?;
        tx.resize(slots)?;
        tx.commit()
    })
    .expect("Failed to size file");

    let shared = file.clone();
    let mut result = run_threads(config, move |thread_id, op| {
        retry(|| {
            let mut tx = shared.begin()?;
            tx.write_at(thread_id as u64 * 8, &(op as u64 + 1).to_be_bytes())?;
            tx.commit()
        })
    });

    let tx = file.begin_read();
    for thread_id in 0..config.threads {
        let mut buf = [0u8; 8];
        if let Err(e) = tx.read_exact_at(thread_id as u64 * 8, &mut buf) {
            result.violations.push(format!("slot {thread_id}: {e}"));
            continue;
        }
        let found = u64::from_be_bytes(buf);
        if found != config.operations as u64 {
            result
                .violations
                .push(format!("slot {thread_id} holds {found}, expected {}", config.operations));
        }
    }
    result
}

/// One writer commits equal values to two fields while readers check that
/// every snapshot sees them equal.
pub fn readers_during_writes(file: &TxFile, config: &StressConfig) -> StressTestResult {
    retry(|| {
        let mut tx = file.begin()?;
        tx.resize(16)?;
        tx.commit()
    })
    .expect("Failed to size file");

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let file = file.clone();
        let stop = Arc::clone(&stop);
        let operations = config.operations;
        thread::spawn(move || {
            for i in 1..=operations as u64 {
                let _ = retry(|| {
                    let mut tx = file.begin()?;
                    tx.write_at(0, &i.to_be_bytes())?;
                    tx.write_at(8, &i.to_be_bytes())?;
                    tx.commit()
                });
            }
            stop.store(true, Ordering::SeqCst);
        })
    };

    let violations = Arc::new(Mutex::new(Vec::new()));
    let shared = file.clone();
    let seen = Arc::clone(&violations);
    let done = Arc::clone(&stop);
    let readers = StressConfig {
        operations: config.operations,
        threads: config.threads.saturating_sub(1).max(1),
    };
    let mut result = run_threads(&readers, move |_, _| {
        if done.load(Ordering::SeqCst) {
            return Ok(());
        }
        let tx = shared.begin_read();
        let mut buf = [0u8; 16];
        tx.read_exact_at(0, &mut buf)?;
        if buf[..8] != buf[8..] {
            seen.lock().push(format!("torn snapshot {buf:?}"));
        }
        Ok(())
    });

    writer.join().expect("Writer thread panicked");
    result.violations.extend(violations.lock().drain(..));
    result
}

/// Threads push write tickets through a commit manager; phase 2 callbacks
/// must observe commit ids in strictly increasing order.
pub fn commit_ordering(config: &StressConfig) -> StressTestResult {
    let test_file = scenarios::with_metadata(0);
    let file = test_file.file.clone();
    let manager = CommitManager::allocate(&file, scenarios::COMMIT_MANAGER_OFFSET)
        .expect("Failed to allocate commit manager");
    let applied = Arc::new(Mutex::new(Vec::new()));

    let order = Arc::clone(&applied);
    let shared = file.clone();
    let mut result = run_threads(config, move |_, _| {
        let ticket = manager.prepare_commit(&shared)?;
        let seq = ticket.seq().clone();
        let order = Arc::clone(&order);
        ticket.apply::<CoreError, _, _>(|| Ok(()), move || order.lock().push(seq))
    });

    let applied = applied.lock();
    for pair in applied.windows(2) {
        if pair[0] >= pair[1] {
            result
                .violations
                .push(format!("{} applied before {}", pair[0], pair[1]));
        }
    }
    drop(test_file);
    result
}

/// Threads begin transactions tied to a shared sequence; every id must be
/// handed out once.
pub fn sequence_uniqueness(config: &StressConfig, cache: u64) -> StressTestResult {
    let test_file = scenarios::with_metadata(1);
    let file = test_file.file.clone();
    let sequence = Arc::new(
        Sequence::open(&file, scenarios::SEQUENCE_OFFSET, cache).expect("Failed to open sequence"),
    );
    let ids = Arc::new(Mutex::new(Vec::new()));

    let collected = Arc::clone(&ids);
    let shared = file.clone();
    let mut result = run_threads(config, move |_, op| {
        let (tx, id) = shared.begin_with_sequence(&sequence, op % 2 == 0)?;
        collected.lock().push(id);
        tx.commit()
    });

    let ids = ids.lock();
    let unique: HashSet<u64> = ids.iter().copied().collect();
    if unique.len() != ids.len() {
        result
            .violations
            .push(format!("{} ids handed out, {} distinct", ids.len(), unique.len()));
    }
    drop(test_file);
    result
}
