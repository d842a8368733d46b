//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use std::sync::Arc;
use txfile_core::{Config, TxFile};
use txfile_storage::{ByteStore, MemoryStore};

/// WAL length used by the benchmarks.
pub const BENCH_WAL_LEN: u64 = 1 << 20;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random offsets for `len`-byte writes into a file of
/// `size` bytes.
pub fn random_offsets(count: usize, size: u64, len: usize) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    let limit = size.saturating_sub(len as u64).max(1);
    (0..count).map(|_| rng.gen_range(0..limit)).collect()
}

/// Creates an in-memory file of `size` zero bytes.
pub fn memory_file(size: u64) -> (Arc<MemoryStore>, TxFile) {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn ByteStore> = store.clone();
    let file = TxFile::create(store_dyn, bench_config()).expect("Failed to create file");
    let mut tx = file.begin().expect("Failed to begin");
    tx.resize(size).expect("Failed to resize");
    tx.commit().expect("Failed to commit");
    (store, file)
}

/// Returns the benchmark configuration.
pub fn bench_config() -> Config {
    Config::new().name("bench").wal_len(BENCH_WAL_LEN)
}
