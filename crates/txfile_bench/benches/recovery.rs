//! WAL recovery and compaction benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use txfile_bench::{bench_config, memory_file, random_data, random_offsets};
use txfile_core::TxFile;
use txfile_storage::MemoryStore;

const FILE_SIZE: u64 = 1 << 16;

/// Builds a store image whose WAL holds `commits` committed transactions.
fn image_with_commits(commits: usize) -> Vec<u8> {
    let (store, file) = memory_file(FILE_SIZE);
    file.compact().unwrap();
    let data = random_data(48);
    for offset in random_offsets(commits, FILE_SIZE, data.len()) {
        let mut tx = file.begin().unwrap();
        tx.write_at(offset, &data).unwrap();
        tx.commit().unwrap();
    }
    drop(file);
    store.data()
}

/// Benchmark opening a file and replaying its WAL.
fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery");

    for commits in [0, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(commits), commits, |b, &commits| {
            let image = image_with_commits(commits);

            b.iter(|| {
                let store = Arc::new(MemoryStore::with_data(image.clone()));
                let file = TxFile::open(store, bench_config()).unwrap();
                assert_eq!(file.size(), FILE_SIZE);
            });
        });
    }

    group.finish();
}

/// Benchmark compacting a WAL holding committed transactions.
fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");

    for commits in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(commits), commits, |b, &commits| {
            let data = random_data(48);
            let offsets = random_offsets(commits, FILE_SIZE, data.len());

            b.iter_batched(
                || {
                    let (_store, file) = memory_file(FILE_SIZE);
                    for offset in &offsets {
                        let mut tx = file.begin().unwrap();
                        tx.write_at(*offset, &data).unwrap();
                        tx.commit().unwrap();
                    }
                    file
                },
                |file| file.compact().unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_recovery, bench_compaction);

criterion_main!(benches);
