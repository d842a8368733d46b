//! Replacement map benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use txfile_bench::{random_data, random_offsets};
use txfile_core::ReplacementMap;

const SPAN: u64 = 1 << 20;

fn populated(count: usize, len: usize) -> ReplacementMap {
    let mut map = ReplacementMap::new();
    let data = random_data(len);
    for offset in random_offsets(count, SPAN, len) {
        map.write_at(offset, &data, true).commit();
    }
    map
}

/// Benchmark inserting overlapping writes.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("replacement_map_insert");

    for count in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let data = random_data(64);
            let offsets = random_offsets(count, SPAN, 64);

            b.iter(|| {
                let mut map = ReplacementMap::new();
                for offset in &offsets {
                    map.write_at(*offset, &data, true).commit();
                }
                black_box(map.len());
            });
        });
    }

    group.finish();
}

/// Benchmark reads that hit and miss entries.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("replacement_map_read");

    for count in [100, 1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let map = populated(count, 64);
            let probes = random_offsets(256, SPAN, 16);
            let mut buf = [0u8; 16];

            b.iter(|| {
                for offset in &probes {
                    let mut len = buf.len();
                    black_box(map.read_at(*offset, &mut buf, &mut len));
                }
            });
        });
    }

    group.finish();
}

/// Benchmark truncating a populated map.
fn bench_truncate(c: &mut Criterion) {
    c.bench_function("replacement_map_truncate", |b| {
        let map = populated(1000, 64);
        b.iter(|| {
            let mut map = map.clone();
            map.truncate(black_box(SPAN / 2));
            black_box(map.len());
        });
    });
}

criterion_group!(benches, bench_insert, bench_read, bench_truncate);

criterion_main!(benches);
