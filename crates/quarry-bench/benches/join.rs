//! Join strategy benchmarks for Quarry.
//!
//! Benchmarks for:
//! - Equi-joins of growing inputs under every join strategy
//! - Hash join block sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::executor::block_on;

use quarry_bench::utils::generate_join_input;
use quarry_data::batch::{collect_all, InMemoryBatchIterator};
use quarry_data::breaker::NoopRowAccounting;
use quarry_data::join::{join, JoinPredicate, JoinStrategy};
use quarry_data::OwnedRow;

fn run_join(outer: &[OwnedRow], inner: &[OwnedRow], strategy: JoinStrategy) -> usize {
    let mut it = join(
        Box::new(InMemoryBatchIterator::new(outer.to_vec())),
        Box::new(InMemoryBatchIterator::new(inner.to_vec())),
        JoinPredicate::equals(0, 0),
        strategy,
        Box::new(NoopRowAccounting),
    );
    block_on(collect_all(&mut it)).map_or(0, |rows| rows.len())
}

/// Benchmark every strategy on the same equi-join.
fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/strategy");

    for size in [100, 1000, 5000].iter() {
        let outer = generate_join_input(*size, (*size / 4) as i64, 1);
        let inner = generate_join_input(*size, (*size / 4) as i64, 2);

        group.throughput(Throughput::Elements((*size * 2) as u64));
        for (name, strategy) in [
            ("nested_loop", JoinStrategy::NestedLoop),
            (
                "block_nested_loop",
                JoinStrategy::BlockNestedLoop { block_size: 1024 },
            ),
            ("hash", JoinStrategy::Hash { block_size: 8192 }),
            ("sorted_merge", JoinStrategy::SortedMerge),
        ] {
            if matches!(strategy, JoinStrategy::NestedLoop) && *size > 1000 {
                continue;
            }
            group.bench_with_input(BenchmarkId::new(name, size), size, |b, _| {
                b.iter(|| black_box(run_join(&outer, &inner, strategy)));
            });
        }
    }

    group.finish();
}

/// Benchmark hash join block sizes.
fn bench_hash_block_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("join/hash_block_size");
    let outer = generate_join_input(10_000, 2_500, 3);
    let inner = generate_join_input(10_000, 2_500, 4);

    for block_size in [64, 1024, 16_384].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            block_size,
            |b, &block_size| {
                b.iter(|| black_box(run_join(&outer, &inner, JoinStrategy::Hash { block_size })));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_strategies, bench_hash_block_size);
criterion_main!(benches);
