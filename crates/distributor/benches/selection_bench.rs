//! analyzer 선택 벤치마크
//!
//! 가중치 랜덤 선택과 큐 배치 드레인의 처리량을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logrelay_core::types::LogPacket;
use logrelay_distributor::{AnalyzerRegistry, AnalyzerSpec, DistributionQueue, QueueEntry};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn registry_with(count: usize) -> AnalyzerRegistry {
    let registry = AnalyzerRegistry::new();
    for i in 0..count {
        registry.register(AnalyzerSpec::new(
            format!("A{i}"),
            format!("http://analyzer-{i}:3000"),
            (i % 4 + 1) as f64,
        ));
    }
    registry
}

fn bench_select_analyzer(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_analyzer");
    group.throughput(Throughput::Elements(1));

    for count in [1usize, 4, 16, 64] {
        let registry = registry_with(count);
        let mut rng = StdRng::seed_from_u64(42);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| registry.select_analyzer_with(black_box(&mut rng)).unwrap())
        });
    }

    group.finish();
}

fn bench_select_with_offline(c: &mut Criterion) {
    let registry = registry_with(16);
    for i in (0..16).step_by(2) {
        registry.mark_offline(&format!("A{i}"));
    }
    let mut rng = StdRng::seed_from_u64(7);

    c.bench_function("select_analyzer/16_half_offline", |b| {
        b.iter(|| registry.select_analyzer_with(black_box(&mut rng)).unwrap())
    });
}

fn bench_queue_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_drain_batch");

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let mut queue = DistributionQueue::new();
                    for i in 0..1000 {
                        let entry = QueueEntry::new(LogPacket::new("bench"));
                        if i % 10 == 0 {
                            queue.push_retry(entry);
                        } else {
                            queue.push_back(entry);
                        }
                    }
                    while !queue.is_empty() {
                        black_box(queue.drain_batch(batch_size));
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_select_analyzer,
    bench_select_with_offline,
    bench_queue_drain
);
criterion_main!(benches);
