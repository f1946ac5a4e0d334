//! Pipeline throughput benchmarks.
//!
//! ```bash
//! cargo bench --bench pipeline_benchmarks
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reportflow::aggregation::{AggregateKind, AggregationState, GroupSpec, GroupedState};
use reportflow::pipeline::{Pipeline, PipelineOptions, PipelineRegistry, SinkMode};
use reportflow::source::{PageRequest, QuerySpec, VecSource};
use reportflow::value::{Record, Value};
use std::sync::Arc;
use std::time::Duration;

fn records(n: usize, cardinality: i64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::from_pairs([
                ("category", Value::Int(i as i64 % cardinality)),
                ("amount", Value::Float(i as f64 * 1.5)),
            ])
        })
        .collect()
}

fn bench_aggregation_fold(c: &mut Criterion) {
    const KINDS: &[AggregateKind] = &[
        AggregateKind::Sum,
        AggregateKind::Count,
        AggregateKind::Avg,
        AggregateKind::Min,
        AggregateKind::Max,
    ];
    let batch = records(10_000, 100);

    let mut group = c.benchmark_group("aggregation_fold");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("global", |b| {
        b.iter(|| {
            let mut state = AggregationState::new();
            for record in &batch {
                state.fold(record, KINDS);
            }
            state
        });
    });
    group.bench_function("grouped", |b| {
        b.iter(|| {
            let mut state = GroupedState::new(GroupSpec::new(
                vec!["category".to_string()],
                KINDS.to_vec(),
                10_000,
            ));
            for record in &batch {
                state.update(record);
            }
            state
        });
    });
    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_end_to_end");
    group.sample_size(10);

    for &size in &[1_000usize, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let data = records(size, 50);
            b.iter(|| {
                let request = PageRequest {
                    domain: "bench".to_string(),
                    resource: "records".to_string(),
                    query: QuerySpec::default(),
                    offset: 0,
                    limit: 500,
                };
                let mut options = PipelineOptions::new(
                    "bench",
                    Arc::new(VecSource::new(data.clone())),
                    request,
                );
                options.consumer.enable_telemetry = false;
                options.consumer.aggregations =
                    vec![AggregateKind::Sum, AggregateKind::Count];
                options.consumer.grouped_aggregations = vec![GroupSpec::new(
                    vec!["category".to_string()],
                    vec![AggregateKind::Sum, AggregateKind::Count],
                    10_000,
                )];
                options.sink = SinkMode::Discard;

                let registry = Arc::new(PipelineRegistry::new(Duration::from_secs(60)));
                let pipeline =
                    Pipeline::start_with_registry(options, registry).expect("starts");
                pipeline.wait().expect("finishes")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregation_fold, bench_end_to_end);
criterion_main!(benches);
