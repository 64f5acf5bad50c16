//! Benchmark for the streaming update tick.
//!
//! TARGET: a 1,000-resident sweep in well under a frame
//!
//! Run with: cargo bench --package fafnir_streaming --bench update_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use fafnir_streaming::{
    ResourceCategory, ResourceId, ResourceRequest, StreamingAllocator, StreamingConfig,
};

fn populate(streaming: &StreamingAllocator, count: u64, path: &std::path::Path) {
    for i in 0..count {
        streaming.request_resource(
            ResourceRequest::new(ResourceId(i), path, ResourceCategory::Geometry).with_position([
                (i % 100) as f32,
                0.0,
                (i / 100) as f32,
            ]),
        );
    }
    // Drain every pending load.
    for _ in 0..(count as usize) {
        streaming.update(0.0);
    }
}

fn benchmark_idle_tick(c: &mut Criterion) {
    let path = std::env::temp_dir().join("bench_streaming_resource.bin");
    std::fs::write(&path, [7u8; 256]).unwrap();

    let mut config = StreamingConfig::default();
    config.cache_timeout_seconds = 1e9; // nothing expires during the run
    let streaming = StreamingAllocator::new(config);
    populate(&streaming, 1000, &path);

    let mut group = c.benchmark_group("streaming");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("update_1000_residents", |b| {
        b.iter(|| streaming.update(black_box(0.016)));
    });
    group.finish();

    std::fs::remove_file(&path).ok();
}

criterion_group!(benches, benchmark_idle_tick);
criterion_main!(benches);
