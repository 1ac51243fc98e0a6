//! Benchmarks for the response cache hot path
//!
//! This benchmark measures:
//! - Cache key derivation over growing message sizes
//! - Set with LRU eviction at capacity
//! - Get (hit) through the shared async mutex

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tallychat::cache::{derive_key, shared, ResponseCache};

const MODEL: &str = "claude-sonnet-4-20250514";

fn bench_derive_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_key");
    for size in [32usize, 1024, 16 * 1024] {
        let message = "x".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, msg| {
            b.iter(|| {
                derive_key(
                    black_box(msg),
                    MODEL,
                    1024,
                    0.7,
                    Some("You are a helpful assistant."),
                )
            })
        });
    }
    group.finish();
}

fn bench_set_with_eviction(c: &mut Criterion) {
    let keys: Vec<String> = (0..10_000).map(|i| format!("{:016x}", i)).collect();
    c.bench_function("set_at_capacity", |b| {
        let mut cache = ResponseCache::new(3600, 500);
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            cache.set(black_box(key), "cached response body")
        })
    });
}

fn bench_shared_get_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let cache = shared(ResponseCache::new(3600, 500));
    let key = derive_key("hello", MODEL, 1024, 0.7, None);
    runtime.block_on(async {
        cache.lock().await.set(&key, "world");
    });

    let cache = &cache;
    let key = key.as_str();
    c.bench_function("shared_get_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async move { cache.lock().await.get(black_box(key)) })
    });
}

criterion_group!(
    benches,
    bench_derive_key,
    bench_set_with_eviction,
    bench_shared_get_hit
);
criterion_main!(benches);
