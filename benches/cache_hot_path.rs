//! Benchmarks for the request hot path
//!
//! This benchmark measures:
//! - Cache key normalization and digest
//! - Cache hits and inserts with eviction
//! - Response parsing with surrounding prose

use ai_analysis_runtime::cache::{CacheConfig, CacheKey, CacheManager};
use ai_analysis_runtime::ResponseParser;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

const SAMPLE_TEXT: &str = "Explain   how quicksort partitions an array around a pivot \
                           and why its average complexity is O(n log n).";

const SAMPLE_COMPLETION: &str = r#"Here is the analysis you asked for:
```json
{
  "summary": "Quicksort partitions the array around a pivot and sorts both halves recursively.",
  "steps": ["Pick a pivot", "Partition into smaller and larger elements", "Recurse on both parts"],
  "example": "[3, 1, 2] -> pivot 2 -> [1] 2 [3]",
  "pseudocode": ["quicksort(a):", "  p = partition(a)", "  quicksort(left); quicksort(right)"]
}
```
Let me know if you need more detail."#;

fn bench_cache_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    group.throughput(Throughput::Bytes(SAMPLE_TEXT.len() as u64));
    group.bench_function("normalize", |b| {
        b.iter(|| CacheKey::new(black_box(SAMPLE_TEXT), "EN", "general"))
    });
    let key = CacheKey::new(SAMPLE_TEXT, "en", "general");
    group.bench_function("digest", |b| b.iter(|| black_box(&key).digest()));
    group.finish();
}

fn bench_cache_ops(c: &mut Criterion) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {e}"),
    };
    let mut group = c.benchmark_group("cache_ops");

    for size in [100usize, 1000, 10_000] {
        let cache: Arc<CacheManager<String>> =
            Arc::new(CacheManager::from_config(CacheConfig::new().with_max_entries(size)));
        let keys: Vec<CacheKey> = (0..size)
            .map(|i| CacheKey::new(&format!("problem {i}"), "en", "general"))
            .collect();
        rt.block_on(async {
            for key in &keys {
                cache.set(key.clone(), Arc::new("value".to_string())).await;
            }
        });

        group.bench_with_input(BenchmarkId::new("get_hit", size), &keys, |b, keys| {
            let mut i = 0usize;
            b.to_async(&rt).iter(|| {
                i = (i + 1) % keys.len();
                let key = &keys[i];
                let cache = &cache;
                async move { black_box(cache.get(key).await) }
            })
        });

        group.bench_with_input(BenchmarkId::new("set_evicting", size), &size, |b, _| {
            let mut n = 0usize;
            b.to_async(&rt).iter(|| {
                n += 1;
                let key = CacheKey::new(&format!("fresh {n}"), "en", "general");
                let cache = &cache;
                async move { cache.set(key, Arc::new("value".to_string())).await }
            })
        });
    }
    group.finish();
}

fn bench_parser(c: &mut Criterion) {
    let parser = ResponseParser::default();
    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Bytes(SAMPLE_COMPLETION.len() as u64));
    group.bench_function("fenced_with_prose", |b| {
        b.iter(|| parser.parse(black_box(SAMPLE_COMPLETION), "en"))
    });
    group.finish();
}

criterion_group!(benches, bench_cache_key, bench_cache_ops, bench_parser);
criterion_main!(benches);
