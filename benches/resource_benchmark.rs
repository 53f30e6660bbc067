//! Performance benchmarks for resource-kit
//!
//! This benchmark suite measures:
//! - Pure reads (`get`) against collections of different sizes
//! - Cached loads (no fetch) and full refreshes through the loader
//! - Coalesced concurrent loads of random keys
//! - Merge writes (`set`) and partial patches
//!
//! Run with: cargo bench
//! View results: open target/criterion/report/index.html

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use resource_kit::{CachedMapResource, InMemoryLoader, ResourceEntity, ResourceKey};
use serde::{Deserialize, Serialize};
use std::hint::black_box;

// ============================================================================
// Benchmark Test Fixtures
// ============================================================================

/// Benchmark entity with a configurable payload
#[derive(Clone, Serialize, Deserialize)]
struct BenchEntity {
    id: String,
    name: Option<String>,
    data: Vec<u8>,
}

impl ResourceEntity for BenchEntity {
    type Key = String;

    fn resource_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn resource_prefix() -> &'static str {
        "bench"
    }
}

impl BenchEntity {
    fn new(id: String, size: usize) -> Self {
        BenchEntity {
            id,
            name: Some("bench".to_string()),
            data: vec![0u8; size],
        }
    }
}

type BenchResource = CachedMapResource<BenchEntity, InMemoryLoader<BenchEntity>>;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

/// Resource with `count` entities loaded through `load_all`.
fn loaded_resource(rt: &tokio::runtime::Runtime, count: usize) -> BenchResource {
    let loader = InMemoryLoader::new();
    for i in 0..count {
        loader.insert(BenchEntity::new(format!("e{}", i), 64));
    }
    let resource = CachedMapResource::new(loader);
    rt.block_on(resource.load_all()).unwrap();
    resource
}

// ============================================================================
// Read Benchmarks
// ============================================================================

fn bench_get(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("get");

    for count in [10, 1_000, 10_000] {
        let resource = loaded_resource(&rt, count);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut rng = rand::rng();
            b.iter(|| {
                let key = format!("e{}", rng.random_range(0..count));
                black_box(resource.get(&key))
            });
        });
    }

    group.finish();
}

fn bench_load_cached(c: &mut Criterion) {
    let rt = runtime();
    let resource = loaded_resource(&rt, 1_000);

    c.bench_function("load_cached_hit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(resource.load(&"e42".to_string()).await.unwrap())
        });
    });
}

// ============================================================================
// Fetch Benchmarks
// ============================================================================

fn bench_refresh_all(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("refresh_all");

    for count in [10, 100, 1_000] {
        let resource = loaded_resource(&rt, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.to_async(&rt)
                .iter(|| async { black_box(resource.refresh_all().await.unwrap()) });
        });
    }

    group.finish();
}

fn bench_coalesced_loads(c: &mut Criterion) {
    let rt = runtime();
    let loader = InMemoryLoader::new();
    for i in 0..100 {
        loader.insert(BenchEntity::new(format!("e{}", i), 64));
    }
    let resource = CachedMapResource::new(loader);

    c.bench_function("coalesced_loads_16", |b| {
        b.to_async(&rt).iter(|| async {
            let mut rng = rand::rng();
            let keys: Vec<String> = (0..16)
                .map(|_| format!("e{}", rng.random_range(0..100)))
                .collect();
            resource.mark_outdated(ResourceKey::All);
            let loads = keys.iter().map(|key| resource.load(key));
            black_box(futures::future::join_all(loads).await)
        });
    });
}

// ============================================================================
// Write Benchmarks
// ============================================================================

fn bench_writes(c: &mut Criterion) {
    let rt = runtime();
    let resource = loaded_resource(&rt, 1_000);
    let mut group = c.benchmark_group("writes");

    group.bench_function("set_merge", |b| {
        b.iter(|| {
            resource
                .set(BenchEntity::new("e7".to_string(), 64))
                .unwrap()
        });
    });

    group.bench_function("patch", |b| {
        b.iter(|| {
            resource
                .patch(&"e7".to_string(), serde_json::json!({ "name": "patched" }))
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_get,
    bench_load_cached,
    bench_refresh_all,
    bench_coalesced_loads,
    bench_writes
);
criterion_main!(benches);
