//! Benchmarks for cache store hot paths.
#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use resync_core::{CacheKey, MutationId};
use resync_store::CacheStore;

fn seeded_store(keys: u32, items: u32) -> CacheStore<Vec<u32>> {
    let store = CacheStore::new();
    for owner in 0..keys {
        store.set(&CacheKey::resource("reviews").with(owner), (0..items).collect());
    }
    store
}

fn bench_get(c: &mut Criterion) {
    let store = seeded_store(1_000, 32);
    let key = CacheKey::resource("reviews").with(500_u32);
    c.bench_function("cache_store/get", |b| {
        b.iter(|| black_box(store.get(black_box(&key))));
    });
}

fn bench_optimistic_roundtrip(c: &mut Criterion) {
    let key = CacheKey::resource("reviews").with(7_u32);
    c.bench_function("cache_store/optimistic_apply_restore", |b| {
        b.iter_batched(
            || seeded_store(64, 256),
            |store| {
                let previous = store.apply_optimistic(&key, MutationId::new(), |items| {
                    items.iter().copied().filter(|item| item % 2 == 0).collect()
                });
                store.restore(&key, previous);
                store
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_invalidate_prefix(c: &mut Criterion) {
    let prefix = CacheKey::resource("reviews");
    c.bench_function("cache_store/invalidate_prefix", |b| {
        b.iter_batched(
            || seeded_store(1_000, 4),
            |store| black_box(store.invalidate_prefix(&prefix)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_get, bench_optimistic_roundtrip, bench_invalidate_prefix);
criterion_main!(benches);
