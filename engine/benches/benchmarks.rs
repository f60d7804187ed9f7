//! Performance benchmarks for stash-engine

use chrono::{TimeZone, Utc};
use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion,
};
use stash_engine::item::sort_newest_first;
use stash_engine::{
    CacheEntry, CollectionDef, Draft, Item, LocalOnly, PersistentCache, ScopeKey, SyncEngine,
};
use std::sync::Arc;

fn make_items(count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| {
            // Interleave timestamps so sorting has real work to do.
            let secs = ((i * 7919) % count) as i64;
            Item::new(format!("item_{i}"), Utc.timestamp_opt(secs, 0).unwrap())
                .with_owner("alice")
                .with_field("title", format!("Title {i}"))
                .with_field("rating", (i % 5) as i64)
        })
        .collect()
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    for size in [10, 100, 1000] {
        let items = make_items(size);
        let cache = PersistentCache::in_memory();
        let scope = ScopeKey::new("books", Some(&"alice".to_string()));

        group.bench_with_input(BenchmarkId::new("set", size), &items, |b, items| {
            b.iter(|| cache.set(black_box(&scope), black_box(items)))
        });

        cache.set(&scope, &items);
        group.bench_with_input(BenchmarkId::new("get", size), &scope, |b, scope| {
            b.iter(|| cache.get(black_box(scope)))
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let entry = CacheEntry::new(make_items(1000));
    let json = entry.to_json().unwrap();

    group.bench_function("entry_to_json_1000", |b| b.iter(|| black_box(&entry).to_json()));
    group.bench_function("entry_from_json_1000", |b| {
        b.iter(|| CacheEntry::from_json(black_box(&json)))
    });

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");

    for size in [100, 1000] {
        let items = make_items(size);
        group.bench_with_input(BenchmarkId::new("sort", size), &items, |b, items| {
            b.iter(|| {
                let mut items = items.clone();
                sort_newest_first(black_box(&mut items));
                items
            })
        });
    }

    group.bench_function("local_add_100", |b| {
        b.iter_batched(
            || {
                let engine = SyncEngine::mount(
                    CollectionDef::new("books"),
                    Some("alice".to_string()),
                    PersistentCache::in_memory(),
                    Arc::new(LocalOnly),
                );
                engine.set_all(make_items(100));
                engine
            },
            |engine| engine.add_item(black_box(Draft::new().with_field("title", "X"))),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_cache, bench_serialization, bench_engine);
criterion_main!(benches);
