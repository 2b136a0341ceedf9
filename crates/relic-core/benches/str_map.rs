//! Benchmarks for StrKeyedMap against std and AHash maps keyed by String.

use std::collections::HashMap as StdHashMap;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use relic_core::alloc::{HashMap as AHashMap, StrKeyedMap};

fn asset_paths(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("sprites/characters/npc_{i}/idle"))
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("str_map_insert");

    for size in [100, 1000, 10000] {
        let paths = asset_paths(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("std", size), &paths, |b, paths| {
            b.iter(|| {
                let mut map = StdHashMap::new();
                for (i, path) in paths.iter().enumerate() {
                    map.insert(black_box(path.clone()), i);
                }
                map
            });
        });

        group.bench_with_input(BenchmarkId::new("str_keyed", size), &paths, |b, paths| {
            b.iter(|| {
                let mut map = StrKeyedMap::new();
                for (i, path) in paths.iter().enumerate() {
                    map.insert(black_box(path.as_str()), i);
                }
                map
            });
        });
    }

    group.finish();
}

/// Lookups by slices of a larger buffer, the shape watcher events arrive in.
fn bench_slice_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("str_map_slice_lookup");

    for size in [100, 1000, 10000] {
        let paths = asset_paths(size);
        let absolute: Vec<String> = paths.iter().map(|p| format!("/home/user/game/assets/{p}.png")).collect();
        let prefix = "/home/user/game/assets/".len();
        group.throughput(Throughput::Elements(size as u64));

        let std_map: StdHashMap<String, usize> = paths.iter().cloned().zip(0..).collect();
        let ahash_map: AHashMap<String, usize> = paths.iter().cloned().zip(0..).collect();
        let str_map: StrKeyedMap<usize> = paths.iter().map(String::as_str).zip(0..).collect();

        group.bench_function(BenchmarkId::new("std", size), |b| {
            b.iter(|| {
                let mut sum = 0;
                for path in &absolute {
                    let key = &path[prefix..path.len() - 4];
                    if let Some(&val) = std_map.get(black_box(key)) {
                        sum += val;
                    }
                }
                sum
            });
        });

        group.bench_function(BenchmarkId::new("ahash", size), |b| {
            b.iter(|| {
                let mut sum = 0;
                for path in &absolute {
                    let key = &path[prefix..path.len() - 4];
                    if let Some(&val) = ahash_map.get(black_box(key)) {
                        sum += val;
                    }
                }
                sum
            });
        });

        group.bench_function(BenchmarkId::new("str_keyed", size), |b| {
            b.iter(|| {
                let mut sum = 0;
                for path in &absolute {
                    let key = &path[prefix..path.len() - 4];
                    if let Some(&val) = str_map.get(black_box(key)) {
                        sum += val;
                    }
                }
                sum
            });
        });
    }

    group.finish();
}

fn bench_remove_reinsert(c: &mut Criterion) {
    let paths = asset_paths(1000);
    c.bench_function("str_map_remove_reinsert", |b| {
        let mut map: StrKeyedMap<usize> = paths.iter().map(String::as_str).zip(0..).collect();
        b.iter(|| {
            for path in paths.iter().step_by(3) {
                let (key, value) = map.remove_entry(black_box(path)).unwrap();
                map.insert(key, value);
            }
        });
    });
}

criterion_group!(benches, bench_insert, bench_slice_lookup, bench_remove_reinsert);
criterion_main!(benches);
