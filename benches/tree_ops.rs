// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Core operation benchmarks: insert, point lookup, range scan.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pagetree::{Big, BtreeMap, Flags, DEFAULT_PAGE_SIZE};
use tempfile::TempDir;

const SIG: u64 = 0xbe;

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_10k_random", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let map: BtreeMap<Big<u64>, Big<u64>> = BtreeMap::open(
                    dir.path().join("bench.db"),
                    Flags::TRUNCATE,
                    SIG,
                    DEFAULT_PAGE_SIZE,
                )
                .unwrap();
                (dir, map)
            },
            |(_dir, mut map)| {
                // A multiplicative walk scatters keys across the tree.
                let mut k: u64 = 0x9e3779b97f4a7c15;
                for _ in 0..10_000 {
                    map.insert(Big(k), Big(1)).unwrap();
                    k = k.wrapping_mul(0x2545f4914f6cdd1d).wrapping_add(1);
                }
                black_box(map.len())
            },
        );
    });
}

fn bench_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut map: BtreeMap<Big<u64>, Big<u64>> = BtreeMap::open(
        dir.path().join("lookup.db"),
        Flags::TRUNCATE,
        SIG,
        DEFAULT_PAGE_SIZE,
    )
    .unwrap();
    for i in 0..100_000u64 {
        map.insert(Big(i), Big(i)).unwrap();
    }

    c.bench_function("lookup_100k", |b| {
        let mut k = 0u64;
        b.iter(|| {
            k = (k + 63_793) % 100_000;
            black_box(map.get(&Big(k)).unwrap())
        });
    });

    c.bench_function("range_scan_1k", |b| {
        b.iter(|| {
            let taken: u64 = map
                .iter()
                .unwrap()
                .take(1000)
                .map(|r| r.unwrap().1 .0)
                .sum();
            black_box(taken)
        });
    });
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
