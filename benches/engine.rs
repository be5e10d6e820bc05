// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for the set engine hot paths.

use cinnabar::{Cinnabar, Options};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;

fn create_store() -> (Cinnabar, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Cinnabar::open(&Options::default(), dir.path()).unwrap();
    (store, dir)
}

fn bench_sadd(c: &mut Criterion) {
    let (store, _dir) = create_store();

    let mut group = c.benchmark_group("sets");
    group.throughput(Throughput::Elements(1));

    let counter = std::sync::atomic::AtomicU64::new(0);
    group.bench_function("sadd", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let key = format!("key{:05}", i % 1000);
            let member = format!("member{i}");
            store
                .sets()
                .sadd(key.as_bytes(), &[member.into_bytes()])
                .unwrap()
        })
    });

    group.finish();
}

fn bench_sismember(c: &mut Criterion) {
    let (store, _dir) = create_store();

    // Pre-populate one set with 10000 members.
    let members: Vec<Vec<u8>> = (0..10000)
        .map(|i| format!("member{i:05}").into_bytes())
        .collect();
    store.sets().sadd(b"bench", &members).unwrap();

    let mut group = c.benchmark_group("sets");
    group.throughput(Throughput::Elements(1));

    group.bench_function("sismember", |b| {
        b.iter_batched(
            || {
                let i = rand::random::<u32>() % 10000;
                format!("member{i:05}").into_bytes()
            },
            |member| store.sets().sismember(b"bench", &member).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_smembers(c: &mut Criterion) {
    let (store, _dir) = create_store();

    let members: Vec<Vec<u8>> = (0..1000)
        .map(|i| format!("member{i:05}").into_bytes())
        .collect();
    store.sets().sadd(b"bench", &members).unwrap();

    let mut group = c.benchmark_group("sets");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("smembers_1k", |b| {
        b.iter(|| store.sets().smembers(b"bench").unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_sadd, bench_sismember, bench_smembers);
criterion_main!(benches);
