//! Propagation Benchmarks
//!
//! Measures the cost of one write through graphs of different shapes:
//! a long chain, a wide fan-out, and a fan-in total.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quanta_core::{Atom, ConsumerId, Store};

/// `len` derived atoms, each adding one to the previous.
fn chain(store: &Store, len: usize) -> Atom<u64> {
    let source = Atom::new(0u64);
    let mut last = source.clone();
    for _ in 0..len {
        let prev = last.clone();
        last = Atom::derived(move |get| Ok(get.get(&prev)? + 1));
    }
    store
        .attach(&last, ConsumerId::new())
        .expect("chain attaches");
    source
}

/// `width` derived atoms reading the same source.
fn fan_out(store: &Store, width: usize) -> Atom<u64> {
    let source = Atom::new(0u64);
    let consumer = ConsumerId::new();
    for i in 0..width as u64 {
        let source = source.clone();
        let leaf = Atom::derived(move |get| Ok(get.get(&source)? * i));
        store.attach(&leaf, consumer).expect("leaf attaches");
    }
    source
}

/// One total over `width` primitive atoms.
fn fan_in(store: &Store, width: usize) -> Vec<Atom<u64>> {
    let items: Vec<Atom<u64>> = (0..width as u64).map(Atom::new).collect();
    let total = Atom::derived({
        let items = items.clone();
        move |get| items.iter().map(|item| get.get(item)).sum::<Result<u64, _>>()
    });
    store
        .attach(&total, ConsumerId::new())
        .expect("total attaches");
    items
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for len in [10, 100, 250] {
        let store = Store::new();
        let source = chain(&store, len);
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                next += 1;
                store.set(&source, black_box(next)).expect("write commits");
            })
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10, 100, 1000] {
        let store = Store::new();
        let source = fan_out(&store, width);
        let mut next = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                store.set(&source, black_box(next)).expect("write commits");
            })
        });
    }
    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in");
    for width in [10, 100, 1000] {
        let store = Store::new();
        let items = fan_in(&store, width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                store
                    .update(&items[0], |v| v + 1)
                    .expect("write commits");
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_fan_in);
criterion_main!(benches);
