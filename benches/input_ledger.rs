//! Benchmarks for the input ledger and sync point scan.
//!
//! Run with: cargo bench --bench input_ledger

#![allow(clippy::unwrap_used)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rollback_sync::{Frame, FrameCounters, InputLedger, PartialEqComparator, SyncPoint};
use std::hint::black_box;

fn filled_ledger(frames: i32, wrong_at: Option<i32>) -> (InputLedger<u16>, FrameCounters) {
    let mut ledger = InputLedger::new(1024);
    let mut counters = FrameCounters::new();
    for n in 0..frames {
        let frame = Frame::new(n);
        ledger.store_local(n as u16, frame).unwrap();
        ledger.store_guessed(7, frame).unwrap();
        let confirmed = if Some(n) == wrong_at { 8 } else { 7 };
        ledger
            .store_remote_confirmed(confirmed, frame)
            .unwrap();
        counters.observe_remote(frame);
        counters.advance_local();
    }
    (ledger, counters)
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("InputLedger store");

    group.bench_function("store_local_sequential_1024", |b| {
        b.iter(|| {
            let mut ledger = InputLedger::new(1024);
            for n in 0..1024 {
                ledger
                    .store_local(black_box(n as u16), Frame::new(n))
                    .unwrap();
            }
            ledger
        });
    });

    group.bench_function("overwrite_guessed", |b| {
        let (mut ledger, _) = filled_ledger(256, None);
        b.iter(|| {
            ledger
                .overwrite_guessed(black_box(3), Frame::new(black_box(200)))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("SyncPoint recompute");

    for depth in [8i32, 64, 512] {
        let (ledger, counters) = filled_ledger(depth, None);
        group.bench_with_input(BenchmarkId::new("all_correct", depth), &depth, |b, _| {
            b.iter(|| {
                let mut sync = SyncPoint::new();
                black_box(sync.recompute(&counters, &ledger, &PartialEqComparator))
            });
        });

        let (ledger, counters) = filled_ledger(depth, Some(depth / 2));
        group.bench_with_input(BenchmarkId::new("one_mismatch", depth), &depth, |b, _| {
            b.iter(|| {
                let mut sync = SyncPoint::new();
                black_box(sync.recompute(&counters, &ledger, &PartialEqComparator))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store, bench_scan);
criterion_main!(benches);
