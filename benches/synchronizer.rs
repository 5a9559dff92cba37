//! Benchmarks for the per-tick path: advancing, stalling and replaying.
//!
//! Run with: cargo bench --bench synchronizer

#![allow(clippy::unwrap_used)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rollback_sync::{
    Config, EntityId, Frame, PhaseClock, RemoteInputPacket, RollbackState, Synchronizer,
    SynchronizerBuilder,
};
use serde::{Deserialize, Serialize};
use std::hint::black_box;

#[derive(Clone, Serialize, Deserialize)]
struct Body {
    position: [i32; 2],
    velocity: [i32; 2],
    clock: PhaseClock,
}

impl RollbackState for Body {
    fn phase_clock(&self) -> PhaseClock {
        self.clock
    }
}

struct BenchConfig;

impl Config for BenchConfig {
    type Input = u16;
    type State = Body;
}

fn step(body: &Body, local: &u16, remote: &u16) -> Body {
    let thrust = i32::from(*local & 0xFF) - i32::from(*remote & 0xFF);
    let velocity = [body.velocity[0] + thrust, body.velocity[1] - thrust];
    Body {
        position: [
            body.position[0] + velocity[0],
            body.position[1] + velocity[1],
        ],
        velocity,
        clock: body.clock.tick(),
    }
}

fn synchronizer(entities: u32) -> Synchronizer<BenchConfig> {
    let mut builder = SynchronizerBuilder::<BenchConfig>::new()
        .with_step_function(step)
        .with_neutral_input(|| 0)
        .with_partial_eq_comparator();
    for id in 0..entities {
        builder = builder.with_entity(
            EntityId::new(id),
            Body {
                position: [id as i32, 0],
                velocity: [0, 0],
                clock: PhaseClock::default(),
            },
        );
    }
    builder.build().unwrap()
}

fn packet(frame: i32, input: u16) -> RemoteInputPacket<u16> {
    RemoteInputPacket {
        frame: Frame::new(frame),
        input,
        frame_advantage: 0,
    }
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("Synchronizer tick");

    for entities in [1u32, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("confirmed_lockstep_100", entities),
            &entities,
            |b, &entities| {
                b.iter(|| {
                    let mut sync = synchronizer(entities);
                    for n in 0..100 {
                        sync.on_remote_input(packet(n, 1)).unwrap();
                        black_box(sync.tick(black_box(2)).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("Synchronizer rollback");

    for depth in [2i32, 4, 8] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut sync = synchronizer(4);
                // The remote side reports being as far ahead as we will get,
                // so no tick stalls.
                sync.on_remote_input(RemoteInputPacket {
                    frame_advantage: depth,
                    ..packet(0, 0)
                })
                .unwrap();
                for _ in 0..depth {
                    sync.tick(1).unwrap();
                }
                // The guess for frame 1 was wrong.
                for n in 1..depth {
                    sync.on_remote_input(packet(n, 5)).unwrap();
                }
                black_box(sync.tick(1).unwrap().rollback)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tick, bench_rollback);
criterion_main!(benches);
