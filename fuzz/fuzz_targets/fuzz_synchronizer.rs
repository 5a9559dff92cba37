//! Fuzz target for a synchronizer fed by a hostile remote peer.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary tick and packet sequences
//! - Only fatal errors escape a tick
//! - The sync frame never passes the local frame

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rollback_sync::{
    Config, EntityId, Frame, PhaseClock, RemoteInputPacket, RollbackState, SyncConfig,
    SynchronizerBuilder,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
struct Walker {
    x: i64,
    clock: PhaseClock,
}

impl RollbackState for Walker {
    fn phase_clock(&self) -> PhaseClock {
        self.clock
    }
}

struct FuzzConfig;

impl Config for FuzzConfig {
    type Input = u8;
    type State = Walker;
}

#[derive(Debug, Arbitrary)]
enum Op {
    Tick { input: u8 },
    Remote { frame: i16, input: u8, frame_advantage: i8 },
    RawPacket { bytes: Vec<u8> },
}

fuzz_target!(|ops: Vec<Op>| {
    let Ok(mut sync) = SynchronizerBuilder::<FuzzConfig>::new()
        .with_config(SyncConfig::minimal())
        .with_entity(
            EntityId::new(0),
            Walker {
                x: 0,
                clock: PhaseClock::default(),
            },
        )
        .with_step_function(|w: &Walker, l: &u8, r: &u8| Walker {
            x: w.x + i64::from(*l) - i64::from(*r),
            clock: w.clock.tick(),
        })
        .with_neutral_input(|| 0)
        .with_partial_eq_comparator()
        .build()
    else {
        return;
    };
    let inbox = sync.inbox();

    for op in ops.into_iter().take(1024) {
        match op {
            Op::Tick { input } => match sync.tick(input) {
                Ok(_) => {},
                Err(err) => {
                    assert!(err.is_fatal(), "non-fatal error escaped tick: {err}");
                    return;
                },
            },
            Op::Remote {
                frame,
                input,
                frame_advantage,
            } => inbox.push(RemoteInputPacket {
                frame: Frame::new(frame.into()),
                input,
                frame_advantage: frame_advantage.into(),
            }),
            Op::RawPacket { bytes } => {
                let _ = inbox.push_bytes(&bytes);
            },
        }
        assert!(sync.current_sync_frame() <= sync.local_frame());
    }
});
