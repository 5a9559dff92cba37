//! Property tests for the laws the synchronizer relies on.
//!
//! - The sync frame never exceeds `min(local_frame, remote_frame)` and never
//!   moves backwards.
//! - With every guess correct, the sync frame equals `min(local, remote)`.
//! - A single wrong guess at `f` puts the sync frame at `f - 1`.
//! - A tick stalls exactly when the advantage delta exceeds the limit.
//! - Any lossy, duplicating, reordering link converges once it heals.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use proptest::prelude::*;
use rollback_sync::{
    Frame, FrameCounters, InputLedger, PartialEqComparator, RemoteInputPacket, RollbackGate,
    SyncPoint, TickOutcome,
};

use super::convergence::assert_converges;
use crate::common::channel::LinkFault;
use crate::common::stubs::{peer, Side, StubInput};

// ============================================================================
// Strategies
// ============================================================================

fn link_fault() -> impl Strategy<Value = LinkFault> {
    (prop::bool::weighted(0.25), prop::bool::weighted(0.1), 0u8..6).prop_map(
        |(drop, duplicate, delay)| LinkFault {
            drop,
            duplicate,
            delay,
        },
    )
}

fn link_script() -> impl Strategy<Value = Vec<LinkFault>> {
    prop::collection::vec(link_fault(), 1..24)
}

/// One event in a single peer's history.
#[derive(Debug, Clone, Copy)]
enum Event {
    /// Simulate the next local frame with a guess.
    Advance { guess: u8 },
    /// Confirm the next remote frame.
    Confirm { value: u8 },
}

fn events() -> impl Strategy<Value = Vec<Event>> {
    prop::collection::vec(
        prop_oneof![
            (0u8..3).prop_map(|guess| Event::Advance { guess }),
            (0u8..3).prop_map(|value| Event::Confirm { value }),
        ],
        1..120,
    )
}

// ============================================================================
// Sync point laws
// ============================================================================

proptest! {
    /// The sync frame is bounded by both counters and is monotonic.
    #[test]
    fn prop_sync_frame_bounded_and_monotonic(history in events()) {
        let mut ledger = InputLedger::new(256);
        let mut counters = FrameCounters::new();
        let mut sync = SyncPoint::new();
        let mut next_remote = 0;

        for event in history {
            match event {
                Event::Advance { guess } => {
                    ledger.store_guessed(guess, counters.local_frame()).unwrap();
                    counters.advance_local();
                },
                Event::Confirm { value } => {
                    let frame = Frame::new(next_remote);
                    ledger.store_remote_confirmed(value, frame).unwrap();
                    counters.observe_remote(frame);
                    next_remote += 1;
                },
            }
            let before = sync.current();
            sync.recompute(&counters, &ledger, &PartialEqComparator);
            prop_assert!(sync.current() >= before);
            prop_assert!(sync.current() <= counters.local_frame());
            prop_assert!(sync.current() <= counters.remote_frame());
            prop_assert!(sync.check_against(&counters).is_ok());
        }
    }

    /// With every guess right, the sync frame is exactly `min(local, remote)`.
    #[test]
    fn prop_correct_guesses_track_the_lower_counter(
        value in 0u8..4,
        local in 0i32..60,
        remote in -1i32..60,
    ) {
        let mut ledger = InputLedger::new(128);
        let mut counters = FrameCounters::new();
        for n in 0..local {
            ledger.store_guessed(value, Frame::new(n)).unwrap();
            counters.advance_local();
        }
        for n in 0..=remote {
            ledger.store_remote_confirmed(value, Frame::new(n)).unwrap();
            counters.observe_remote(Frame::new(n));
        }
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        prop_assert_eq!(sync.current(), Frame::new(local.min(remote)));
        prop_assert!(!RollbackGate::should_roll_back(&counters, &sync));
    }

    /// One wrong guess at `f` below both counters pins the sync frame at
    /// `f - 1` and opens the gate; fixing the guess closes it.
    #[test]
    fn prop_single_wrong_guess_opens_gate(
        wrong in 0i32..50,
        local_lead in 1i32..10,
        remote_lead in 0i32..10,
    ) {
        let local = wrong + local_lead;
        let remote = wrong + remote_lead;
        let mut ledger = InputLedger::new(128);
        let mut counters = FrameCounters::new();
        for n in 0..local {
            ledger.store_guessed(0u8, Frame::new(n)).unwrap();
            counters.advance_local();
        }
        for n in 0..=remote {
            ledger.store_remote_confirmed(u8::from(n == wrong), Frame::new(n)).unwrap();
            counters.observe_remote(Frame::new(n));
        }

        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        prop_assert_eq!(sync.current(), Frame::new(wrong - 1));
        prop_assert!(RollbackGate::should_roll_back(&counters, &sync));

        ledger.overwrite_guessed(1, Frame::new(wrong)).unwrap();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        prop_assert_eq!(sync.current(), Frame::new(local.min(remote)));
        prop_assert!(!RollbackGate::should_roll_back(&counters, &sync));
    }
}

// ============================================================================
// Flow control
// ============================================================================

proptest! {
    /// The first stalled tick is the first frame whose delta exceeds 3.
    #[test]
    fn prop_stall_iff_delta_exceeds_limit(remote in 0i32..20, advantage in -5i32..6) {
        let mut sync = peer(Side::One);
        for n in 0..=remote {
            sync.on_remote_input(RemoteInputPacket {
                frame: Frame::new(n),
                input: StubInput::default(),
                frame_advantage: advantage,
            })
            .unwrap();
        }

        let expected_stall = (remote + advantage + 4).max(0);
        for _ in 0..60 {
            let frame = sync.local_frame();
            let delta = sync.counters().frame_advantage_delta();
            prop_assert_eq!(sync.should_stall(), delta > 3);
            let report = sync.tick(StubInput::default()).unwrap();
            if let TickOutcome::Stalled { delta } = report.outcome {
                prop_assert_eq!(frame, Frame::new(expected_stall));
                prop_assert!(delta > 3);
                return Ok(());
            }
        }
        prop_assert!(false, "never stalled");
    }
}

// ============================================================================
// Two-peer convergence
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Both peers agree with the reference simulation after any scripted
    /// combination of loss, duplication and delay, once the link heals.
    #[test]
    fn prop_faulty_links_converge(a_to_b in link_script(), b_to_a in link_script()) {
        assert_converges(a_to_b, b_to_a, 80);
    }
}
