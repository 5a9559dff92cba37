#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use rollback_sync::telemetry::{CollectingObserver, ViolationKind, ViolationSeverity};
use rollback_sync::{assert_no_violations, assert_violation};
use rollback_sync::{
    Frame, FrameCounters, InputLedger, PartialEqComparator, RemoteInputPacket, RollbackGate,
    SyncConfig, SyncError, SyncPoint, TickOutcome,
};

use crate::common::channel::{run_pair, LossyChannel, Peer};
use crate::common::init_tracing;
use crate::common::stubs::{builder_for, peer, Fighter, Side, StubInput, PLAYER_ONE, PLAYER_TWO};

fn packet(frame: i32, buttons: u8, frame_advantage: i32) -> RemoteInputPacket<StubInput> {
    RemoteInputPacket {
        frame: Frame::new(frame),
        input: StubInput::new(buttons),
        frame_advantage,
    }
}

// ============================================================================
// Component-level scenarios
// ============================================================================

#[test]
fn wrong_guess_at_frame_five_puts_sync_frame_at_four() {
    let mut ledger = InputLedger::new(64);
    let mut counters = FrameCounters::new();
    for n in 0..8 {
        let frame = Frame::new(n);
        ledger.store_guessed(8u8, frame).unwrap();
        ledger
            .store_remote_confirmed(if n == 5 { 7 } else { 8 }, frame)
            .unwrap();
        counters.observe_remote(frame);
        counters.advance_local();
    }

    let mut sync = SyncPoint::new();
    sync.recompute(&counters, &ledger, &PartialEqComparator);
    assert_eq!(sync.current(), Frame::new(4));
    assert!(RollbackGate::should_roll_back(&counters, &sync));

    ledger.overwrite_guessed(7, Frame::new(5)).unwrap();
    sync.recompute(&counters, &ledger, &PartialEqComparator);
    assert_eq!(sync.current(), Frame::new(7));
    assert!(!RollbackGate::should_roll_back(&counters, &sync));
}

#[test]
fn ten_matching_frames_put_sync_frame_at_ten() {
    let mut ledger = InputLedger::new(64);
    let mut counters = FrameCounters::new();
    for n in 0..10 {
        ledger.store_guessed(1u8, Frame::new(n)).unwrap();
        counters.advance_local();
    }
    for n in 0..=10 {
        ledger.store_remote_confirmed(1, Frame::new(n)).unwrap();
        counters.observe_remote(Frame::new(n));
    }

    let mut sync = SyncPoint::new();
    sync.recompute(&counters, &ledger, &PartialEqComparator);
    assert_eq!(sync.current(), Frame::new(10));
    assert!(!RollbackGate::should_roll_back(&counters, &sync));
}

#[test]
fn local_ten_remote_six_stalls() {
    let mut counters = FrameCounters::new();
    for _ in 0..10 {
        counters.advance_local();
    }
    counters.observe_remote(Frame::new(6));
    counters.set_remote_frame_advantage(0);
    assert_eq!(counters.frame_advantage_delta(), 4);

    let mut sync = peer(Side::One);
    for n in 0..=6 {
        sync.on_remote_input(packet(n, 0, 0)).unwrap();
    }
    for n in 0..10 {
        let report = sync.tick(StubInput::default()).unwrap();
        assert!(report.advanced(), "frame {n} should advance");
    }
    assert!(sync.should_stall());
    let report = sync.tick(StubInput::default()).unwrap();
    assert_eq!(report.outcome, TickOutcome::Stalled { delta: 4 });
}

#[test]
fn delta_equal_to_limit_does_not_stall() {
    let mut sync = peer(Side::One);
    for n in 0..=6 {
        sync.on_remote_input(packet(n, 0, 0)).unwrap();
    }
    for _ in 0..9 {
        sync.tick(StubInput::default()).unwrap();
    }
    assert_eq!(sync.counters().frame_advantage_delta(), 3);
    assert!(!sync.should_stall());
}

// ============================================================================
// Synchronizer scenarios
// ============================================================================

#[test]
fn matching_predictions_never_roll_back() {
    init_tracing();
    let mut a = Peer::new(Side::One, peer(Side::One));
    let mut b = Peer::new(Side::Two, peer(Side::Two));
    let mut a_to_b = LossyChannel::perfect();
    let mut b_to_a = LossyChannel::perfect();

    for _ in 0..40 {
        a.tick_with(StubInput::default());
        b.tick_with(StubInput::default());
        for p in [&a, &b] {
            let counters = p.sync.counters();
            assert_eq!(
                p.sync.current_sync_frame(),
                counters.local_frame().min(counters.remote_frame())
            );
        }
        a.send_unacked(b.contiguous_confirmed(), &mut a_to_b);
        b.send_unacked(a.contiguous_confirmed(), &mut b_to_a);
        b.receive(&mut a_to_b);
        a.receive(&mut b_to_a);
    }

    assert_eq!(a.sync.stats().rollbacks, 0);
    assert_eq!(b.sync.stats().rollbacks, 0);
    assert_eq!(a.sync.local_frame(), Frame::new(40));
}

#[test]
fn late_jump_is_replayed_into_place() {
    let mut sync = peer(Side::One);
    sync.on_remote_input(packet(0, 0, 0)).unwrap();
    for _ in 0..4 {
        sync.tick(StubInput::default()).unwrap();
    }
    // Player two actually jumped on frame 1.
    sync.on_remote_input(packet(1, StubInput::JUMP, 0)).unwrap();
    sync.on_remote_input(packet(2, 0, 0)).unwrap();
    sync.on_remote_input(packet(3, 0, 0)).unwrap();

    let report = sync.tick(StubInput::default()).unwrap();
    let rollback = report.rollback.expect("late jump should roll back");
    assert_eq!(rollback.restored_frame, Frame::new(0));
    assert_eq!(rollback.frames_resimulated, 3);
    assert_eq!(rollback.corrected_frames, 1);

    let expected = (0..5).fold(Fighter::spawn(Side::Two), |f, n| {
        f.step(StubInput::new(if n == 1 { StubInput::JUMP } else { 0 }))
    });
    assert_eq!(sync.entity_state(PLAYER_TWO), Some(&expected));
    assert_eq!(expected.jumps, 1);
}

#[test]
fn replayed_snapshots_match_a_peer_that_never_guessed() {
    let inputs = |n: i32| StubInput::scripted(Side::Two, Frame::new(n));

    let mut oracle = peer(Side::One);
    for n in 0..30 {
        oracle.on_remote_input(RemoteInputPacket {
            frame: Frame::new(n),
            input: inputs(n),
            frame_advantage: 0,
        })
        .unwrap();
        oracle.tick(StubInput::scripted(Side::One, Frame::new(n))).unwrap();
    }
    assert_eq!(oracle.stats().rollbacks, 0);

    let mut lagged = peer(Side::One);
    for n in 0..30 {
        if n >= 2 {
            lagged
                .on_remote_input(RemoteInputPacket {
                    frame: Frame::new(n - 2),
                    input: inputs(n - 2),
                    frame_advantage: 2,
                })
                .unwrap();
        }
        lagged.tick(StubInput::scripted(Side::One, Frame::new(n))).unwrap();
    }
    for n in 28..30 {
        lagged
            .on_remote_input(RemoteInputPacket {
                frame: Frame::new(n),
                input: inputs(n),
                frame_advantage: 0,
            })
            .unwrap();
    }
    lagged.recompute_sync_point();
    lagged.maybe_roll_back().unwrap();

    for n in 0..30 {
        for entity in [PLAYER_ONE, PLAYER_TWO] {
            assert_eq!(
                oracle.snapshot_checksum(Frame::new(n), entity),
                lagged.snapshot_checksum(Frame::new(n), entity),
                "{entity} at frame {n}"
            );
        }
    }
}

#[test]
fn conflicting_duplicate_is_reported_not_applied() {
    let observer = Arc::new(CollectingObserver::new());
    let mut sync = builder_for(Side::One, SyncConfig::default())
        .with_violation_observer(observer.clone())
        .build()
        .unwrap();
    sync.on_remote_input(packet(0, StubInput::LEFT, 0)).unwrap();
    sync.on_remote_input(packet(0, StubInput::LEFT, 0)).unwrap();
    assert_no_violations!(observer);

    sync.on_remote_input(packet(0, StubInput::RIGHT, 0)).unwrap();
    let reported = observer.violations_of_kind(ViolationKind::InputLedger);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].severity, ViolationSeverity::Critical);
    assert_eq!(
        sync.ledger().remote_confirmed(Frame::new(0)),
        Some(&StubInput::new(StubInput::LEFT))
    );
}

#[test]
fn missing_frame_holds_sync_point_without_replaying() {
    init_tracing();
    let observer = Arc::new(CollectingObserver::new());
    let mut sync = builder_for(Side::One, SyncConfig::default())
        .with_violation_observer(observer.clone())
        .build()
        .unwrap();

    // Frame 2 is delivered last; every input matches the repeated guess.
    for n in [0, 1, 3, 4, 5, 6, 7, 8] {
        sync.on_remote_input(packet(n, 0, 0)).unwrap();
        let report = sync.tick(StubInput::default()).unwrap();
        assert!(report.rollback.is_none(), "replayed at frame {n}");
        assert!(report.advanced());
        assert_eq!(sync.current_sync_frame(), Frame::new(n.min(1)));
    }
    sync.on_remote_input(packet(2, 0, 0)).unwrap();
    let report = sync.tick(StubInput::default()).unwrap();
    assert!(report.rollback.is_none());
    assert_eq!(sync.current_sync_frame(), Frame::new(8));

    assert_eq!(sync.stats().rollbacks, 0);
    assert_eq!(sync.stats().mispredicted_frames, 0);
    assert_no_violations!(observer);
}

#[test]
fn rollback_past_snapshot_window_is_fatal() {
    let observer = Arc::new(CollectingObserver::new());
    let mut sync = builder_for(Side::One, SyncConfig::minimal())
        .with_violation_observer(observer.clone())
        .build()
        .unwrap();
    assert_eq!(sync.config().snapshot_capacity, 16);

    // Frame 2 is held back until the snapshot of frame 1 has been overwritten
    // by frame 17.
    for n in 0..18 {
        if n != 2 {
            sync.on_remote_input(packet(n, 0, 1)).unwrap();
        }
        let report = sync.tick(StubInput::default()).unwrap();
        assert!(report.rollback.is_none());
        assert_eq!(sync.current_sync_frame(), Frame::new(n.min(1)));
    }

    // It finally arrives, and the guess for it was wrong.
    sync.on_remote_input(packet(2, StubInput::JUMP, 1)).unwrap();
    let err = sync.tick(StubInput::default()).unwrap_err();
    assert!(matches!(err, SyncError::SnapshotMissing { .. }), "{err}");
    assert!(err.is_fatal());
    assert_violation!(observer, ViolationKind::Snapshot);
    assert!(observer.has_severity(ViolationSeverity::Critical));
}

#[test]
fn stalled_ticks_resend_the_same_frame() {
    let mut sync = peer(Side::Two);
    let mut outbound = Vec::new();
    for n in 0..6 {
        let report = sync.tick(StubInput::new(n)).unwrap();
        outbound.push((report.outbound.frame, report.outbound.input));
    }
    // Nothing received: frames 0..=2 advance, then frame 3 stalls with the
    // input of its first tick.
    assert_eq!(sync.local_frame(), Frame::new(3));
    assert!(outbound[3..]
        .iter()
        .all(|&(frame, input)| frame == Frame::new(3) && input == StubInput::new(3)));
    assert_eq!(sync.stats().stalls, 3);
}

#[test]
fn packets_arriving_through_the_inbox_are_applied_on_tick() {
    let mut a = Peer::new(Side::One, peer(Side::One));
    let mut b = Peer::new(Side::Two, peer(Side::Two));
    run_pair(
        &mut a,
        &mut b,
        &mut LossyChannel::perfect(),
        &mut LossyChannel::perfect(),
        20,
    );
    // Frame 19 of the other side is queued but not applied until next tick.
    assert_eq!(a.sync.remote_frame(), Frame::new(18));
    assert_eq!(a.sync.inbox().len(), 1);
    assert_eq!(a.sync.current_sync_frame(), Frame::new(18));
}
