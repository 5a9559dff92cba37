#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use rollback_sync::{Frame, SyncConfig};

use crate::common::channel::{common_settled_frame, run_pair, LinkFault, LossyChannel, Peer};
use crate::common::init_tracing;
use crate::common::stubs::{builder_for, Fighter, Side, StubInput, PLAYER_ONE, PLAYER_TWO};

/// The state of `owner`'s fighter after frames `0..=frame`, computed without
/// any networking.
pub fn reference_fighter(owner: Side, frame: Frame) -> Fighter {
    (0..=frame.as_i32()).fold(Fighter::spawn(owner), |fighter, n| {
        fighter.step(StubInput::scripted(owner, Frame::new(n)))
    })
}

pub fn pair(config: SyncConfig) -> (Peer, Peer) {
    (
        Peer::new(Side::One, builder_for(Side::One, config).build().unwrap()),
        Peer::new(Side::Two, builder_for(Side::Two, config).build().unwrap()),
    )
}

/// Runs `faulty` ticks through the given links, heals them, lets both peers
/// settle, and checks both agree with the reference at their settled frame.
pub fn assert_converges(
    a_to_b: Vec<LinkFault>,
    b_to_a: Vec<LinkFault>,
    faulty: usize,
) -> (Peer, Peer) {
    let (mut a, mut b) = pair(SyncConfig::default());
    let mut a_to_b = LossyChannel::new(a_to_b);
    let mut b_to_a = LossyChannel::new(b_to_a);

    run_pair(&mut a, &mut b, &mut a_to_b, &mut b_to_a, faulty);
    a_to_b.heal();
    b_to_a.heal();
    run_pair(&mut a, &mut b, &mut a_to_b, &mut b_to_a, 60);

    let settled = common_settled_frame(&a, &b);
    assert!(
        settled >= Frame::new(faulty as i32 / 2),
        "peers only settled up to {settled} after {faulty} faulty ticks"
    );

    for (entity, owner) in [(PLAYER_ONE, Side::One), (PLAYER_TWO, Side::Two)] {
        let expected = reference_fighter(owner, settled);
        for peer in [&a, &b] {
            let restored = peer.sync.snapshots().restore(settled, entity).unwrap();
            assert_eq!(restored, expected, "{entity} on {:?} at {settled}", peer.side);
        }
        assert_eq!(
            a.sync.snapshot_checksum(settled, entity),
            b.sync.snapshot_checksum(settled, entity)
        );
    }
    (a, b)
}

fn fault(drop: bool, duplicate: bool, delay: u8) -> LinkFault {
    LinkFault {
        drop,
        duplicate,
        delay,
    }
}

#[test]
fn perfect_link_converges_without_corrections_beyond_predictions() {
    init_tracing();
    let (a, b) = assert_converges(vec![fault(false, false, 0)], vec![fault(false, false, 0)], 120);
    assert_eq!(a.sync.stats().stalls, 0);
    assert_eq!(b.sync.stats().stalls, 0);
}

#[test]
fn delayed_link_rolls_back_and_converges() {
    let (a, b) = assert_converges(vec![fault(false, false, 3)], vec![fault(false, false, 1)], 150);
    assert!(a.sync.stats().rollbacks > 0);
    assert!(b.sync.stats().rollbacks > 0);
}

#[test]
fn lossy_reordering_link_converges() {
    init_tracing();
    let script_a = vec![
        fault(false, false, 2),
        fault(true, false, 0),
        fault(false, true, 5),
        fault(false, false, 0),
        fault(true, false, 0),
        fault(false, false, 4),
        fault(false, false, 1),
    ];
    let script_b = vec![
        fault(false, false, 0),
        fault(false, false, 3),
        fault(true, false, 0),
        fault(false, true, 1),
        fault(false, false, 6),
    ];
    let (a, b) = assert_converges(script_a, script_b, 200);
    assert!(a.sync.stats().duplicate_packets > 0);
    assert!(b.sync.stats().duplicate_packets > 0);
    assert!(a.sync.stats().frames_resimulated > 0);
}

#[test]
fn one_sided_outage_stalls_then_recovers() {
    let (mut a, mut b) = pair(SyncConfig::default());
    let mut a_to_b = LossyChannel::perfect();
    let mut b_to_a = LossyChannel::new(vec![fault(true, false, 0)]);

    run_pair(&mut a, &mut b, &mut a_to_b, &mut b_to_a, 30);
    // A hears nothing: it advances a few frames on predictions and then waits.
    assert!(a.sync.local_frame() <= Frame::new(4));
    assert!(a.sync.stats().stalls > 0);

    b_to_a.heal();
    run_pair(&mut a, &mut b, &mut a_to_b, &mut b_to_a, 60);
    let settled = common_settled_frame(&a, &b);
    assert!(settled >= Frame::new(40), "settled at {settled}");
    for entity in [PLAYER_ONE, PLAYER_TWO] {
        assert_eq!(
            a.sync.snapshot_checksum(settled, entity),
            b.sync.snapshot_checksum(settled, entity)
        );
    }
}
