//! Loom tests for `RemoteInbox` thread safety.
//!
//! The network side pushes packets while the simulation thread drains them at
//! the start of each tick. These tests explore every interleaving of the two.
//!
//! Run with:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```

#![cfg(loom)]

use loom::thread;
use rollback_sync::{Frame, RemoteInbox, RemoteInputPacket};

fn packet(frame: i32) -> RemoteInputPacket<u8> {
    RemoteInputPacket {
        frame: Frame::new(frame),
        input: frame as u8,
        frame_advantage: 0,
    }
}

/// Two receivers pushing at once never lose a packet.
#[test]
fn test_concurrent_pushes() {
    loom::model(|| {
        let inbox: RemoteInbox<u8> = RemoteInbox::new();
        let first = inbox.clone();
        let second = inbox.clone();

        let t1 = thread::spawn(move || first.push(packet(1)));
        let t2 = thread::spawn(move || second.push(packet(2)));

        t1.join().unwrap();
        t2.join().unwrap();

        let mut frames: Vec<_> = inbox.drain().into_iter().map(|p| p.frame).collect();
        frames.sort();
        assert_eq!(frames, vec![Frame::new(1), Frame::new(2)]);
        assert!(inbox.is_empty());
    });
}

/// A drain racing a push sees the packet either now or on the next drain,
/// never both and never neither.
#[test]
fn test_drain_during_push() {
    loom::model(|| {
        let inbox: RemoteInbox<u8> = RemoteInbox::new();
        let receiver = inbox.clone();

        let pusher = thread::spawn(move || {
            receiver.push(packet(0));
            receiver.push(packet(1));
        });

        let early = inbox.drain();
        pusher.join().unwrap();
        let late = inbox.drain();

        let frames: Vec<_> = early.iter().chain(late.iter()).map(|p| p.frame).collect();
        assert_eq!(frames, vec![Frame::new(0), Frame::new(1)]);
    });
}

/// Packets from one sender keep their push order across drains.
#[test]
fn test_order_preserved_per_sender() {
    loom::model(|| {
        let inbox: RemoteInbox<u8> = RemoteInbox::new();
        let receiver = inbox.clone();

        let pusher = thread::spawn(move || {
            for frame in 0..3 {
                receiver.push(packet(frame));
            }
        });

        let mut seen = inbox.drain();
        pusher.join().unwrap();
        seen.extend(inbox.drain());

        let frames: Vec<_> = seen.into_iter().map(|p| p.frame.as_i32()).collect();
        assert_eq!(frames, vec![0, 1, 2]);
    });
}
