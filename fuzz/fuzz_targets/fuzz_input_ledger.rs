//! Direct fuzz target for the input ledger and sync point.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary operation sequences
//! - Ledger invariants hold after every operation
//! - The sync frame never exceeds either counter and never decreases

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rollback_sync::telemetry::InvariantChecker;
use rollback_sync::{Frame, FrameCounters, InputLedger, PartialEqComparator, SyncPoint};

#[derive(Debug, Arbitrary)]
enum LedgerOp {
    StoreLocal { frame: i16, value: u8 },
    StoreConfirmed { frame: i16, value: u8 },
    StoreGuessed { frame: i16, value: u8 },
    OverwriteGuessed { frame: i16, value: u8 },
    AdvanceLocal,
    ObserveRemote { frame: i16 },
    Recompute,
}

#[derive(Debug, Arbitrary)]
struct Input {
    window: u8,
    ops: Vec<LedgerOp>,
}

fuzz_target!(|input: Input| {
    let window = usize::from(input.window).max(1);
    let mut ledger = InputLedger::new(window);
    let mut counters = FrameCounters::new();
    let mut sync = SyncPoint::new();

    for op in input.ops.into_iter().take(2048) {
        let _ = match op {
            LedgerOp::StoreLocal { frame, value } => {
                ledger.store_local(value, Frame::new(frame.into()))
            },
            LedgerOp::StoreConfirmed { frame, value } => {
                ledger.store_remote_confirmed(value, Frame::new(frame.into()))
            },
            LedgerOp::StoreGuessed { frame, value } => {
                ledger.store_guessed(value, Frame::new(frame.into()))
            },
            LedgerOp::OverwriteGuessed { frame, value } => {
                ledger.overwrite_guessed(value, Frame::new(frame.into()))
            },
            LedgerOp::AdvanceLocal => {
                counters.advance_local();
                Ok(())
            },
            LedgerOp::ObserveRemote { frame } => {
                counters.observe_remote(Frame::new(frame.into()));
                Ok(())
            },
            LedgerOp::Recompute => {
                let before = sync.current();
                sync.recompute(&counters, &ledger, &PartialEqComparator);
                assert!(sync.current() >= before);
                assert!(sync.check_against(&counters).is_ok());
                Ok(())
            },
        };
        assert!(ledger.check_invariants().is_ok());
    }
});
