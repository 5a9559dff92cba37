//! Whether the simulation has to be rewound.

use crate::frame_counters::FrameCounters;
use crate::sync_point::SyncPoint;

/// Decides whether to roll back.
///
/// Open when both peers have moved past the sync frame and the sync point
/// stopped there because of a wrong guess. A sync frame held back only by a
/// remote input that has not arrived yet leaves the gate closed: replaying
/// cannot supply that input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackGate;

impl RollbackGate {
    /// `mispredicted && local_frame > current && remote_frame > current`.
    #[must_use]
    pub fn should_roll_back(counters: &FrameCounters, sync: &SyncPoint) -> bool {
        let current = sync.current();
        sync.has_misprediction()
            && counters.local_frame() > current
            && counters.remote_frame() > current
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::input_ledger::comparison::PartialEqComparator;
    use crate::input_ledger::InputLedger;
    use crate::Frame;

    fn run(local: i32, remote: i32, wrong_at: Option<i32>) -> (FrameCounters, SyncPoint) {
        run_skipping(local, remote, wrong_at, None)
    }

    fn run_skipping(
        local: i32,
        remote: i32,
        wrong_at: Option<i32>,
        missing: Option<i32>,
    ) -> (FrameCounters, SyncPoint) {
        let mut ledger = InputLedger::new(64);
        let mut counters = FrameCounters::new();
        for n in 0..local {
            ledger.store_guessed(0u8, Frame::new(n)).unwrap();
            counters.advance_local();
        }
        for n in (0..=remote).filter(|&n| Some(n) != missing) {
            let value = if Some(n) == wrong_at { 1 } else { 0 };
            ledger.store_remote_confirmed(value, Frame::new(n)).unwrap();
            counters.observe_remote(Frame::new(n));
        }
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        (counters, sync)
    }

    #[test]
    fn closed_when_guesses_were_right() {
        let (counters, sync) = run(10, 6, None);
        assert!(!RollbackGate::should_roll_back(&counters, &sync));
    }

    #[test]
    fn open_after_wrong_guess() {
        let (counters, sync) = run(10, 8, Some(5));
        assert_eq!(sync.current(), Frame::new(4));
        assert!(RollbackGate::should_roll_back(&counters, &sync));
    }

    #[test]
    fn closed_while_waiting_for_a_missing_frame() {
        let (counters, sync) = run_skipping(10, 8, None, Some(3));
        assert_eq!(sync.current(), Frame::new(2));
        assert!(!RollbackGate::should_roll_back(&counters, &sync));
    }

    #[test]
    fn open_for_wrong_guess_behind_a_missing_frame() {
        let (counters, sync) = run_skipping(10, 8, Some(6), Some(3));
        assert_eq!(sync.current(), Frame::new(2));
        assert!(RollbackGate::should_roll_back(&counters, &sync));
    }

    #[test]
    fn closed_at_session_start() {
        let counters = FrameCounters::new();
        assert!(!RollbackGate::should_roll_back(&counters, &SyncPoint::new()));
    }

    #[test]
    fn wrong_first_guess_rolls_back_to_before_frame_zero() {
        let (counters, sync) = run(3, 0, Some(0));
        assert_eq!(sync.current(), Frame::NULL);
        assert!(RollbackGate::should_roll_back(&counters, &sync));
    }
}
