//! The last frame both peers provably agree on.

use crate::frame_counters::FrameCounters;
use crate::input_ledger::comparison::InputComparator;
use crate::input_ledger::InputLedger;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::Frame;

/// What a [`SyncPoint::recompute`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPointChange {
    /// `current` did not move.
    Unchanged,
    /// `current` moved forward.
    Advanced {
        /// Old value.
        from: Frame,
        /// New value.
        to: Frame,
    },
    /// The scan produced a frame below `current`. `current` was kept; the
    /// caller must report this as a broken contract.
    Regressed {
        /// The value that was kept.
        kept: Frame,
        /// The lower value the scan produced.
        computed: Frame,
    },
}

/// `{ previous, current }`: `current` is the highest frame whose simulation
/// used only inputs that are now confirmed, `previous` is where the last scan
/// started.
///
/// `current` never exceeds either counter and never decreases. It stops
/// before a wrong guess and before a remote frame that has not arrived; only
/// the former leaves something a replay can fix, so the last scan remembers
/// whether it found one ([`has_misprediction`](SyncPoint::has_misprediction)).
///
/// ```
/// use rollback_sync::{Frame, FrameCounters, InputLedger, PartialEqComparator, SyncPoint};
///
/// let mut ledger = InputLedger::new(64);
/// let mut counters = FrameCounters::new();
/// for n in 0..10 {
///     let frame = Frame::new(n);
///     ledger.store_guessed(8u8, frame).unwrap();
///     ledger.store_remote_confirmed(if n == 5 { 7 } else { 8 }, frame).unwrap();
///     counters.observe_remote(frame);
///     counters.advance_local();
/// }
///
/// let mut sync = SyncPoint::new();
/// sync.recompute(&counters, &ledger, &PartialEqComparator);
/// assert_eq!(sync.current(), Frame::new(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPoint {
    previous: Frame,
    current: Frame,
    mispredicted: bool,
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self {
            previous: Frame::NULL,
            current: Frame::NULL,
            mispredicted: false,
        }
    }
}

impl SyncPoint {
    /// Nothing proven yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest frame known to be correct.
    #[must_use]
    pub fn current(&self) -> Frame {
        self.current
    }

    /// Where the last scan started.
    #[must_use]
    pub fn previous(&self) -> Frame {
        self.previous
    }

    /// `true` if the last scan found a guess after `current` that disagrees
    /// with the confirmed input.
    #[must_use]
    pub fn has_misprediction(&self) -> bool {
        self.mispredicted
    }

    /// Resumes the scan from `current` up to `min(remote_frame, local_frame)`
    /// and moves `current` to the lowest of that bound, the frame before the
    /// first wrong guess, and the frame before the first unconfirmed remote
    /// input.
    ///
    /// A wrong guess at or below the kept `current` (a [`Regressed`] scan)
    /// does not count as a misprediction: no replay from `current` reaches it.
    ///
    /// [`Regressed`]: SyncPointChange::Regressed
    pub fn recompute<I, C>(
        &mut self,
        counters: &FrameCounters,
        ledger: &InputLedger<I>,
        comparator: &C,
    ) -> SyncPointChange
    where
        C: InputComparator<I> + ?Sized,
    {
        let final_frame = counters.remote_frame().min(counters.local_frame());
        self.previous = self.current;

        let mismatch = ledger.first_mismatch(self.previous, final_frame, comparator);
        let gap = ledger.first_unconfirmed(self.previous, final_frame);
        let computed = [Some(final_frame), mismatch, gap]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(final_frame);

        let change = match computed.cmp(&self.current) {
            std::cmp::Ordering::Greater => {
                let from = self.current;
                self.current = computed;
                SyncPointChange::Advanced { from, to: computed }
            },
            std::cmp::Ordering::Equal => SyncPointChange::Unchanged,
            std::cmp::Ordering::Less => SyncPointChange::Regressed {
                kept: self.current,
                computed,
            },
        };
        self.mispredicted = mismatch.is_some_and(|frame| frame >= self.current);
        change
    }

    /// Checks `current` against the counters it must not exceed.
    ///
    /// # Errors
    ///
    /// The first broken bound.
    pub fn check_against(&self, counters: &FrameCounters) -> Result<(), InvariantViolation> {
        self.check_invariants()?;
        if self.current > counters.local_frame() || self.current > counters.remote_frame() {
            return Err(
                InvariantViolation::new("SyncPoint", "current exceeds a frame counter").with_details(
                    format!(
                        "current={}, local={}, remote={}",
                        self.current,
                        counters.local_frame(),
                        counters.remote_frame()
                    ),
                ),
            );
        }
        Ok(())
    }
}

impl InvariantChecker for SyncPoint {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.previous > self.current {
            return Err(
                InvariantViolation::new("SyncPoint", "previous is ahead of current").with_details(
                    format!("previous={}, current={}", self.previous, self.current),
                ),
            );
        }
        if self.current < Frame::NULL {
            return Err(InvariantViolation::new("SyncPoint", "current below NULL"));
        }
        Ok(())
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

    fn f(n: i32) -> Frame {
        Frame::new(n)
    }

    /// Simulates `local` frames, each guessed as `guess(n)`, with remote
    /// confirmations `confirmed(n)` for frames `0..=remote`.
    fn setup(
        local: i32,
        remote: i32,
        guess: impl Fn(i32) -> u8,
        confirmed: impl Fn(i32) -> u8,
    ) -> (FrameCounters, InputLedger<u8>) {
        let mut ledger = InputLedger::new(64);
        let mut counters = FrameCounters::new();
        for n in 0..local {
            ledger.store_guessed(guess(n), f(n)).unwrap();
            counters.advance_local();
        }
        for n in 0..=remote {
            ledger.store_remote_confirmed(confirmed(n), f(n)).unwrap();
            counters.observe_remote(f(n));
        }
        (counters, ledger)
    }

    #[test]
    fn starts_at_null() {
        let sync = SyncPoint::new();
        assert_eq!(sync.current(), Frame::NULL);
        assert_eq!(sync.previous(), Frame::NULL);
    }

    #[test]
    fn nothing_confirmed_stays_null() {
        let ledger: InputLedger<u8> = InputLedger::new(8);
        let counters = FrameCounters::new();
        let mut sync = SyncPoint::new();
        assert_eq!(
            sync.recompute(&counters, &ledger, &PartialEqComparator),
            SyncPointChange::Unchanged
        );
        assert_eq!(sync.current(), Frame::NULL);
    }

    #[test]
    fn matching_guesses_track_min_of_counters() {
        let (counters, ledger) = setup(10, 6, |_| 1, |_| 1);
        let mut sync = SyncPoint::new();
        let change = sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(
            change,
            SyncPointChange::Advanced {
                from: Frame::NULL,
                to: f(6)
            }
        );
        sync.check_against(&counters).unwrap();
    }

    #[test]
    fn remote_ahead_is_bounded_by_local() {
        let (counters, ledger) = setup(3, 9, |_| 1, |_| 1);
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(sync.current(), f(3));
        sync.check_against(&counters).unwrap();
    }

    #[test]
    fn mismatch_stops_before_wrong_guess() {
        let (counters, ledger) = setup(10, 9, |_| 8, |n| if n == 5 { 7 } else { 8 });
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(sync.current(), f(4));
        assert!(sync.has_misprediction());
    }

    #[test]
    fn corrected_guess_lets_scan_resume() {
        let (counters, mut ledger) = setup(10, 9, |_| 8, |n| if n == 5 { 7 } else { 8 });
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        ledger.overwrite_guessed(7, f(5)).unwrap();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(sync.previous(), f(4));
        assert_eq!(sync.current(), f(9));
        assert!(!sync.has_misprediction());
    }

    #[test]
    fn gap_pins_current() {
        let mut ledger = InputLedger::new(64);
        let mut counters = FrameCounters::new();
        for n in 0..6 {
            ledger.store_guessed(0u8, f(n)).unwrap();
            counters.advance_local();
        }
        for n in [0, 1, 3, 4] {
            ledger.store_remote_confirmed(0u8, f(n)).unwrap();
            counters.observe_remote(f(n));
        }
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(sync.current(), f(1));
        assert!(!sync.has_misprediction());

        ledger.store_remote_confirmed(0u8, f(2)).unwrap();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(sync.current(), f(4));
        assert!(!sync.has_misprediction());
    }

    #[test]
    fn wrong_guess_filling_a_gap_is_a_misprediction() {
        let mut ledger = InputLedger::new(64);
        let mut counters = FrameCounters::new();
        for n in 0..6 {
            ledger.store_guessed(0u8, f(n)).unwrap();
            counters.advance_local();
        }
        for n in [0, 1, 3, 4] {
            ledger.store_remote_confirmed(0u8, f(n)).unwrap();
            counters.observe_remote(f(n));
        }
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);

        ledger.store_remote_confirmed(5u8, f(2)).unwrap();
        let change = sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(change, SyncPointChange::Unchanged);
        assert_eq!(sync.current(), f(1));
        assert!(sync.has_misprediction());
    }

    #[test]
    fn lower_result_is_reported_and_current_kept() {
        let (counters, mut ledger) = setup(10, 9, |_| 1, |_| 1);
        let mut sync = SyncPoint::new();
        sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(sync.current(), f(9));
        // Corrupt the guess at the sync frame itself.
        ledger.overwrite_guessed(2, f(9)).unwrap();
        let change = sync.recompute(&counters, &ledger, &PartialEqComparator);
        assert_eq!(
            change,
            SyncPointChange::Regressed {
                kept: f(9),
                computed: f(8)
            }
        );
        assert_eq!(sync.current(), f(9));
        assert!(!sync.has_misprediction());
    }
}
