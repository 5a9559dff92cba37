//! Per-frame record of local, confirmed remote and guessed remote inputs.
//!
//! Each track is a fixed-capacity ring keyed by frame. A slot remembers which
//! frame it holds, so a read of a frame that wrapped out of the window returns
//! `None` instead of a stale neighbour.

pub mod comparison;
pub mod prediction;

use crate::error::{InputTrack, SyncError};
use crate::input_ledger::comparison::InputComparator;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::Frame;

/// One track of the ledger.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing and fuzzing.
/// It is not part of the stable public API.
#[derive(Debug, Clone)]
pub struct TrackRing<I> {
    track: InputTrack,
    slots: Vec<Option<(Frame, I)>>,
    newest: Frame,
}

impl<I> TrackRing<I> {
    /// Creates an empty ring with `capacity` slots (at least one).
    #[must_use]
    pub fn new(track: InputTrack, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            track,
            slots,
            newest: Frame::NULL,
        }
    }

    /// Number of frames the ring retains.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest frame ever written, or [`Frame::NULL`].
    #[must_use]
    pub fn newest(&self) -> Frame {
        self.newest
    }

    /// Lowest frame that can still be held, given the newest write.
    #[must_use]
    pub fn oldest_retained(&self) -> Frame {
        let span = i32::try_from(self.capacity()).unwrap_or(i32::MAX);
        Frame::new(self.newest.as_i32().saturating_sub(span - 1).max(0))
    }

    /// Value stored for exactly `frame`.
    #[must_use]
    pub fn get(&self, frame: Frame) -> Option<&I> {
        let index = frame.ring_index(self.capacity())?;
        match self.slots.get(index)? {
            Some((stored, input)) if *stored == frame => Some(input),
            _ => None,
        }
    }

    /// Writes `frame` once.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidFrame`] for negative frames.
    /// - [`SyncError::DuplicateWrite`] if `frame` is already stored.
    /// - [`SyncError::FrameOutsideWindow`] if the slot holds a newer frame.
    pub fn insert(&mut self, frame: Frame, input: I) -> Result<(), SyncError> {
        let track = self.track;
        let slot = self.slot_for_write(frame)?;
        if let Some((stored, _)) = slot.as_ref() {
            if *stored == frame {
                return Err(SyncError::DuplicateWrite { track, frame });
            }
        }
        *slot = Some((frame, input));
        self.newest = self.newest.max(frame);
        Ok(())
    }

    /// Writes `frame`, replacing any value already stored for it.
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert), minus `DuplicateWrite`.
    pub fn overwrite(&mut self, frame: Frame, input: I) -> Result<(), SyncError> {
        let slot = self.slot_for_write(frame)?;
        *slot = Some((frame, input));
        self.newest = self.newest.max(frame);
        Ok(())
    }

    fn slot_for_write(&mut self, frame: Frame) -> Result<&mut Option<(Frame, I)>, SyncError> {
        let track = self.track;
        let Some(index) = frame.ring_index(self.slots.len()) else {
            return Err(SyncError::InvalidFrame {
                frame,
                reason: "ledger frames must be non-negative",
            });
        };
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| SyncError::InternalError {
                context: format!("ring index {index} out of bounds for {track} track"),
            })?;
        if let Some((stored, _)) = slot.as_ref() {
            if *stored > frame {
                return Err(SyncError::FrameOutsideWindow {
                    track,
                    frame,
                    occupant: *stored,
                });
            }
        }
        Ok(slot)
    }

    fn stored_frames(&self) -> impl Iterator<Item = (usize, Frame)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|(f, _)| (i, *f)))
    }
}

/// The three input tracks of one peer.
///
/// The ledger knows nothing about counters; callers move
/// [`FrameCounters`](crate::FrameCounters) themselves.
///
/// ```
/// use rollback_sync::{Frame, InputLedger, PartialEqComparator};
///
/// let mut ledger = InputLedger::new(64);
/// ledger.store_guessed(8u8, Frame::new(5)).unwrap();
/// ledger.store_remote_confirmed(7u8, Frame::new(5)).unwrap();
///
/// let mismatch = ledger.first_mismatch(Frame::new(0), Frame::new(10), &PartialEqComparator);
/// assert_eq!(mismatch, Some(Frame::new(4)));
/// ```
#[derive(Debug, Clone)]
pub struct InputLedger<I> {
    local: TrackRing<I>,
    confirmed: TrackRing<I>,
    guessed: TrackRing<I>,
}

impl<I> InputLedger<I> {
    /// Creates a ledger whose tracks each retain `window` frames.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            local: TrackRing::new(InputTrack::Local, window),
            confirmed: TrackRing::new(InputTrack::RemoteConfirmed, window),
            guessed: TrackRing::new(InputTrack::RemoteGuessed, window),
        }
    }

    /// Frames retained per track.
    #[must_use]
    pub fn window(&self) -> usize {
        self.local.capacity()
    }

    /// Records this peer's input for `frame`.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateWrite`] on a second write, plus the window errors
    /// of [`TrackRing::insert`].
    pub fn store_local(&mut self, input: I, frame: Frame) -> Result<(), SyncError> {
        self.local.insert(frame, input)
    }

    /// Records the remote peer's real input for `frame`.
    ///
    /// # Errors
    ///
    /// As [`store_local`](Self::store_local).
    pub fn store_remote_confirmed(&mut self, input: I, frame: Frame) -> Result<(), SyncError> {
        self.confirmed.insert(frame, input)
    }

    /// Records a prediction of the remote input for `frame`.
    ///
    /// # Errors
    ///
    /// As [`store_local`](Self::store_local).
    pub fn store_guessed(&mut self, input: I, frame: Frame) -> Result<(), SyncError> {
        self.guessed.insert(frame, input)
    }

    /// Replaces the guess for `frame` with the input a replay actually used.
    ///
    /// # Errors
    ///
    /// Window errors of [`TrackRing::overwrite`].
    pub fn overwrite_guessed(&mut self, input: I, frame: Frame) -> Result<(), SyncError> {
        self.guessed.overwrite(frame, input)
    }

    /// Local input for `frame`.
    #[must_use]
    pub fn local(&self, frame: Frame) -> Option<&I> {
        self.local.get(frame)
    }

    /// Confirmed remote input for `frame`.
    #[must_use]
    pub fn remote_confirmed(&self, frame: Frame) -> Option<&I> {
        self.confirmed.get(frame)
    }

    /// Guessed remote input for `frame`.
    #[must_use]
    pub fn guessed(&self, frame: Frame) -> Option<&I> {
        self.guessed.get(frame)
    }

    /// The confirmed remote input with the highest frame.
    #[must_use]
    pub fn latest_confirmed(&self) -> Option<(Frame, &I)> {
        let newest = self.confirmed.newest();
        self.confirmed.get(newest).map(|input| (newest, input))
    }

    fn scan_bounds(&self, lower: Frame, upper: Frame) -> (i32, i32) {
        let floor = self.confirmed.oldest_retained().as_i32();
        (lower.as_i32().max(0).max(floor), upper.as_i32())
    }

    /// Scans `[lower, upper]` ascending and returns `frame - 1` for the first
    /// frame whose guess disagrees with its confirmation.
    ///
    /// Frames lacking either value are skipped. The range is clamped to the
    /// retained window.
    #[must_use]
    pub fn first_mismatch<C>(&self, lower: Frame, upper: Frame, comparator: &C) -> Option<Frame>
    where
        C: InputComparator<I> + ?Sized,
    {
        let (lo, hi) = self.scan_bounds(lower, upper);
        (lo..=hi).map(Frame::new).find_map(|frame| {
            let guessed = self.guessed.get(frame)?;
            let confirmed = self.confirmed.get(frame)?;
            (!comparator.inputs_match(guessed, confirmed)).then(|| frame.prev())
        })
    }

    /// Scans `[lower, upper]` ascending and returns `frame - 1` for the first
    /// frame with no confirmed remote input.
    ///
    /// Frames after `lower` that already left the confirmed window count as
    /// unconfirmed: nothing can prove them any more.
    #[must_use]
    pub fn first_unconfirmed(&self, lower: Frame, upper: Frame) -> Option<Frame> {
        let (lo, hi) = self.scan_bounds(lower, upper);
        let first_needed = lower.next().as_i32().max(0);
        if first_needed < lo && first_needed <= hi {
            return Some(Frame::new(first_needed).prev());
        }
        (lo..=hi)
            .map(Frame::new)
            .find(|frame| self.confirmed.get(*frame).is_none())
            .map(Frame::prev)
    }
}

impl<I> InvariantChecker for InputLedger<I> {
    /// 1. Every stored frame sits in the slot its ring index names.
    /// 2. No stored frame is newer than the track's `newest`.
    /// 3. No stored frame is older than the track's retained window.
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for ring in [&self.local, &self.confirmed, &self.guessed] {
            let oldest = ring.oldest_retained();
            for (index, frame) in ring.stored_frames() {
                if frame.ring_index(ring.capacity()) != Some(index) {
                    return Err(InvariantViolation::new("InputLedger", "frame in wrong slot")
                        .with_details(format!("track={}, frame={frame}, slot={index}", ring.track)));
                }
                if frame > ring.newest {
                    return Err(
                        InvariantViolation::new("InputLedger", "stored frame newer than newest")
                            .with_details(format!(
                                "track={}, frame={frame}, newest={}",
                                ring.track, ring.newest
                            )),
                    );
                }
                if frame < oldest {
                    return Err(
                        InvariantViolation::new("InputLedger", "stored frame outside window")
                            .with_details(format!(
                                "track={}, frame={frame}, oldest={oldest}",
                                ring.track
                            )),
                    );
                }
            }
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

    #[test]
    fn tracks_are_independent() {
        let mut ledger = InputLedger::new(16);
        ledger.store_local(1u8, f(3)).unwrap();
        ledger.store_remote_confirmed(2u8, f(3)).unwrap();
        ledger.store_guessed(3u8, f(3)).unwrap();
        assert_eq!(ledger.local(f(3)), Some(&1));
        assert_eq!(ledger.remote_confirmed(f(3)), Some(&2));
        assert_eq!(ledger.guessed(f(3)), Some(&3));
        assert_eq!(ledger.local(f(4)), None);
    }

    #[test]
    fn second_write_is_duplicate() {
        let mut ledger = InputLedger::new(16);
        ledger.store_local(1u8, f(0)).unwrap();
        assert_eq!(
            ledger.store_local(1u8, f(0)),
            Err(SyncError::DuplicateWrite {
                track: InputTrack::Local,
                frame: f(0)
            })
        );
        ledger.store_remote_confirmed(4u8, f(2)).unwrap();
        assert!(matches!(
            ledger.store_remote_confirmed(4u8, f(2)),
            Err(SyncError::DuplicateWrite {
                track: InputTrack::RemoteConfirmed,
                ..
            })
        ));
        ledger.store_guessed(0u8, f(2)).unwrap();
        assert!(ledger.store_guessed(0u8, f(2)).is_err());
    }

    #[test]
    fn overwrite_guessed_replaces_value() {
        let mut ledger = InputLedger::new(16);
        ledger.store_guessed(8u8, f(5)).unwrap();
        ledger.overwrite_guessed(7u8, f(5)).unwrap();
        assert_eq!(ledger.guessed(f(5)), Some(&7));
        ledger.overwrite_guessed(1u8, f(6)).unwrap();
        assert_eq!(ledger.guessed(f(6)), Some(&1));
    }

    #[test]
    fn negative_frame_is_rejected() {
        let mut ledger = InputLedger::new(16);
        assert!(matches!(
            ledger.store_local(0u8, Frame::NULL),
            Err(SyncError::InvalidFrame { .. })
        ));
        assert_eq!(ledger.local(Frame::NULL), None);
    }

    #[test]
    fn wraparound_evicts_old_frames() {
        let mut ledger = InputLedger::new(4);
        for n in 0..6 {
            ledger.store_local(n as u8, f(n)).unwrap();
        }
        assert_eq!(ledger.local(f(1)), None);
        assert_eq!(ledger.local(f(5)), Some(&5));
        assert!(matches!(
            ledger.store_local(9u8, f(1)),
            Err(SyncError::FrameOutsideWindow {
                occupant,
                ..
            }) if occupant == f(5)
        ));
    }

    #[test]
    fn first_mismatch_returns_frame_before() {
        let mut ledger = InputLedger::new(32);
        for n in 0..10 {
            ledger.store_guessed(0u8, f(n)).unwrap();
            ledger.store_remote_confirmed(0u8, f(n)).unwrap();
        }
        assert_eq!(ledger.first_mismatch(f(0), f(9), &PartialEqComparator), None);
        ledger.overwrite_guessed(8u8, f(5)).unwrap();
        ledger.overwrite_guessed(8u8, f(7)).unwrap();
        assert_eq!(
            ledger.first_mismatch(f(0), f(9), &PartialEqComparator),
            Some(f(4))
        );
        assert_eq!(
            ledger.first_mismatch(f(6), f(9), &PartialEqComparator),
            Some(f(6))
        );
    }

    #[test]
    fn first_mismatch_skips_frames_without_guess() {
        let mut ledger = InputLedger::new(32);
        ledger.store_remote_confirmed(1u8, f(0)).unwrap();
        ledger.store_remote_confirmed(2u8, f(1)).unwrap();
        assert_eq!(ledger.first_mismatch(f(0), f(1), &PartialEqComparator), None);
    }

    #[test]
    fn mismatch_at_frame_zero_points_before_first_frame() {
        let mut ledger = InputLedger::new(32);
        ledger.store_guessed(1u8, f(0)).unwrap();
        ledger.store_remote_confirmed(2u8, f(0)).unwrap();
        assert_eq!(
            ledger.first_mismatch(Frame::NULL, f(0), &PartialEqComparator),
            Some(Frame::NULL)
        );
    }

    #[test]
    fn custom_comparator_is_honored() {
        let mut ledger = InputLedger::new(8);
        ledger.store_guessed(0x13u8, f(1)).unwrap();
        ledger.store_remote_confirmed(0xF3u8, f(1)).unwrap();
        let low_nibble = |a: &u8, b: &u8| (a & 0x0F) == (b & 0x0F);
        assert_eq!(ledger.first_mismatch(f(0), f(1), &low_nibble), None);
        assert_eq!(
            ledger.first_mismatch(f(0), f(1), &PartialEqComparator),
            Some(f(0))
        );
    }

    #[test]
    fn first_unconfirmed_finds_gap() {
        let mut ledger = InputLedger::new(32);
        ledger.store_remote_confirmed(0u8, f(0)).unwrap();
        ledger.store_remote_confirmed(0u8, f(2)).unwrap();
        assert_eq!(ledger.first_unconfirmed(f(0), f(2)), Some(f(0)));
        ledger.store_remote_confirmed(0u8, f(1)).unwrap();
        assert_eq!(ledger.first_unconfirmed(f(0), f(2)), None);
        assert_eq!(ledger.first_unconfirmed(f(0), f(3)), Some(f(2)));
    }

    #[test]
    fn frames_lost_from_window_count_as_unconfirmed() {
        let mut ledger = InputLedger::new(4);
        for n in [0, 1, 3, 4, 5, 6] {
            ledger.store_remote_confirmed(0u8, f(n)).unwrap();
        }
        // Window now holds 3..=6; frame 2 never arrived and 2 is gone.
        assert_eq!(ledger.first_unconfirmed(f(1), f(6)), Some(f(1)));
        assert_eq!(ledger.first_unconfirmed(f(2), f(6)), None);
    }

    #[test]
    fn empty_range_scans_nothing() {
        let ledger: InputLedger<u8> = InputLedger::new(8);
        assert_eq!(ledger.first_unconfirmed(Frame::NULL, Frame::NULL), None);
        assert_eq!(ledger.first_mismatch(f(3), f(2), &PartialEqComparator), None);
    }

    #[test]
    fn latest_confirmed_tracks_highest_frame() {
        let mut ledger = InputLedger::new(8);
        assert_eq!(ledger.latest_confirmed(), None);
        ledger.store_remote_confirmed(5u8, f(4)).unwrap();
        ledger.store_remote_confirmed(3u8, f(2)).unwrap();
        assert_eq!(ledger.latest_confirmed(), Some((f(4), &5)));
    }

    #[test]
    fn invariants_hold_after_wraparound() {
        let mut ledger = InputLedger::new(4);
        for n in 0..20 {
            ledger.store_local(0u8, f(n)).unwrap();
            ledger.store_guessed(0u8, f(n)).unwrap();
        }
        ledger.check_invariants().unwrap();
    }
}
