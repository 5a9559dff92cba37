//! Local and remote frame progress, and the advantage arithmetic built on it.

use crate::report_violation;
use crate::telemetry::{InvariantChecker, InvariantViolation, ViolationKind, ViolationSeverity};
use crate::Frame;

/// Where each peer is.
///
/// * `local_frame`: the frame this peer is about to simulate. Frames below it
///   have been simulated.
/// * `remote_frame`: highest frame with a confirmed remote input,
///   [`Frame::NULL`] before the first.
/// * `remote_frame_advantage`: the remote peer's own `local - remote`, as it
///   last reported it.
///
/// ```
/// use rollback_sync::{Frame, FrameCounters};
///
/// let mut counters = FrameCounters::new();
/// for _ in 0..10 {
///     counters.advance_local();
/// }
/// counters.observe_remote(Frame::new(6));
/// counters.set_remote_frame_advantage(0);
///
/// assert_eq!(counters.local_frame_advantage(), 4);
/// assert_eq!(counters.frame_advantage_delta(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounters {
    local_frame: Frame,
    remote_frame: Frame,
    remote_frame_advantage: i32,
}

impl Default for FrameCounters {
    fn default() -> Self {
        Self {
            local_frame: Frame::new(0),
            remote_frame: Frame::NULL,
            remote_frame_advantage: 0,
        }
    }
}

impl FrameCounters {
    /// Counters at the start of a session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame about to be simulated.
    #[must_use]
    pub fn local_frame(&self) -> Frame {
        self.local_frame
    }

    /// Highest confirmed remote frame.
    #[must_use]
    pub fn remote_frame(&self) -> Frame {
        self.remote_frame
    }

    /// Last advantage the remote peer reported about itself.
    #[must_use]
    pub fn remote_frame_advantage(&self) -> i32 {
        self.remote_frame_advantage
    }

    /// How far this peer is ahead of what it knows about the remote.
    #[must_use]
    pub fn local_frame_advantage(&self) -> i32 {
        self.local_frame - self.remote_frame
    }

    /// How much more ahead this peer is than the remote peer is of it.
    #[must_use]
    pub fn frame_advantage_delta(&self) -> i32 {
        self.local_frame_advantage() - self.remote_frame_advantage
    }

    /// Moves to the next local frame.
    pub fn advance_local(&mut self) {
        self.local_frame = self.local_frame.next();
    }

    /// `remote_frame = max(remote_frame, frame)`. Returns `true` if it moved.
    pub fn observe_remote(&mut self, frame: Frame) -> bool {
        if !frame.is_valid() {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::FrameCounters,
                "ignoring remote frame {} below zero",
                frame
            );
            return false;
        }
        if frame > self.remote_frame {
            self.remote_frame = frame;
            return true;
        }
        false
    }

    /// Stores the remote peer's self-reported advantage.
    pub fn set_remote_frame_advantage(&mut self, advantage: i32) {
        self.remote_frame_advantage = advantage;
    }
}

impl InvariantChecker for FrameCounters {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if !self.local_frame.is_valid() {
            return Err(
                InvariantViolation::new("FrameCounters", "local frame is negative")
                    .with_details(format!("local_frame={}", self.local_frame)),
            );
        }
        if self.remote_frame < Frame::NULL {
            return Err(
                InvariantViolation::new("FrameCounters", "remote frame below NULL")
                    .with_details(format!("remote_frame={}", self.remote_frame.as_i32())),
            );
        }
        Ok(())
    }
}

/// Rolling history of local and remote advantages used to recommend how
/// long a peer that is running ahead should wait.
///
/// Slots are indexed by `frame % window`, so one sample per frame is kept.
#[derive(Debug, Clone)]
pub struct AdvantageWindow {
    local: Vec<i32>,
    remote: Vec<i32>,
}

impl AdvantageWindow {
    /// Creates a window of `size` frames (at least one), all zero.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            local: vec![0; size],
            remote: vec![0; size],
        }
    }

    /// Number of frames averaged.
    #[must_use]
    pub fn size(&self) -> usize {
        self.local.len()
    }

    /// Records both advantages observed at `frame`.
    pub fn record(&mut self, frame: Frame, local_advantage: i32, remote_advantage: i32) {
        let Some(index) = frame.ring_index(self.local.len()) else {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::FlowControl,
                "advantage sample for invalid frame {} skipped",
                frame
            );
            return;
        };
        if let (Some(local), Some(remote)) = (self.local.get_mut(index), self.remote.get_mut(index)) {
            *local = local_advantage;
            *remote = remote_advantage;
        }
    }

    /// Half the difference between the averaged remote and local advantage.
    ///
    /// Negative when this peer is ahead: its magnitude is how many frames to
    /// wait so both peers meet in the middle.
    #[must_use]
    pub fn average_frame_advantage(&self) -> i32 {
        let len = self.local.len() as f32;
        let local_avg = self.local.iter().map(|&a| a as f32).sum::<f32>() / len;
        let remote_avg = self.remote.iter().map(|&a| a as f32).sum::<f32>() / len;
        ((remote_avg - local_avg) / 2.0) as i32
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

    fn counters(local: i32, remote: i32, remote_adv: i32) -> FrameCounters {
        let mut c = FrameCounters::new();
        for _ in 0..local {
            c.advance_local();
        }
        if remote >= 0 {
            c.observe_remote(Frame::new(remote));
        }
        c.set_remote_frame_advantage(remote_adv);
        c
    }

    #[test]
    fn initial_state() {
        let c = FrameCounters::new();
        assert_eq!(c.local_frame(), Frame::new(0));
        assert_eq!(c.remote_frame(), Frame::NULL);
        assert_eq!(c.local_frame_advantage(), 1);
        c.check_invariants().unwrap();
    }

    #[test]
    fn advantage_and_delta() {
        let c = counters(10, 6, 0);
        assert_eq!(c.local_frame_advantage(), 4);
        assert_eq!(c.frame_advantage_delta(), 4);

        let c = counters(10, 8, -2);
        assert_eq!(c.local_frame_advantage(), 2);
        assert_eq!(c.frame_advantage_delta(), 4);
    }

    #[test]
    fn observe_remote_is_monotonic() {
        let mut c = FrameCounters::new();
        assert!(c.observe_remote(Frame::new(5)));
        assert!(!c.observe_remote(Frame::new(3)));
        assert_eq!(c.remote_frame(), Frame::new(5));
        assert!(!c.observe_remote(Frame::NULL));
        assert_eq!(c.remote_frame(), Frame::new(5));
    }

    #[test]
    fn window_no_advantage() {
        let mut w = AdvantageWindow::new(30);
        for i in 0..60 {
            w.record(Frame::new(i), 0, 0);
        }
        assert_eq!(w.average_frame_advantage(), 0);
    }

    #[test]
    fn window_local_ahead_recommends_waiting() {
        let mut w = AdvantageWindow::new(30);
        for i in 0..60 {
            w.record(Frame::new(i), 5, -5);
        }
        assert_eq!(w.average_frame_advantage(), -5);
    }

    #[test]
    fn window_partial_fill_is_diluted() {
        let mut w = AdvantageWindow::new(4);
        w.record(Frame::new(0), 8, 0);
        // (0 - 8/4) / 2
        assert_eq!(w.average_frame_advantage(), -1);
    }

    #[test]
    fn window_ignores_null_frame() {
        let mut w = AdvantageWindow::new(4);
        w.record(Frame::NULL, 100, -100);
        assert_eq!(w.average_frame_advantage(), 0);
    }
}
