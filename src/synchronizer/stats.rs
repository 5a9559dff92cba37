//! Counters describing what a synchronizer has been doing.

use crate::Frame;

/// Summary of one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackReport {
    /// Frame whose snapshot the entities were restored to (the sync frame).
    pub restored_frame: Frame,
    /// Local frame at the time of the rollback; replay stopped just before it.
    pub resumed_frame: Frame,
    /// Number of frames stepped again.
    pub frames_resimulated: u32,
    /// Replayed frames whose remote input differed from the previous guess.
    pub corrected_frames: u32,
}

impl RollbackReport {
    /// `true` if the replay changed no remote input.
    ///
    /// Happens when the rollback was triggered by a frame that is still
    /// unconfirmed rather than by a wrong guess.
    #[must_use]
    pub fn was_conservative(&self) -> bool {
        self.corrected_frames == 0
    }
}

/// Running totals since the synchronizer was built.
///
/// ```
/// use rollback_sync::SyncStats;
///
/// let stats = SyncStats::default();
/// assert_eq!(stats.rollbacks, 0);
/// assert_eq!(stats.misprediction_rate(), 0.0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames simulated for the first time.
    pub frames_advanced: u64,
    /// Ticks that stalled instead of advancing.
    pub stalls: u64,
    /// Rollbacks performed.
    pub rollbacks: u64,
    /// Frames stepped again across all rollbacks.
    pub frames_resimulated: u64,
    /// Deepest single rollback, in frames.
    pub deepest_rollback: u32,
    /// Remote inputs that had to be predicted.
    pub predictions: u64,
    /// Predictions that later turned out wrong.
    pub mispredicted_frames: u64,
    /// Remote packets for frames that were already confirmed.
    pub duplicate_packets: u64,
}

impl SyncStats {
    /// Fraction of predictions that were wrong.
    #[must_use]
    pub fn misprediction_rate(&self) -> f64 {
        if self.predictions == 0 {
            return 0.0;
        }
        self.mispredicted_frames as f64 / self.predictions as f64
    }

    pub(crate) fn record_rollback(&mut self, report: &RollbackReport) {
        self.rollbacks += 1;
        self.frames_resimulated += u64::from(report.frames_resimulated);
        self.mispredicted_frames += u64::from(report.corrected_frames);
        self.deepest_rollback = self.deepest_rollback.max(report.frames_resimulated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rollback_accumulates() {
        let mut stats = SyncStats {
            predictions: 10,
            ..SyncStats::default()
        };
        stats.record_rollback(&RollbackReport {
            restored_frame: Frame::new(4),
            resumed_frame: Frame::new(9),
            frames_resimulated: 4,
            corrected_frames: 2,
        });
        stats.record_rollback(&RollbackReport {
            restored_frame: Frame::new(9),
            resumed_frame: Frame::new(11),
            frames_resimulated: 1,
            corrected_frames: 0,
        });
        assert_eq!(stats.rollbacks, 2);
        assert_eq!(stats.frames_resimulated, 5);
        assert_eq!(stats.deepest_rollback, 4);
        assert!((stats.misprediction_rate() - 0.2).abs() < f64::EPSILON);
    }
}
