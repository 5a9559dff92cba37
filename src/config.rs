//! Tuning knobs for a [`Synchronizer`](crate::Synchronizer).

use crate::error::SyncError;

/// Default advantage delta above which a peer stalls.
pub const DEFAULT_FRAME_ADVANTAGE_LIMIT: i32 = 3;

/// Default number of frames of snapshots retained per entity.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 1000;

/// Default number of frames retained per input ledger track.
pub const DEFAULT_INPUT_WINDOW: usize = 1024;

/// Default number of frames averaged for wait recommendations.
pub const DEFAULT_ADVANTAGE_WINDOW: usize = 30;

/// Minimum number of frames the snapshot ring must hold beyond the advantage
/// limit, so a rollback triggered right at the stall threshold still finds
/// its snapshot.
pub const MIN_ROLLBACK_MARGIN: usize = 8;

/// Configuration of a [`Synchronizer`](crate::Synchronizer).
///
/// ```
/// use rollback_sync::SyncConfig;
///
/// let config = SyncConfig {
///     frame_advantage_limit: 5,
///     ..SyncConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// assert!(SyncConfig::lan().validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "SyncConfig has no effect unless passed to SynchronizerBuilder::with_config"]
pub struct SyncConfig {
    /// A peer stalls while `frame_advantage_delta()` is strictly above this.
    ///
    /// Default: 3
    pub frame_advantage_limit: i32,
    /// Frames of snapshots kept per entity. Bounds the deepest rollback.
    ///
    /// Default: 1000
    pub snapshot_capacity: usize,
    /// Frames kept per input ledger track. Must cover `snapshot_capacity`.
    ///
    /// Default: 1024
    pub input_window: usize,
    /// Frames averaged by the advantage window.
    ///
    /// Default: 30 (half a second at 60 FPS)
    pub advantage_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frame_advantage_limit: DEFAULT_FRAME_ADVANTAGE_LIMIT,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            input_window: DEFAULT_INPUT_WINDOW,
            advantage_window: DEFAULT_ADVANTAGE_WINDOW,
        }
    }
}

impl SyncConfig {
    /// Same as [`SyncConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable low-latency links: tight stall limit, two seconds of history.
    pub fn lan() -> Self {
        Self {
            frame_advantage_limit: 2,
            snapshot_capacity: 120,
            input_window: 128,
            advantage_window: 10,
        }
    }

    /// Long or jittery links: more speculation before stalling, smoother
    /// wait recommendations.
    pub fn high_latency() -> Self {
        Self {
            frame_advantage_limit: 8,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            input_window: DEFAULT_INPUT_WINDOW,
            advantage_window: 60,
        }
    }

    /// Smallest valid footprint. Useful for tests and fuzzing where ring
    /// wraparound should happen quickly.
    pub fn minimal() -> Self {
        Self {
            frame_advantage_limit: DEFAULT_FRAME_ADVANTAGE_LIMIT,
            snapshot_capacity: 16,
            input_window: 16,
            advantage_window: 8,
        }
    }

    /// Checks the relationships between the fields.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidConfig`] describing the first broken rule.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.frame_advantage_limit < 0 {
            return Err(SyncError::InvalidConfig {
                info: format!(
                    "frame_advantage_limit must be non-negative, got {}",
                    self.frame_advantage_limit
                ),
            });
        }
        if self.advantage_window == 0 {
            return Err(SyncError::InvalidConfig {
                info: "advantage_window must be at least 1".to_owned(),
            });
        }
        let required = self.frame_advantage_limit as usize + MIN_ROLLBACK_MARGIN;
        if self.snapshot_capacity < required {
            return Err(SyncError::InvalidConfig {
                info: format!(
                    "snapshot_capacity {} must be at least frame_advantage_limit + {} = {}",
                    self.snapshot_capacity, MIN_ROLLBACK_MARGIN, required
                ),
            });
        }
        if self.input_window < self.snapshot_capacity {
            return Err(SyncError::InvalidConfig {
                info: format!(
                    "input_window {} must cover snapshot_capacity {}",
                    self.input_window, self.snapshot_capacity
                ),
            });
        }
        if i32::try_from(self.input_window).is_err() {
            return Err(SyncError::InvalidConfig {
                info: format!("input_window {} does not fit a frame index", self.input_window),
            });
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

    #[test]
    fn presets_are_valid() {
        for config in [
            SyncConfig::default(),
            SyncConfig::lan(),
            SyncConfig::high_latency(),
            SyncConfig::minimal(),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn default_values() {
        let config = SyncConfig::default();
        assert_eq!(config.frame_advantage_limit, 3);
        assert_eq!(config.snapshot_capacity, 1000);
    }

    #[test]
    fn rejects_negative_limit() {
        let config = SyncConfig {
            frame_advantage_limit: -1,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_capacity_without_margin() {
        let config = SyncConfig {
            frame_advantage_limit: 10,
            snapshot_capacity: 10 + MIN_ROLLBACK_MARGIN - 1,
            input_window: 64,
            advantage_window: 8,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("snapshot_capacity"));
    }

    #[test]
    fn rejects_input_window_smaller_than_snapshots() {
        let config = SyncConfig {
            input_window: 999,
            ..SyncConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("input_window"));
    }

    #[test]
    fn rejects_zero_advantage_window() {
        let config = SyncConfig {
            advantage_window: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
