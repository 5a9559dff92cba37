use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::checksum::ChecksumError;
use crate::codec::CodecError;
use crate::{EntityId, Frame, PhaseClock};

/// One of the three independently indexed tracks of the input ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputTrack {
    /// Inputs produced on this peer.
    Local,
    /// Inputs received from the remote peer.
    RemoteConfirmed,
    /// Predictions substituted for remote inputs that had not arrived yet.
    RemoteGuessed,
}

impl Display for InputTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputTrack::Local => write!(f, "local"),
            InputTrack::RemoteConfirmed => write!(f, "remote-confirmed"),
            InputTrack::RemoteGuessed => write!(f, "remote-guessed"),
        }
    }
}

/// Why a snapshot could not be restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotMissingReason {
    /// The frame is further back than the store retains.
    OutsideWindow {
        /// Newest frame captured for the entity.
        newest: Frame,
        /// Number of frames the store retains.
        capacity: usize,
    },
    /// Nothing was ever captured for this frame.
    NeverCaptured,
    /// The slot now holds a different frame.
    Overwritten {
        /// Frame currently stored in the slot.
        stored: Frame,
    },
}

impl Display for SnapshotMissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotMissingReason::OutsideWindow { newest, capacity } => write!(
                f,
                "outside the retained window of {capacity} frames (newest {newest})"
            ),
            SnapshotMissingReason::NeverCaptured => write!(f, "never captured"),
            SnapshotMissingReason::Overwritten { stored } => {
                write!(f, "slot overwritten by frame {stored}")
            },
        }
    }
}

/// Every error this library returns.
///
/// [`is_fatal`](SyncError::is_fatal) separates broken contracts (the session
/// cannot continue deterministically) from rejected requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A ledger slot was written twice.
    DuplicateWrite {
        /// Track that was written.
        track: InputTrack,
        /// Frame that already held a value.
        frame: Frame,
    },
    /// A ledger write or read referred to a frame the ring no longer (or not
    /// yet) covers.
    FrameOutsideWindow {
        /// Track that was accessed.
        track: InputTrack,
        /// The offending frame.
        frame: Frame,
        /// Frame currently occupying the slot.
        occupant: Frame,
    },
    /// A frame argument was negative or otherwise unusable.
    InvalidFrame {
        /// The offending frame.
        frame: Frame,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A rollback needed a snapshot that is not available.
    SnapshotMissing {
        /// Entity whose snapshot was requested.
        entity: EntityId,
        /// Requested frame.
        frame: Frame,
        /// Why it is unavailable.
        reason: SnapshotMissingReason,
    },
    /// A restored state lost its phase clock: its serialization is incomplete.
    IncompleteSnapshot {
        /// Entity whose snapshot was restored.
        entity: EntityId,
        /// Restored frame.
        frame: Frame,
        /// Clock recorded at capture time.
        captured: PhaseClock,
        /// Clock found in the decoded state.
        restored: PhaseClock,
    },
    /// The entity was never registered.
    UnknownEntity {
        /// The unknown entity.
        entity: EntityId,
    },
    /// Configuration rejected by validation.
    InvalidConfig {
        /// What is wrong with it.
        info: String,
    },
    /// Encoding or decoding failed.
    Serialization {
        /// The underlying failure.
        context: String,
    },
    /// A bug in this crate.
    InternalError {
        /// What went wrong.
        context: String,
    },
}

impl SyncError {
    /// `true` for errors after which the session cannot continue
    /// deterministically.
    ///
    /// ```
    /// use rollback_sync::{Frame, InputTrack, SyncError};
    ///
    /// let dup = SyncError::DuplicateWrite { track: InputTrack::Local, frame: Frame::new(4) };
    /// assert!(dup.is_fatal());
    /// let cfg = SyncError::InvalidConfig { info: "zero window".into() };
    /// assert!(!cfg.is_fatal());
    /// ```
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateWrite { .. }
                | SyncError::SnapshotMissing { .. }
                | SyncError::IncompleteSnapshot { .. }
                | SyncError::InternalError { .. }
        )
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::DuplicateWrite { track, frame } => {
                write!(f, "{track} input for frame {frame} was already written")
            },
            SyncError::FrameOutsideWindow {
                track,
                frame,
                occupant,
            } => write!(
                f,
                "frame {frame} is outside the {track} input window (slot holds frame {occupant})"
            ),
            SyncError::InvalidFrame { frame, reason } => {
                write!(f, "invalid frame {frame}: {reason}")
            },
            SyncError::SnapshotMissing {
                entity,
                frame,
                reason,
            } => write!(f, "no snapshot of {entity} at frame {frame}: {reason}"),
            SyncError::IncompleteSnapshot {
                entity,
                frame,
                captured,
                restored,
            } => write!(
                f,
                "snapshot of {entity} at frame {frame} is incomplete: captured phase clock \
                 {captured:?}, restored {restored:?}"
            ),
            SyncError::UnknownEntity { entity } => write!(f, "{entity} is not registered"),
            SyncError::InvalidConfig { info } => write!(f, "invalid configuration: {info}"),
            SyncError::Serialization { context } => write!(f, "serialization error: {context}"),
            SyncError::InternalError { context } => {
                write!(f, "internal error (please report as bug): {context}")
            },
        }
    }
}

impl Error for SyncError {}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        SyncError::Serialization {
            context: err.to_string(),
        }
    }
}

impl From<ChecksumError> for SyncError {
    fn from(err: ChecksumError) -> Self {
        SyncError::Serialization {
            context: err.to_string(),
        }
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
    use crate::codec::CodecOperation;

    #[test]
    fn fatal_classification() {
        let entity = EntityId::new(1);
        let frame = Frame::new(3);
        assert!(SyncError::SnapshotMissing {
            entity,
            frame,
            reason: SnapshotMissingReason::NeverCaptured
        }
        .is_fatal());
        assert!(SyncError::IncompleteSnapshot {
            entity,
            frame,
            captured: PhaseClock::new(1, 4),
            restored: PhaseClock::new(1, 0),
        }
        .is_fatal());
        assert!(!SyncError::UnknownEntity { entity }.is_fatal());
        assert!(!SyncError::InvalidFrame {
            frame: Frame::NULL,
            reason: "negative"
        }
        .is_fatal());
        assert!(!SyncError::FrameOutsideWindow {
            track: InputTrack::RemoteConfirmed,
            frame,
            occupant: Frame::new(131),
        }
        .is_fatal());
    }

    #[test]
    fn display_mentions_track_and_frame() {
        let err = SyncError::DuplicateWrite {
            track: InputTrack::RemoteConfirmed,
            frame: Frame::new(12),
        };
        assert_eq!(
            err.to_string(),
            "remote-confirmed input for frame 12 was already written"
        );
    }

    #[test]
    fn snapshot_missing_display() {
        let err = SyncError::SnapshotMissing {
            entity: EntityId::new(2),
            frame: Frame::new(5),
            reason: SnapshotMissingReason::Overwritten {
                stored: Frame::new(1005),
            },
        };
        assert_eq!(
            err.to_string(),
            "no snapshot of entity#2 at frame 5: slot overwritten by frame 1005"
        );
    }

    #[test]
    fn codec_error_converts_to_serialization() {
        let err: SyncError = CodecError::decode("eof", CodecOperation::DecodePacket).into();
        assert!(matches!(err, SyncError::Serialization { .. }));
        assert!(!err.is_fatal());
    }
}
