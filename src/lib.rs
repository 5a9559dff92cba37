//! # rollback-sync
//!
//! A two-peer, lockstep rollback synchronization core for deterministic
//! real-time simulations.
//!
//! Each peer runs its own copy of the same deterministic step function. Local
//! input is known instantly; remote input arrives after a network delay. The
//! [`Synchronizer`] lets a peer guess the remote input, keep simulating, detect
//! the moment a guess is proven wrong and replay exactly the affected span of
//! frames, so the outcome is identical to what would have happened had the real
//! input been known all along.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        One tick                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ 1. record local input     ──►  InputLedger (Local)           │
//! │ 2. drain RemoteInbox      ──►  InputLedger (RemoteConfirmed) │
//! │ 3. recompute sync point   ──►  SyncPoint                     │
//! │ 4. gate open?             ──►  restore + replay + recapture  │
//! │ 5. stall?                 ──►  skip advancing this tick      │
//! │ 6. advance                ──►  resolve remote, step, capture │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core performs no I/O. The caller ships [`RemoteInputPacket`]s over
//! whatever unreliable channel it has and feeds received packets back through a
//! [`RemoteInbox`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use config::SyncConfig;
pub use error::{InputTrack, SnapshotMissingReason, SyncError};
pub use frame_counters::{AdvantageWindow, FrameCounters};
pub use inbox::{RemoteInbox, RemoteInputPacket};
pub use input_ledger::comparison::{InputComparator, PartialEqComparator};
pub use input_ledger::prediction::{BlankPrediction, PredictionStrategy, RepeatLastConfirmed};
pub use input_ledger::InputLedger;
pub use rollback_gate::RollbackGate;
pub use snapshot_store::SnapshotStore;
pub use sync_point::{SyncPoint, SyncPointChange};
pub use synchronizer::builder::SynchronizerBuilder;
pub use synchronizer::stats::{RollbackReport, SyncStats};
pub use synchronizer::{RemoteInputStatus, Synchronizer, TickOutcome, TickReport};

pub mod checksum;
pub mod codec;
pub mod config;
#[doc(hidden)]
pub mod error;
pub mod frame_counters;
pub mod inbox;
pub mod input_ledger;
pub mod rollback_gate;
pub mod snapshot_store;
#[doc(hidden)]
pub mod sync;
pub mod sync_point;
pub mod synchronizer;
pub mod telemetry;

/// Internal module exposing implementation details for testing and fuzzing.
///
/// **This module is NOT part of the public API.** Nothing here is covered by
/// semver guarantees.
#[doc(hidden)]
pub mod __internal {
    pub use crate::input_ledger::TrackRing;
    pub use crate::snapshot_store::Snapshot;
}

// #############
// # CONSTANTS #
// #############

/// Internally, -1 represents no frame / invalid frame.
pub const NULL_FRAME: i32 = -1;

/// A frame is a single step of simulation; one per tick, starting at 0.
///
/// `Frame` is a newtype over `i32`. The special value [`Frame::NULL`] (-1)
/// stands for "no frame": the remote frame before the first confirmed input, or
/// a sync point before anything has been proven.
///
/// # Examples
///
/// ```
/// use rollback_sync::Frame;
///
/// let frame = Frame::new(0);
/// assert!(frame.is_valid());
/// assert!(Frame::NULL.is_null());
///
/// let next = frame + 1;
/// assert_eq!(next - frame, 1);
/// assert!(next > frame);
/// ```
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Frame(i32);

impl Frame {
    /// The null frame constant, equivalent to [`NULL_FRAME`].
    pub const NULL: Frame = Frame(NULL_FRAME);

    /// Creates a new `Frame`. The value is not validated.
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        Frame(frame)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this is [`Frame::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_FRAME
    }

    /// Returns `true` if this frame is non-negative.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Returns `Some(self)` for valid frames and `None` otherwise.
    #[inline]
    #[must_use]
    pub const fn to_option(self) -> Option<Frame> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }

    /// Index of this frame inside a ring buffer of `capacity` slots.
    ///
    /// Returns `None` for negative frames or a zero capacity.
    #[inline]
    #[must_use]
    pub fn ring_index(self, capacity: usize) -> Option<usize> {
        if !self.is_valid() || capacity == 0 {
            return None;
        }
        Some(self.0 as usize % capacity)
    }

    /// The next frame.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Frame {
        Frame(self.0.saturating_add(1))
    }

    /// The previous frame. `Frame::new(0).prev()` is [`Frame::NULL`].
    #[inline]
    #[must_use]
    pub const fn prev(self) -> Frame {
        Frame(self.0.saturating_sub(1))
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_FRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Frame(self.0.saturating_add(rhs))
    }
}

impl std::ops::AddAssign<i32> for Frame {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 = self.0.saturating_add(rhs);
    }
}

impl std::ops::Sub<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Frame(self.0.saturating_sub(rhs))
    }
}

impl std::ops::Sub<Frame> for Frame {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Frame) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<i32> for Frame {
    #[inline]
    fn from(value: i32) -> Self {
        Frame(value)
    }
}

impl From<Frame> for i32 {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

impl PartialEq<i32> for Frame {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Frame {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

/// Identifies one simulated entity whose state is snapshotted and replayed.
///
/// ```
/// use rollback_sync::EntityId;
///
/// let fighter = EntityId::new(1);
/// assert_eq!(fighter.as_u32(), 1);
/// assert_eq!(fighter.to_string(), "entity#1");
/// ```
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EntityId(u32);

impl EntityId {
    /// Creates a new `EntityId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        EntityId(id)
    }

    /// Returns the underlying `u32` value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

impl From<u32> for EntityId {
    #[inline]
    fn from(value: u32) -> Self {
        EntityId(value)
    }
}

/// Elapsed time inside an entity's current logical state.
///
/// Per-tick logic routinely branches on "frames spent in this state" (an
/// attack's active window, a landing lag, a respawn timer). That counter is
/// part of the deterministic state and must survive a snapshot round trip;
/// [`SnapshotStore`] checks this on every restore.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PhaseClock {
    /// Identifier of the logical state the entity is in.
    pub phase: u32,
    /// Frames elapsed since the entity entered `phase`.
    pub frames_in_phase: u32,
}

impl PhaseClock {
    /// Creates a clock for `phase` with `frames_in_phase` elapsed.
    #[must_use]
    pub const fn new(phase: u32, frames_in_phase: u32) -> Self {
        Self {
            phase,
            frames_in_phase,
        }
    }

    /// Returns the clock one frame later in the same phase.
    #[must_use]
    pub const fn tick(self) -> Self {
        Self {
            phase: self.phase,
            frames_in_phase: self.frames_in_phase.saturating_add(1),
        }
    }

    /// Returns a clock that just entered `phase`.
    #[must_use]
    pub const fn enter(phase: u32) -> Self {
        Self {
            phase,
            frames_in_phase: 0,
        }
    }
}

// #############
// #  TRAITS   #
// #############

/// State that can be captured into and restored from a snapshot.
///
/// The serialized form must contain every field that influences future steps.
/// [`phase_clock`](RollbackState::phase_clock) makes the most commonly
/// forgotten one explicit: the snapshot store records it at capture time and
/// refuses a restore whose decoded clock differs.
pub trait RollbackState: Serialize + DeserializeOwned {
    /// The elapsed-time-in-state counter of this entity.
    fn phase_clock(&self) -> PhaseClock;
}

/// Compile time parameterization for a [`Synchronizer`].
///
/// Bundles the generic types on one marker struct.
///
/// ```
/// use rollback_sync::{Config, PhaseClock, RollbackState};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// struct Pad { buttons: u8 }
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Fighter { x: i32, clock: PhaseClock }
///
/// impl RollbackState for Fighter {
///     fn phase_clock(&self) -> PhaseClock { self.clock }
/// }
///
/// struct Duel;
///
/// impl Config for Duel {
///     type Input = Pad;
///     type State = Fighter;
/// }
/// ```
pub trait Config: 'static {
    /// The input payload exchanged between peers. Opaque to the core.
    type Input: Clone + Debug + Serialize + DeserializeOwned;

    /// The per-entity simulation state.
    type State: RollbackState + Clone;
}

/// The caller's deterministic simulation step for one entity and one frame.
///
/// Must be a pure function of its arguments: replays call it again with the
/// same arguments and expect the same result.
///
/// Any `Fn(&State, &Input, &Input) -> State` closure implements this trait.
pub trait StepFunction<C: Config>: Send + Sync {
    /// Advances `state` by one frame with the local and remote input.
    fn step(&self, state: &C::State, local: &C::Input, remote: &C::Input) -> C::State;
}

impl<C, F> StepFunction<C> for F
where
    C: Config,
    F: Fn(&C::State, &C::Input, &C::Input) -> C::State + Send + Sync,
{
    fn step(&self, state: &C::State, local: &C::Input, remote: &C::Input) -> C::State {
        self(state, local, remote)
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
    fn frame_null_and_valid() {
        assert!(Frame::NULL.is_null());
        assert!(!Frame::NULL.is_valid());
        assert!(Frame::new(0).is_valid());
        assert_eq!(Frame::new(0).prev(), Frame::NULL);
        assert_eq!(Frame::NULL.next(), Frame::new(0));
    }

    #[test]
    fn frame_ring_index_wraps() {
        assert_eq!(Frame::new(0).ring_index(4), Some(0));
        assert_eq!(Frame::new(5).ring_index(4), Some(1));
        assert_eq!(Frame::new(1_000_000).ring_index(1000), Some(0));
        assert_eq!(Frame::NULL.ring_index(4), None);
        assert_eq!(Frame::new(3).ring_index(0), None);
    }

    #[test]
    fn frame_arithmetic() {
        let mut f = Frame::new(10);
        f += 2;
        assert_eq!(f, 12);
        assert_eq!(f - Frame::new(6), 6);
        assert_eq!(f - 12, Frame::new(0));
        assert!(f > 11);
    }

    #[test]
    fn frame_arithmetic_saturates() {
        let mut top = Frame::new(i32::MAX);
        top += 1;
        assert_eq!(top, Frame::new(i32::MAX));
        assert_eq!(Frame::new(i32::MAX) + 5, Frame::new(i32::MAX));
        assert_eq!(Frame::new(i32::MIN) - 1, Frame::new(i32::MIN));
        assert_eq!(Frame::new(i32::MIN) - Frame::new(1), i32::MIN);
        assert_eq!(Frame::new(i32::MAX).next(), Frame::new(i32::MAX));
    }

    #[test]
    fn frame_display() {
        assert_eq!(Frame::NULL.to_string(), "NULL_FRAME");
        assert_eq!(Frame::new(42).to_string(), "42");
    }

    #[test]
    fn frame_to_option() {
        assert_eq!(Frame::new(3).to_option(), Some(Frame::new(3)));
        assert_eq!(Frame::NULL.to_option(), None);
    }

    #[test]
    fn phase_clock_tick_and_enter() {
        let clock = PhaseClock::enter(7);
        assert_eq!(clock.frames_in_phase, 0);
        let later = clock.tick().tick();
        assert_eq!(later, PhaseClock::new(7, 2));
    }

    #[test]
    fn entity_id_ordering_is_numeric() {
        let mut ids = vec![EntityId::new(3), EntityId::new(1), EntityId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![EntityId::new(1), EntityId::new(2), EntityId::new(3)]);
    }
}
