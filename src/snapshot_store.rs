//! Per-entity ring of encoded states, one slot per frame.
//!
//! The snapshot at frame `f` is the state *after* simulating `f`. Each entity
//! also keeps the state it was registered with, which [`SnapshotStore::restore`]
//! returns for [`Frame::NULL`]: rolling back to "before frame 0".

use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::checksum::fnv1a;
use crate::codec::{decode_value, encode, CodecOperation};
use crate::error::{SnapshotMissingReason, SyncError};
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{EntityId, Frame, PhaseClock, RollbackState};

/// One encoded entity state.
///
/// # Note
///
/// This type is re-exported in [`__internal`](crate::__internal) for testing and fuzzing.
/// It is not part of the stable public API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    frame: Frame,
    bytes: Vec<u8>,
    checksum: u64,
    clock: PhaseClock,
}

impl Snapshot {
    /// Encodes `state` as captured at `frame`.
    pub fn capture<S: RollbackState>(frame: Frame, state: &S) -> Result<Self, SyncError> {
        let bytes = encode(state).map_err(|e| e.during(CodecOperation::EncodeSnapshot))?;
        Ok(Self {
            frame,
            checksum: fnv1a(&bytes),
            bytes,
            clock: state.phase_clock(),
        })
    }

    /// Frame this snapshot was captured at.
    #[must_use]
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// FNV-1a of the encoded bytes.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// The phase clock the state reported when captured.
    #[must_use]
    pub fn clock(&self) -> PhaseClock {
        self.clock
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for a zero-length encoding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the state and verifies its phase clock survived.
    pub fn decode<S: RollbackState>(&self, entity: EntityId) -> Result<S, SyncError> {
        let state: S =
            decode_value(&self.bytes).map_err(|e| e.during(CodecOperation::DecodeSnapshot))?;
        let restored = state.phase_clock();
        if restored != self.clock {
            return Err(SyncError::IncompleteSnapshot {
                entity,
                frame: self.frame,
                captured: self.clock,
                restored,
            });
        }
        Ok(state)
    }
}

#[derive(Debug, Clone)]
struct EntityRing {
    initial: Snapshot,
    slots: Vec<Option<Snapshot>>,
    newest: Frame,
}

impl EntityRing {
    fn new(initial: Snapshot, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            initial,
            slots,
            newest: Frame::NULL,
        }
    }

    fn oldest_retained(&self) -> Frame {
        let span = i32::try_from(self.slots.len()).unwrap_or(i32::MAX);
        Frame::new(self.newest.as_i32().saturating_sub(span - 1).max(0))
    }

    fn lookup(&self, frame: Frame) -> Result<&Snapshot, SnapshotMissingReason> {
        if frame.is_null() {
            return Ok(&self.initial);
        }
        if frame > self.newest {
            return Err(SnapshotMissingReason::NeverCaptured);
        }
        let slot = frame
            .ring_index(self.slots.len())
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref);
        match slot {
            Some(snapshot) if snapshot.frame == frame => Ok(snapshot),
            Some(snapshot) if snapshot.frame > frame => Err(SnapshotMissingReason::Overwritten {
                stored: snapshot.frame,
            }),
            _ if frame < self.oldest_retained() => Err(SnapshotMissingReason::OutsideWindow {
                newest: self.newest,
                capacity: self.slots.len(),
            }),
            _ => Err(SnapshotMissingReason::NeverCaptured),
        }
    }
}

/// Snapshots of every registered entity for the last `capacity` frames.
///
/// ```
/// use rollback_sync::{EntityId, Frame, PhaseClock, RollbackState, SnapshotStore};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// struct Ball { y: i32, clock: PhaseClock }
///
/// impl RollbackState for Ball {
///     fn phase_clock(&self) -> PhaseClock { self.clock }
/// }
///
/// let ball = EntityId::new(0);
/// let mut store = SnapshotStore::new(8);
/// store.register(ball, &Ball { y: 0, clock: PhaseClock::default() }).unwrap();
///
/// let falling = Ball { y: -3, clock: PhaseClock::new(1, 2) };
/// store.capture(Frame::new(0), ball, &falling).unwrap();
/// assert_eq!(store.restore(Frame::new(0), ball).unwrap(), falling);
/// assert_eq!(store.restore(Frame::NULL, ball).unwrap().y, 0);
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotStore<S> {
    capacity: usize,
    entities: BTreeMap<EntityId, EntityRing>,
    _state: PhantomData<fn() -> S>,
}

impl<S: RollbackState> SnapshotStore<S> {
    /// Creates a store retaining `capacity` frames (at least one) per entity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entities: BTreeMap::new(),
            _state: PhantomData,
        }
    }

    /// Frames retained per entity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers `entity` with its state before frame 0. Registering an
    /// entity again replaces its initial state and drops its snapshots.
    ///
    /// # Errors
    ///
    /// [`SyncError::Serialization`] if the state cannot be encoded.
    pub fn register(&mut self, entity: EntityId, initial: &S) -> Result<(), SyncError> {
        let snapshot = Snapshot::capture(Frame::NULL, initial)?;
        self.entities
            .insert(entity, EntityRing::new(snapshot, self.capacity));
        Ok(())
    }

    /// `true` if `entity` is registered.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Registered entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// `true` if no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Encodes `state` into slot `frame % capacity`, overwriting what was
    /// there. Returns the snapshot checksum.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidFrame`] for negative frames.
    /// - [`SyncError::UnknownEntity`] for unregistered entities.
    /// - [`SyncError::Serialization`] if encoding fails.
    pub fn capture(&mut self, frame: Frame, entity: EntityId, state: &S) -> Result<u64, SyncError> {
        let capacity = self.capacity;
        let ring = self
            .entities
            .get_mut(&entity)
            .ok_or(SyncError::UnknownEntity { entity })?;
        let index = frame.ring_index(capacity).ok_or(SyncError::InvalidFrame {
            frame,
            reason: "snapshots are captured for non-negative frames",
        })?;
        let snapshot = Snapshot::capture(frame, state)?;
        let checksum = snapshot.checksum;
        let slot = ring
            .slots
            .get_mut(index)
            .ok_or_else(|| SyncError::InternalError {
                context: format!("snapshot index {index} out of bounds for capacity {capacity}"),
            })?;
        *slot = Some(snapshot);
        ring.newest = ring.newest.max(frame);
        Ok(checksum)
    }

    /// Decodes the state of `entity` at `frame`. [`Frame::NULL`] yields the
    /// registered initial state.
    ///
    /// # Errors
    ///
    /// - [`SyncError::SnapshotMissing`] if the frame is outside the window,
    ///   was never captured, or its slot was overwritten.
    /// - [`SyncError::IncompleteSnapshot`] if the decoded phase clock differs
    ///   from the one recorded at capture time.
    /// - [`SyncError::UnknownEntity`], [`SyncError::InvalidFrame`],
    ///   [`SyncError::Serialization`].
    pub fn restore(&self, frame: Frame, entity: EntityId) -> Result<S, SyncError> {
        self.snapshot(frame, entity)?.decode(entity)
    }

    /// Stored checksum of `entity` at `frame`, if retained.
    #[must_use]
    pub fn checksum(&self, frame: Frame, entity: EntityId) -> Option<u64> {
        self.snapshot(frame, entity).ok().map(Snapshot::checksum)
    }

    /// Newest frame captured for `entity`.
    #[must_use]
    pub fn newest(&self, entity: EntityId) -> Option<Frame> {
        self.entities.get(&entity).map(|ring| ring.newest)
    }

    /// The raw snapshot of `entity` at `frame`.
    ///
    /// # Errors
    ///
    /// As [`restore`](Self::restore), minus decoding errors.
    pub fn snapshot(&self, frame: Frame, entity: EntityId) -> Result<&Snapshot, SyncError> {
        if frame < Frame::NULL {
            return Err(SyncError::InvalidFrame {
                frame,
                reason: "snapshots exist for non-negative frames and NULL",
            });
        }
        let ring = self
            .entities
            .get(&entity)
            .ok_or(SyncError::UnknownEntity { entity })?;
        ring.lookup(frame)
            .map_err(|reason| SyncError::SnapshotMissing {
                entity,
                frame,
                reason,
            })
    }
}

impl<S> InvariantChecker for SnapshotStore<S> {
    /// Every stored snapshot sits in its own slot, is no newer than the
    /// entity's newest frame and has a checksum matching its bytes.
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (entity, ring) in &self.entities {
            if ring.slots.len() != self.capacity {
                return Err(InvariantViolation::new("SnapshotStore", "ring size mismatch")
                    .with_details(format!("{entity}: {} slots", ring.slots.len())));
            }
            for (index, snapshot) in ring
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
            {
                if snapshot.frame.ring_index(self.capacity) != Some(index)
                    || snapshot.frame > ring.newest
                {
                    return Err(
                        InvariantViolation::new("SnapshotStore", "snapshot in wrong slot")
                            .with_details(format!(
                                "{entity}: frame={} slot={index} newest={}",
                                snapshot.frame, ring.newest
                            )),
                    );
                }
                if fnv1a(&snapshot.bytes) != snapshot.checksum {
                    return Err(
                        InvariantViolation::new("SnapshotStore", "checksum does not match bytes")
                            .with_details(format!("{entity}: frame={}", snapshot.frame)),
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
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Mover {
        x: i32,
        clock: PhaseClock,
    }

    impl RollbackState for Mover {
        fn phase_clock(&self) -> PhaseClock {
            self.clock
        }
    }

    /// Forgets its clock when serialized.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Forgetful {
        x: i32,
        #[serde(skip)]
        clock: PhaseClock,
    }

    impl RollbackState for Forgetful {
        fn phase_clock(&self) -> PhaseClock {
            self.clock
        }
    }

    const A: EntityId = EntityId::new(1);
    const B: EntityId = EntityId::new(2);

    fn mover(x: i32) -> Mover {
        Mover {
            x,
            clock: PhaseClock::new(0, x as u32),
        }
    }

    fn store(capacity: usize) -> SnapshotStore<Mover> {
        let mut store = SnapshotStore::new(capacity);
        store.register(A, &mover(0)).unwrap();
        store.register(B, &mover(100)).unwrap();
        store
    }

    #[test]
    fn capture_then_restore() {
        let mut store = store(4);
        store.capture(Frame::new(0), A, &mover(1)).unwrap();
        store.capture(Frame::new(0), B, &mover(101)).unwrap();
        assert_eq!(store.restore(Frame::new(0), A).unwrap(), mover(1));
        assert_eq!(store.restore(Frame::new(0), B).unwrap(), mover(101));
    }

    #[test]
    fn null_frame_restores_initial_state() {
        let mut store = store(4);
        store.capture(Frame::new(0), A, &mover(5)).unwrap();
        assert_eq!(store.restore(Frame::NULL, A).unwrap(), mover(0));
        assert_eq!(store.restore(Frame::NULL, B).unwrap(), mover(100));
    }

    #[test]
    fn recapture_overwrites_in_place() {
        let mut store = store(4);
        store.capture(Frame::new(2), A, &mover(2)).unwrap();
        store.capture(Frame::new(2), A, &mover(20)).unwrap();
        assert_eq!(store.restore(Frame::new(2), A).unwrap(), mover(20));
    }

    #[test]
    fn frame_never_captured() {
        let mut store = store(4);
        store.capture(Frame::new(3), A, &mover(3)).unwrap();
        assert_eq!(
            store.restore(Frame::new(1), A).unwrap_err(),
            SyncError::SnapshotMissing {
                entity: A,
                frame: Frame::new(1),
                reason: SnapshotMissingReason::NeverCaptured,
            }
        );
        assert!(matches!(
            store.restore(Frame::new(9), A),
            Err(SyncError::SnapshotMissing {
                reason: SnapshotMissingReason::NeverCaptured,
                ..
            })
        ));
    }

    #[test]
    fn wrapped_frame_reports_overwritten() {
        let mut store = store(4);
        for n in 0..10 {
            store.capture(Frame::new(n), A, &mover(n)).unwrap();
        }
        assert_eq!(
            store.restore(Frame::new(5), A).unwrap_err(),
            SyncError::SnapshotMissing {
                entity: A,
                frame: Frame::new(5),
                reason: SnapshotMissingReason::Overwritten {
                    stored: Frame::new(9)
                },
            }
        );
        assert_eq!(store.restore(Frame::new(6), A).unwrap(), mover(6));
    }

    #[test]
    fn empty_slot_behind_window_is_outside_window() {
        let mut store = store(4);
        store.capture(Frame::new(5), A, &mover(5)).unwrap();
        assert!(matches!(
            store.restore(Frame::new(0), A),
            Err(SyncError::SnapshotMissing {
                reason: SnapshotMissingReason::OutsideWindow { capacity: 4, .. },
                ..
            })
        ));
        assert!(matches!(
            store.restore(Frame::new(4), A),
            Err(SyncError::SnapshotMissing {
                reason: SnapshotMissingReason::NeverCaptured,
                ..
            })
        ));
    }

    #[test]
    fn lost_phase_clock_is_incomplete() {
        let entity = EntityId::new(7);
        let mut store = SnapshotStore::new(4);
        let state = Forgetful {
            x: 3,
            clock: PhaseClock::new(2, 9),
        };
        store
            .register(
                entity,
                &Forgetful {
                    x: 0,
                    clock: PhaseClock::default(),
                },
            )
            .unwrap();
        store.capture(Frame::new(0), entity, &state).unwrap();
        let err = store.restore(Frame::new(0), entity).unwrap_err();
        assert_eq!(
            err,
            SyncError::IncompleteSnapshot {
                entity,
                frame: Frame::new(0),
                captured: PhaseClock::new(2, 9),
                restored: PhaseClock::default(),
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_entity_and_invalid_frame() {
        let mut store = store(4);
        let ghost = EntityId::new(99);
        assert_eq!(
            store.capture(Frame::new(0), ghost, &mover(0)).unwrap_err(),
            SyncError::UnknownEntity { entity: ghost }
        );
        assert!(matches!(
            store.capture(Frame::NULL, A, &mover(0)),
            Err(SyncError::InvalidFrame { .. })
        ));
        assert!(matches!(
            store.restore(Frame::new(-2), A),
            Err(SyncError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn checksums_are_deterministic() {
        let mut one = store(4);
        let mut two = store(4);
        let c1 = one.capture(Frame::new(0), A, &mover(42)).unwrap();
        let c2 = two.capture(Frame::new(0), A, &mover(42)).unwrap();
        assert_eq!(c1, c2);
        assert_eq!(one.checksum(Frame::new(0), A), Some(c1));
        let c3 = one.capture(Frame::new(1), A, &mover(43)).unwrap();
        assert_ne!(c1, c3);
        assert_eq!(one.checksum(Frame::new(5), A), None);
    }

    #[test]
    fn entities_iterate_in_id_order() {
        let mut store: SnapshotStore<Mover> = SnapshotStore::new(2);
        store.register(EntityId::new(9), &mover(0)).unwrap();
        store.register(EntityId::new(3), &mover(0)).unwrap();
        let ids: Vec<_> = store.entities().collect();
        assert_eq!(ids, vec![EntityId::new(3), EntityId::new(9)]);
    }

    #[test]
    fn invariants_hold_after_wraparound() {
        let mut store = store(3);
        for n in 0..10 {
            store.capture(Frame::new(n), A, &mover(n)).unwrap();
        }
        store.check_invariants().unwrap();
    }
}
