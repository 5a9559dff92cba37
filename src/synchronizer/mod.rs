//! The per-peer facade tying ledger, counters, sync point, gate and snapshot
//! store together.
//!
//! A [`Synchronizer`] is built with [`SynchronizerBuilder`](builder::SynchronizerBuilder)
//! and driven once per frame with [`Synchronizer::tick`]. Each tick:
//!
//! 1. records the local input for `local_frame`, unless a stalled tick already
//!    recorded one,
//! 2. drains the [`RemoteInbox`] into the ledger,
//! 3. recomputes the sync point and replays from it if the gate is open,
//! 4. stalls if this peer is too far ahead, otherwise steps every entity one
//!    frame with the confirmed or predicted remote input.
//!
//! The individual operations are public as well for callers that want to run
//! the steps themselves.

pub mod builder;
pub mod stats;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::checksum::compute_checksum;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::frame_counters::{AdvantageWindow, FrameCounters};
use crate::inbox::{RemoteInbox, RemoteInputPacket};
use crate::input_ledger::comparison::InputComparator;
use crate::input_ledger::prediction::PredictionStrategy;
use crate::input_ledger::InputLedger;
use crate::{debug_check_invariants, report_violation_to};
use crate::rollback_gate::RollbackGate;
use crate::snapshot_store::SnapshotStore;
use crate::sync_point::{SyncPoint, SyncPointChange};
use crate::telemetry::{
    InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::{Config, EntityId, Frame, StepFunction};

use stats::{RollbackReport, SyncStats};

/// Factory for the input that means "nothing pressed".
pub(crate) type NeutralInput<I> = Box<dyn Fn() -> I + Send + Sync>;

/// Where the remote input used for an advanced frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInputStatus {
    /// The remote peer's input for the frame had already arrived.
    Confirmed,
    /// The input was predicted and may cause a rollback later.
    Predicted,
}

/// What one [`Synchronizer::tick`] did with the local frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// `frame` was simulated and `local_frame` is now `frame + 1`.
    Advanced {
        /// The frame that was simulated.
        frame: Frame,
        /// Source of the remote input used for it.
        remote_status: RemoteInputStatus,
    },
    /// This peer is too far ahead; nothing was simulated.
    Stalled {
        /// `local_frame_advantage - remote_frame_advantage` at the time.
        delta: i32,
    },
}

/// Result of one [`Synchronizer::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport<I> {
    /// Advanced or stalled.
    pub outcome: TickOutcome,
    /// Present if the tick replayed frames.
    pub rollback: Option<RollbackReport>,
    /// The local input of this tick's frame, ready for the transport.
    pub outbound: RemoteInputPacket<I>,
}

impl<I> TickReport<I> {
    /// `true` if the tick simulated a frame.
    #[must_use]
    pub fn advanced(&self) -> bool {
        matches!(self.outcome, TickOutcome::Advanced { .. })
    }
}

/// One peer's rollback synchronization state.
///
/// Owns the input ledger, the frame counters, the sync point and the snapshot
/// store, plus the live state of every registered entity. All mutation
/// happens through `&mut self` on the tick thread; remote packets received on
/// other threads go through the [`RemoteInbox`] returned by
/// [`inbox`](Self::inbox).
///
/// ```
/// use rollback_sync::{Config, EntityId, PhaseClock, RollbackState, SynchronizerBuilder};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Counter { total: u32, clock: PhaseClock }
///
/// impl RollbackState for Counter {
///     fn phase_clock(&self) -> PhaseClock { self.clock }
/// }
///
/// struct Sum;
/// impl Config for Sum {
///     type Input = u8;
///     type State = Counter;
/// }
///
/// let mut peer = SynchronizerBuilder::<Sum>::new()
///     .with_entity(EntityId::new(0), Counter { total: 0, clock: PhaseClock::default() })
///     .with_step_function(|s: &Counter, local: &u8, remote: &u8| Counter {
///         total: s.total + u32::from(*local) + u32::from(*remote),
///         clock: s.clock.tick(),
///     })
///     .with_neutral_input(|| 0u8)
///     .with_partial_eq_comparator()
///     .build()
///     .unwrap();
///
/// let report = peer.tick(2).unwrap();
/// assert!(report.advanced());
/// assert_eq!(peer.entity_state(EntityId::new(0)).unwrap().total, 2);
/// ```
pub struct Synchronizer<C: Config> {
    config: SyncConfig,
    ledger: InputLedger<C::Input>,
    counters: FrameCounters,
    sync_point: SyncPoint,
    snapshots: SnapshotStore<C::State>,
    live: BTreeMap<EntityId, C::State>,
    advantage: AdvantageWindow,
    step: Box<dyn StepFunction<C>>,
    neutral: NeutralInput<C::Input>,
    prediction: Box<dyn PredictionStrategy<C::Input>>,
    comparator: Box<dyn InputComparator<C::Input>>,
    observer: Option<Arc<dyn ViolationObserver>>,
    inbox: RemoteInbox<C::Input>,
    stats: SyncStats,
}

impl<C: Config> Synchronizer<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SyncConfig,
        snapshots: SnapshotStore<C::State>,
        live: BTreeMap<EntityId, C::State>,
        step: Box<dyn StepFunction<C>>,
        neutral: NeutralInput<C::Input>,
        prediction: Box<dyn PredictionStrategy<C::Input>>,
        comparator: Box<dyn InputComparator<C::Input>>,
        observer: Option<Arc<dyn ViolationObserver>>,
        inbox: RemoteInbox<C::Input>,
    ) -> Self {
        Self {
            ledger: InputLedger::new(config.input_window),
            counters: FrameCounters::new(),
            sync_point: SyncPoint::new(),
            advantage: AdvantageWindow::new(config.advantage_window),
            stats: SyncStats::default(),
            config,
            snapshots,
            live,
            step,
            neutral,
            prediction,
            comparator,
            observer,
            inbox,
        }
    }

    // #############
    // #  INPUTS   #
    // #############

    /// Stores the authoritative local input for `frame`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::DuplicateWrite`] if `frame` already has a local input.
    ///   Fatal; also reported as a critical violation.
    /// - [`SyncError::InvalidFrame`], [`SyncError::FrameOutsideWindow`].
    pub fn record_local_input(&mut self, input: C::Input, frame: Frame) -> Result<(), SyncError> {
        self.ledger
            .store_local(input, frame)
            .map_err(|err| self.escalate(err))
    }

    /// Applies one packet from the remote peer.
    ///
    /// A packet for an already-confirmed frame is absorbed; if its input
    /// differs from the stored one a critical violation is reported. The
    /// packet's frame advantage is only taken from the newest remote frame so
    /// a late packet cannot overwrite a fresher value.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidFrame`] for negative frames and
    /// [`SyncError::FrameOutsideWindow`] for packets too old to store. Both
    /// are reported as warnings and leave the synchronizer unchanged.
    pub fn on_remote_input(&mut self, packet: RemoteInputPacket<C::Input>) -> Result<(), SyncError> {
        let RemoteInputPacket {
            frame,
            input,
            frame_advantage,
        } = packet;

        if let Some(stored) = self.ledger.remote_confirmed(frame) {
            self.stats.duplicate_packets += 1;
            if !self.comparator.inputs_match(stored, &input) {
                report_violation_to!(
                    &self.observer,
                    ViolationSeverity::Critical,
                    ViolationKind::InputLedger,
                    frame = frame,
                    "duplicate remote packet for frame {} carries a different input: stored {:?}, received {:?}",
                    frame,
                    stored,
                    input
                );
            }
            return Ok(());
        }

        self.ledger
            .store_remote_confirmed(input, frame)
            .map_err(|err| self.escalate(err))?;
        self.counters.observe_remote(frame);
        if frame == self.counters.remote_frame() {
            self.counters.set_remote_frame_advantage(frame_advantage);
        }
        Ok(())
    }

    /// The remote input to simulate `frame` with.
    ///
    /// The confirmed input if it has arrived, else the existing guess, else a
    /// fresh prediction that is recorded as the guess for `frame`.
    ///
    /// # Errors
    ///
    /// Ledger errors from recording the guess.
    pub fn resolve_remote_input(&mut self, frame: Frame) -> Result<C::Input, SyncError> {
        if let Some(confirmed) = self.ledger.remote_confirmed(frame) {
            return Ok(confirmed.clone());
        }
        if let Some(guess) = self.ledger.guessed(frame) {
            return Ok(guess.clone());
        }
        let guess = self.predict(frame);
        self.ledger
            .store_guessed(guess.clone(), frame)
            .map_err(|err| self.escalate(err))?;
        self.stats.predictions += 1;
        Ok(guess)
    }

    fn predict(&self, frame: Frame) -> C::Input {
        let last_confirmed = self.ledger.latest_confirmed().map(|(_, input)| input);
        self.prediction.predict(frame, last_confirmed, &*self.neutral)
    }

    /// Builds the packet carrying the local input of `frame`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidFrame`] if no local input is recorded for `frame`.
    pub fn outbound_packet(&self, frame: Frame) -> Result<RemoteInputPacket<C::Input>, SyncError> {
        let input = self
            .ledger
            .local(frame)
            .cloned()
            .ok_or(SyncError::InvalidFrame {
                frame,
                reason: "no local input recorded for this frame",
            })?;
        Ok(RemoteInputPacket {
            frame,
            input,
            frame_advantage: self.counters.local_frame_advantage(),
        })
    }

    // ################
    // #  ROLLBACKS   #
    // ################

    /// Moves the sync point forward as far as the ledger allows.
    pub fn recompute_sync_point(&mut self) -> SyncPointChange {
        let change = self
            .sync_point
            .recompute(&self.counters, &self.ledger, &*self.comparator);
        if let SyncPointChange::Regressed { kept, computed } = change {
            report_violation_to!(
                &self.observer,
                ViolationSeverity::Critical,
                ViolationKind::SyncPoint,
                frame = kept,
                "sync point would move back from {} to {}; keeping {}",
                kept,
                computed,
                kept
            );
        }
        change
    }

    /// `true` if this peer is more than `frame_advantage_limit` frames ahead
    /// of where the remote peer says it is.
    #[must_use]
    pub fn should_stall(&self) -> bool {
        self.counters.frame_advantage_delta() > self.config.frame_advantage_limit
    }

    /// Replays from the sync frame if the gate is open.
    ///
    /// Every entity is restored to its snapshot at `current`, then every frame
    /// in `(current, local_frame)` is stepped again with the recorded local
    /// input and the best remote input now known. The remote input used
    /// replaces the old guess and each result overwrites the old snapshot.
    ///
    /// # Errors
    ///
    /// [`SyncError::SnapshotMissing`] or [`SyncError::IncompleteSnapshot`]
    /// if the sync frame cannot be restored. Fatal; also reported as critical
    /// violations. The live states are left untouched on error.
    pub fn maybe_roll_back(&mut self) -> Result<Option<RollbackReport>, SyncError> {
        if !RollbackGate::should_roll_back(&self.counters, &self.sync_point) {
            return Ok(None);
        }
        let target = self.sync_point.current();
        let resume = self.counters.local_frame();
        debug!(from = %resume, to = %target, "rolling back");

        let entities: SmallVec<[EntityId; 8]> = self.snapshots.entities().collect();
        let mut states = BTreeMap::new();
        for entity in entities {
            let state = self
                .snapshots
                .restore(target, entity)
                .map_err(|err| self.escalate(err))?;
            states.insert(entity, state);
        }

        let mut frames_resimulated = 0u32;
        let mut corrected_frames = 0u32;
        let mut frame = target.next();
        while frame < resume {
            let local_input = self.ledger.local(frame).cloned().ok_or_else(|| {
                self.escalate(SyncError::InternalError {
                    context: format!("no local input for replayed frame {frame}"),
                })
            })?;
            let remote_input = match self.ledger.remote_confirmed(frame) {
                Some(confirmed) => confirmed.clone(),
                None => self.predict(frame),
            };
            let corrected = self
                .ledger
                .guessed(frame)
                .is_some_and(|guess| !self.comparator.inputs_match(guess, &remote_input));
            if corrected {
                corrected_frames += 1;
            }
            self.ledger
                .overwrite_guessed(remote_input.clone(), frame)
                .map_err(|err| self.escalate(err))?;

            for (entity, state) in &mut states {
                *state = self.step.step(state, &local_input, &remote_input);
                if let Err(err) = self.snapshots.capture(frame, *entity, state) {
                    return Err(self.escalate(err));
                }
            }
            trace!(%frame, corrected, "replayed frame");
            frames_resimulated += 1;
            frame = frame.next();
        }

        self.live = states;
        let report = RollbackReport {
            restored_frame: target,
            resumed_frame: resume,
            frames_resimulated,
            corrected_frames,
        };
        self.stats.record_rollback(&report);
        self.recompute_sync_point();
        debug!(
            frames = frames_resimulated,
            corrected = corrected_frames,
            sync_frame = %self.sync_point.current(),
            "rollback finished"
        );
        debug_check_invariants!(self, "after rollback");
        Ok(Some(report))
    }

    // ##############
    // #  STEPPING  #
    // ##############

    /// Simulates `local_frame` for every entity and moves to the next frame.
    ///
    /// The local input for `local_frame` must already be recorded. Does not
    /// look at the stall condition; [`tick`](Self::tick) does.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidFrame`] if the local input is missing, plus
    /// anything [`resolve_remote_input`](Self::resolve_remote_input) or a
    /// snapshot capture returns.
    pub fn advance_frame(&mut self) -> Result<RemoteInputStatus, SyncError> {
        let frame = self.counters.local_frame();
        let local_input = self
            .ledger
            .local(frame)
            .cloned()
            .ok_or(SyncError::InvalidFrame {
                frame,
                reason: "no local input recorded for the frame being advanced",
            })?;
        let remote_status = if self.ledger.remote_confirmed(frame).is_some() {
            RemoteInputStatus::Confirmed
        } else {
            RemoteInputStatus::Predicted
        };
        let remote_input = self.resolve_remote_input(frame)?;

        let mut failure = None;
        for (entity, state) in &mut self.live {
            *state = self.step.step(state, &local_input, &remote_input);
            if let Err(err) = self.snapshots.capture(frame, *entity, state) {
                failure = Some(err);
                break;
            }
        }
        if let Some(err) = failure {
            return Err(self.escalate(err));
        }

        self.advantage.record(
            frame,
            self.counters.local_frame_advantage(),
            self.counters.remote_frame_advantage(),
        );
        self.counters.advance_local();
        self.stats.frames_advanced += 1;
        trace!(%frame, ?remote_status, "advanced frame");
        Ok(remote_status)
    }

    /// Runs one frame of the loop with this frame's local input.
    ///
    /// While stalled, repeated ticks keep the input recorded by the first
    /// stalled tick and ignore `local_input`.
    ///
    /// # Errors
    ///
    /// Fatal errors only: a broken ledger write, a missing or incomplete
    /// snapshot. Bad remote packets are reported and skipped.
    pub fn tick(&mut self, local_input: C::Input) -> Result<TickReport<C::Input>, SyncError> {
        let frame = self.counters.local_frame();
        if self.ledger.local(frame).is_none() {
            self.record_local_input(local_input, frame)?;
        }

        for packet in self.inbox.drain() {
            if let Err(err) = self.on_remote_input(packet) {
                if err.is_fatal() {
                    return Err(err);
                }
            }
        }

        self.recompute_sync_point();
        let rollback = self.maybe_roll_back()?;
        let outbound = self.outbound_packet(frame)?;

        let outcome = if self.should_stall() {
            let delta = self.counters.frame_advantage_delta();
            self.stats.stalls += 1;
            debug!(
                %frame,
                delta,
                limit = self.config.frame_advantage_limit,
                "stalling"
            );
            TickOutcome::Stalled { delta }
        } else {
            let remote_status = self.advance_frame()?;
            TickOutcome::Advanced {
                frame,
                remote_status,
            }
        };

        debug_check_invariants!(self, "end of tick");
        Ok(TickReport {
            outcome,
            rollback,
            outbound,
        })
    }

    /// Reports `err` to the observer, critical if fatal and a warning
    /// otherwise, and hands it back.
    fn escalate(&self, err: SyncError) -> SyncError {
        let kind = match &err {
            SyncError::DuplicateWrite { .. }
            | SyncError::FrameOutsideWindow { .. }
            | SyncError::InvalidFrame { .. } => ViolationKind::InputLedger,
            SyncError::SnapshotMissing { .. }
            | SyncError::IncompleteSnapshot { .. }
            | SyncError::UnknownEntity { .. }
            | SyncError::Serialization { .. } => ViolationKind::Snapshot,
            SyncError::InvalidConfig { .. } => ViolationKind::Configuration,
            SyncError::InternalError { .. } => ViolationKind::InternalError,
        };
        let severity = if err.is_fatal() {
            ViolationSeverity::Critical
        } else {
            ViolationSeverity::Warning
        };
        report_violation_to!(
            &self.observer,
            severity,
            kind,
            frame = self.counters.local_frame(),
            "{}",
            err
        );
        err
    }

    // ###############
    // #  ACCESSORS  #
    // ###############

    /// Highest frame known to be simulated with correct inputs.
    #[must_use]
    pub fn current_sync_frame(&self) -> Frame {
        self.sync_point.current()
    }

    /// The next frame to be simulated.
    #[must_use]
    pub fn local_frame(&self) -> Frame {
        self.counters.local_frame()
    }

    /// Highest remote frame received.
    #[must_use]
    pub fn remote_frame(&self) -> Frame {
        self.counters.remote_frame()
    }

    /// `local_frame - remote_frame`.
    #[must_use]
    pub fn local_frame_advantage(&self) -> i32 {
        self.counters.local_frame_advantage()
    }

    /// The frame counters.
    #[must_use]
    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    /// The input ledger.
    #[must_use]
    pub fn ledger(&self) -> &InputLedger<C::Input> {
        &self.ledger
    }

    /// The snapshot store.
    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore<C::State> {
        &self.snapshots
    }

    /// The configuration this synchronizer was built with.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Live state of `entity`.
    #[must_use]
    pub fn entity_state(&self, entity: EntityId) -> Option<&C::State> {
        self.live.get(&entity)
    }

    /// Checksum of the live state of `entity`.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownEntity`], or [`SyncError::Serialization`] if the
    /// state cannot be encoded.
    pub fn state_checksum(&self, entity: EntityId) -> Result<u64, SyncError> {
        let state = self
            .live
            .get(&entity)
            .ok_or(SyncError::UnknownEntity { entity })?;
        compute_checksum(state).map_err(SyncError::from)
    }

    /// Stored snapshot checksum of `entity` at `frame`.
    #[must_use]
    pub fn snapshot_checksum(&self, frame: Frame, entity: EntityId) -> Option<u64> {
        self.snapshots.checksum(frame, entity)
    }

    /// Running totals.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Frames this peer should idle to let the remote peer catch up, from the
    /// averaged advantage history. Zero unless this peer is ahead.
    #[must_use]
    pub fn wait_recommendation(&self) -> u32 {
        let average = self.advantage.average_frame_advantage();
        if average < 0 {
            average.unsigned_abs()
        } else {
            0
        }
    }

    /// A handle to the inbox; push received packets into it from any thread.
    #[must_use]
    pub fn inbox(&self) -> RemoteInbox<C::Input> {
        self.inbox.clone()
    }
}

impl<C: Config> InvariantChecker for Synchronizer<C> {
    /// Checks every component, then:
    /// 1. `current` does not exceed either counter.
    /// 2. Every registered entity has a live state and vice versa.
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.ledger.check_invariants()?;
        self.counters.check_invariants()?;
        self.sync_point.check_invariants()?;
        self.sync_point.check_against(&self.counters)?;
        self.snapshots.check_invariants()?;

        if self.live.len() != self.snapshots.len()
            || self.live.keys().any(|entity| !self.snapshots.contains(*entity))
        {
            return Err(InvariantViolation::new(
                "Synchronizer",
                "live states and registered entities differ",
            )
            .with_details(format!(
                "live={}, registered={}",
                self.live.len(),
                self.snapshots.len()
            )));
        }
        Ok(())
    }
}

impl<C: Config> fmt::Debug for Synchronizer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .field("sync_point", &self.sync_point)
            .field("entities", &self.live.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
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
    use crate::telemetry::CollectingObserver;
    use crate::{assert_no_violations, assert_violation};
    use crate::{PhaseClock, RollbackState, SynchronizerBuilder};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tally {
        sum: i64,
        history: u64,
        clock: PhaseClock,
    }

    impl RollbackState for Tally {
        fn phase_clock(&self) -> PhaseClock {
            self.clock
        }
    }

    struct TestConfig;

    impl Config for TestConfig {
        type Input = u8;
        type State = Tally;
    }

    fn step(state: &Tally, local: &u8, remote: &u8) -> Tally {
        Tally {
            sum: state.sum + i64::from(*local) - i64::from(*remote),
            history: state
                .history
                .wrapping_mul(31)
                .wrapping_add((u64::from(*local) << 8) | u64::from(*remote)),
            clock: state.clock.tick(),
        }
    }

    const HERO: EntityId = EntityId::new(1);

    fn peer(observer: Option<Arc<CollectingObserver>>) -> Synchronizer<TestConfig> {
        let mut builder = SynchronizerBuilder::<TestConfig>::new()
            .with_entity(
                HERO,
                Tally {
                    sum: 0,
                    history: 0,
                    clock: PhaseClock::default(),
                },
            )
            .with_step_function(step)
            .with_neutral_input(|| 0)
            .with_partial_eq_comparator();
        if let Some(observer) = observer {
            builder = builder.with_violation_observer(observer);
        }
        builder.build().unwrap()
    }

    fn remote(frame: i32, input: u8, frame_advantage: i32) -> RemoteInputPacket<u8> {
        RemoteInputPacket {
            frame: Frame::new(frame),
            input,
            frame_advantage,
        }
    }

    #[test]
    fn tick_advances_and_predicts_without_remote_input() {
        let mut sync = peer(None);
        let report = sync.tick(3).unwrap();
        assert_eq!(
            report.outcome,
            TickOutcome::Advanced {
                frame: Frame::new(0),
                remote_status: RemoteInputStatus::Predicted,
            }
        );
        assert_eq!(report.outbound, remote(0, 3, 1));
        assert_eq!(sync.local_frame(), Frame::new(1));
        assert_eq!(sync.ledger().guessed(Frame::new(0)), Some(&0));
        assert_eq!(sync.stats().predictions, 1);
    }

    #[test]
    fn confirmed_input_is_used_directly() {
        let mut sync = peer(None);
        sync.inbox().push(remote(0, 5, 0));
        let report = sync.tick(1).unwrap();
        assert_eq!(
            report.outcome,
            TickOutcome::Advanced {
                frame: Frame::new(0),
                remote_status: RemoteInputStatus::Confirmed,
            }
        );
        assert_eq!(sync.entity_state(HERO).unwrap().sum, -4);
        assert_eq!(sync.ledger().guessed(Frame::new(0)), None);
    }

    #[test]
    fn wrong_guess_is_corrected_by_rollback() {
        let mut sync = peer(None);
        sync.on_remote_input(remote(0, 0, 0)).unwrap();
        for _ in 0..4 {
            sync.tick(1).unwrap();
        }
        // Frames 1..4 were simulated with a guessed 0; the real input at 2 was 9.
        for frame in 0..4 {
            sync.on_remote_input(remote(frame, if frame == 2 { 9 } else { 0 }, 0))
                .unwrap();
        }
        let report = sync.tick(1).unwrap();
        let rollback = report.rollback.unwrap();
        assert_eq!(rollback.restored_frame, Frame::new(1));
        assert_eq!(rollback.resumed_frame, Frame::new(4));
        assert_eq!(rollback.frames_resimulated, 2);
        assert_eq!(rollback.corrected_frames, 1);
        assert_eq!(sync.entity_state(HERO).unwrap().sum, 5 - 9);
        assert_eq!(sync.current_sync_frame(), Frame::new(3));
        assert_eq!(sync.stats().mispredicted_frames, 1);
    }

    #[test]
    fn reordered_matching_inputs_do_not_roll_back() {
        let observer = Arc::new(CollectingObserver::new());
        let mut sync = peer(Some(observer.clone()));
        sync.on_remote_input(remote(0, 0, 0)).unwrap();
        sync.on_remote_input(remote(1, 0, 0)).unwrap();
        for _ in 0..3 {
            sync.tick(0).unwrap();
        }
        // Frame 3 overtakes frame 2, which stays missing for a while.
        sync.on_remote_input(remote(3, 0, 0)).unwrap();
        for _ in 0..3 {
            let report = sync.tick(0).unwrap();
            assert!(report.advanced());
            assert!(report.rollback.is_none());
            assert_eq!(sync.current_sync_frame(), Frame::new(1));
        }

        sync.on_remote_input(remote(2, 0, 0)).unwrap();
        assert!(sync.tick(0).unwrap().rollback.is_none());
        assert_eq!(sync.current_sync_frame(), Frame::new(3));
        assert_eq!(sync.stats().rollbacks, 0);
        assert_eq!(sync.stats().mispredicted_frames, 0);
        assert_no_violations!(observer);
    }

    #[test]
    fn late_frame_filling_a_gap_with_new_input_rolls_back() {
        let mut sync = peer(None);
        sync.on_remote_input(remote(0, 0, 0)).unwrap();
        sync.on_remote_input(remote(1, 0, 0)).unwrap();
        for _ in 0..3 {
            sync.tick(1).unwrap();
        }
        sync.on_remote_input(remote(3, 0, 0)).unwrap();
        for _ in 0..2 {
            assert!(sync.tick(1).unwrap().rollback.is_none());
        }

        sync.on_remote_input(remote(2, 6, 0)).unwrap();
        let rollback = sync.tick(1).unwrap().rollback.unwrap();
        assert_eq!(rollback.restored_frame, Frame::new(1));
        assert_eq!(rollback.resumed_frame, Frame::new(5));
        assert_eq!(rollback.corrected_frames, 1);
        assert_eq!(sync.current_sync_frame(), Frame::new(3));
        // Frames 0..=5 with local 1; remote 6 at frame 2 and 0 elsewhere.
        assert_eq!(sync.entity_state(HERO).unwrap().sum, 6 - 6);
    }

    #[test]
    fn replay_matches_a_peer_that_never_guessed() {
        let inputs: Vec<(u8, u8)> = (0..12).map(|n| (n % 3, (n * 7) % 5)).collect();

        let mut oracle = peer(None);
        for (frame, (local, other)) in inputs.iter().enumerate() {
            oracle
                .on_remote_input(remote(frame as i32, *other, 0))
                .unwrap();
            oracle.tick(*local).unwrap();
        }

        let mut late = peer(None);
        for (frame, (local, _)) in inputs.iter().enumerate() {
            if frame >= 3 {
                let arrived = frame - 3;
                late.on_remote_input(remote(arrived as i32, inputs[arrived].1, 3))
                    .unwrap();
            }
            late.tick(*local).unwrap();
        }
        for arrived in 9..12 {
            late.on_remote_input(remote(arrived, inputs[arrived as usize].1, 0))
                .unwrap();
        }
        late.recompute_sync_point();
        late.maybe_roll_back().unwrap();

        assert_eq!(oracle.entity_state(HERO), late.entity_state(HERO));
        for frame in 0..12 {
            assert_eq!(
                oracle.snapshot_checksum(Frame::new(frame), HERO),
                late.snapshot_checksum(Frame::new(frame), HERO),
                "frame {frame}"
            );
        }
    }

    #[test]
    fn stalls_when_too_far_ahead_and_keeps_first_input() {
        let mut sync = peer(None);
        sync.on_remote_input(remote(0, 0, 0)).unwrap();
        for _ in 0..4 {
            assert!(sync.tick(1).unwrap().advanced());
        }
        // local 4, remote 0: delta 4 > 3.
        let report = sync.tick(7).unwrap();
        assert_eq!(report.outcome, TickOutcome::Stalled { delta: 4 });
        let again = sync.tick(8).unwrap();
        assert!(!again.advanced());
        assert_eq!(sync.ledger().local(Frame::new(4)), Some(&7));
        assert_eq!(again.outbound.input, 7);
        assert_eq!(sync.stats().stalls, 2);

        sync.on_remote_input(remote(1, 0, 0)).unwrap();
        assert!(sync.tick(9).unwrap().advanced());
    }

    #[test]
    fn duplicate_remote_packet_is_absorbed() {
        let observer = Arc::new(CollectingObserver::new());
        let mut sync = peer(Some(observer.clone()));
        sync.on_remote_input(remote(0, 4, 0)).unwrap();
        sync.on_remote_input(remote(0, 4, 0)).unwrap();
        assert_no_violations!(observer);
        assert_eq!(sync.stats().duplicate_packets, 1);

        sync.on_remote_input(remote(0, 5, 0)).unwrap();
        assert_violation!(observer, ViolationKind::InputLedger);
        assert!(observer.has_severity(ViolationSeverity::Critical));
        assert_eq!(sync.ledger().remote_confirmed(Frame::new(0)), Some(&4));
    }

    #[test]
    fn late_packet_does_not_overwrite_fresher_advantage() {
        let mut sync = peer(None);
        sync.on_remote_input(remote(5, 0, 2)).unwrap();
        sync.on_remote_input(remote(3, 0, 7)).unwrap();
        assert_eq!(sync.remote_frame(), Frame::new(5));
        assert_eq!(sync.counters().remote_frame_advantage(), 2);
    }

    #[test]
    fn negative_remote_frame_is_rejected_with_warning() {
        let observer = Arc::new(CollectingObserver::new());
        let mut sync = peer(Some(observer.clone()));
        let err = sync.on_remote_input(remote(-3, 0, 0)).unwrap_err();
        assert!(!err.is_fatal());
        assert!(observer.has_severity(ViolationSeverity::Warning));
        assert_eq!(sync.remote_frame(), Frame::NULL);
    }

    #[test]
    fn duplicate_local_input_is_fatal() {
        let observer = Arc::new(CollectingObserver::new());
        let mut sync = peer(Some(observer.clone()));
        sync.record_local_input(1, Frame::new(0)).unwrap();
        let err = sync.record_local_input(2, Frame::new(0)).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateWrite { .. }));
        assert!(err.is_fatal());
        assert_violation!(observer, ViolationKind::InputLedger);
    }

    #[test]
    fn existing_guess_is_returned_unchanged() {
        let mut sync = peer(None);
        sync.on_remote_input(remote(0, 6, 0)).unwrap();
        assert_eq!(sync.resolve_remote_input(Frame::new(3)).unwrap(), 6);
        sync.on_remote_input(remote(1, 2, 0)).unwrap();
        assert_eq!(sync.resolve_remote_input(Frame::new(3)).unwrap(), 6);
        assert_eq!(sync.resolve_remote_input(Frame::new(4)).unwrap(), 2);
        assert_eq!(sync.stats().predictions, 2);
    }

    #[test]
    fn advance_without_local_input_fails() {
        let mut sync = peer(None);
        assert!(matches!(
            sync.advance_frame(),
            Err(SyncError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn wait_recommendation_when_ahead() {
        let mut sync = peer(None);
        sync.on_remote_input(remote(0, 0, -2)).unwrap();
        for _ in 0..3 {
            sync.tick(0).unwrap();
        }
        assert_eq!(sync.wait_recommendation(), 0);

        // One frame ahead, and the remote peer agrees it is one behind.
        let mut ahead = peer(None);
        for frame in 0..40 {
            if frame > 0 {
                ahead.on_remote_input(remote(frame - 1, 0, -1)).unwrap();
            }
            assert!(ahead.tick(0).unwrap().advanced());
        }
        assert_eq!(ahead.wait_recommendation(), 1);
    }

    #[test]
    fn invariants_hold_after_rollback() {
        let mut sync = peer(None);
        for n in 0..6 {
            sync.tick(n).unwrap();
        }
        for frame in 0..6 {
            sync.on_remote_input(remote(frame, 1, 0)).unwrap();
        }
        sync.tick(0).unwrap();
        assert!(sync.check_invariants().is_ok());
    }
}
