//! Step-by-step construction and validation of a [`Synchronizer`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::inbox::RemoteInbox;
use crate::input_ledger::comparison::{InputComparator, PartialEqComparator};
use crate::input_ledger::prediction::{PredictionStrategy, RepeatLastConfirmed};
use crate::snapshot_store::SnapshotStore;
use crate::synchronizer::{NeutralInput, Synchronizer};
use crate::telemetry::ViolationObserver;
use crate::{Config, EntityId, StepFunction};

/// Builds a [`Synchronizer`].
///
/// A step function, a neutral-input factory and an input comparator are
/// required; everything else has a default:
///
/// | Setting | Default |
/// |---|---|
/// | config | [`SyncConfig::default()`] |
/// | prediction | [`RepeatLastConfirmed`] |
/// | violation observer | [`TracingObserver`](crate::telemetry::TracingObserver) |
/// | inbox | a fresh [`RemoteInbox`] |
#[must_use = "SynchronizerBuilder must be consumed by calling build()"]
pub struct SynchronizerBuilder<C: Config> {
    config: SyncConfig,
    entities: Vec<(EntityId, C::State)>,
    step: Option<Box<dyn StepFunction<C>>>,
    neutral: Option<NeutralInput<C::Input>>,
    prediction: Box<dyn PredictionStrategy<C::Input>>,
    comparator: Option<Box<dyn InputComparator<C::Input>>>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    inbox: Option<RemoteInbox<C::Input>>,
}

impl<C: Config> std::fmt::Debug for SynchronizerBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            config,
            entities,
            step,
            neutral,
            prediction: _,
            comparator,
            violation_observer,
            inbox,
        } = self;

        f.debug_struct("SynchronizerBuilder")
            .field("config", config)
            .field(
                "entities",
                &entities.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )
            .field("has_step_function", &step.is_some())
            .field("has_neutral_input", &neutral.is_some())
            .field("has_comparator", &comparator.is_some())
            .field("has_violation_observer", &violation_observer.is_some())
            .field("inbox", inbox)
            .finish_non_exhaustive()
    }
}

impl<C: Config> Default for SynchronizerBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> SynchronizerBuilder<C> {
    /// A builder with default settings and no entities.
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
            entities: Vec::new(),
            step: None,
            neutral: None,
            prediction: Box::new(RepeatLastConfirmed),
            comparator: None,
            violation_observer: None,
            inbox: None,
        }
    }

    /// Replaces the configuration. Validated in [`build`](Self::build).
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an entity with its state before frame 0.
    pub fn with_entity(mut self, entity: EntityId, initial: C::State) -> Self {
        self.entities.push((entity, initial));
        self
    }

    /// Sets the deterministic step applied to every entity each frame.
    pub fn with_step_function(mut self, step: impl StepFunction<C> + 'static) -> Self {
        self.step = Some(Box::new(step));
        self
    }

    /// Sets the factory for the "no input" value used by predictions.
    pub fn with_neutral_input(
        mut self,
        neutral: impl Fn() -> C::Input + Send + Sync + 'static,
    ) -> Self {
        self.neutral = Some(Box::new(neutral));
        self
    }

    /// Replaces the default [`RepeatLastConfirmed`] prediction.
    pub fn with_prediction_strategy(
        mut self,
        prediction: impl PredictionStrategy<C::Input> + 'static,
    ) -> Self {
        self.prediction = Box::new(prediction);
        self
    }

    /// Sets how a guess is compared against the confirmed input.
    pub fn with_input_comparator(
        mut self,
        comparator: impl InputComparator<C::Input> + 'static,
    ) -> Self {
        self.comparator = Some(Box::new(comparator));
        self
    }

    /// Sets an observer for contract violations. Without one they go to
    /// `tracing`.
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Uses an existing inbox, typically one already handed to the transport.
    pub fn with_inbox(mut self, inbox: RemoteInbox<C::Input>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Builds the synchronizer.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidConfig`] if the configuration is invalid, an
    ///   entity id is registered twice, or the step function, neutral input
    ///   or comparator is missing.
    /// - [`SyncError::Serialization`] if an initial state cannot be encoded.
    pub fn build(self) -> Result<Synchronizer<C>, SyncError> {
        self.config.validate()?;
        let step = self.step.ok_or_else(|| SyncError::InvalidConfig {
            info: "a step function is required".to_owned(),
        })?;
        let neutral = self.neutral.ok_or_else(|| SyncError::InvalidConfig {
            info: "a neutral input factory is required".to_owned(),
        })?;
        let comparator = self.comparator.ok_or_else(|| SyncError::InvalidConfig {
            info: "an input comparator is required".to_owned(),
        })?;

        let mut snapshots = SnapshotStore::new(self.config.snapshot_capacity);
        let mut live = BTreeMap::new();
        for (entity, initial) in self.entities {
            if live.contains_key(&entity) {
                return Err(SyncError::InvalidConfig {
                    info: format!("{entity} registered twice"),
                });
            }
            snapshots.register(entity, &initial)?;
            live.insert(entity, initial);
        }

        Ok(Synchronizer::new(
            self.config,
            snapshots,
            live,
            step,
            neutral,
            self.prediction,
            comparator,
            self.violation_observer,
            self.inbox.unwrap_or_default(),
        ))
    }
}

impl<C: Config> SynchronizerBuilder<C>
where
    C::Input: PartialEq,
{
    /// Compares guesses with `==`.
    pub fn with_partial_eq_comparator(self) -> Self {
        self.with_input_comparator(PartialEqComparator)
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
    use crate::input_ledger::prediction::BlankPrediction;
    use crate::{Frame, PhaseClock, RollbackState};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Dot {
        x: i32,
        clock: PhaseClock,
    }

    impl RollbackState for Dot {
        fn phase_clock(&self) -> PhaseClock {
            self.clock
        }
    }

    struct DotConfig;

    impl Config for DotConfig {
        type Input = i8;
        type State = Dot;
    }

    fn dot(x: i32) -> Dot {
        Dot {
            x,
            clock: PhaseClock::default(),
        }
    }

    fn complete() -> SynchronizerBuilder<DotConfig> {
        SynchronizerBuilder::new()
            .with_entity(EntityId::new(0), dot(0))
            .with_step_function(|d: &Dot, l: &i8, r: &i8| Dot {
                x: d.x + i32::from(*l) + i32::from(*r),
                clock: d.clock.tick(),
            })
            .with_neutral_input(|| 0)
            .with_partial_eq_comparator()
    }

    #[test]
    fn complete_builder_builds() {
        let sync = complete().build().unwrap();
        assert_eq!(sync.local_frame(), Frame::new(0));
        assert_eq!(sync.entity_state(EntityId::new(0)), Some(&dot(0)));
        assert_eq!(sync.snapshots().len(), 1);
    }

    #[test]
    fn missing_step_function_is_rejected() {
        let err = SynchronizerBuilder::<DotConfig>::new()
            .with_neutral_input(|| 0)
            .with_partial_eq_comparator()
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("step function"));
    }

    #[test]
    fn missing_comparator_is_rejected() {
        let err = SynchronizerBuilder::<DotConfig>::new()
            .with_step_function(|d: &Dot, _: &i8, _: &i8| d.clone())
            .with_neutral_input(|| 0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig { .. }));
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let err = complete()
            .with_entity(EntityId::new(0), dot(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("entity#0"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig {
            snapshot_capacity: 4,
            ..SyncConfig::default()
        };
        assert!(complete().with_config(config).build().is_err());
    }

    #[test]
    fn custom_prediction_and_shared_inbox() {
        let inbox = RemoteInbox::new();
        let mut sync = complete()
            .with_prediction_strategy(BlankPrediction)
            .with_inbox(inbox.clone())
            .build()
            .unwrap();
        sync.on_remote_input(crate::RemoteInputPacket {
            frame: Frame::new(0),
            input: 4,
            frame_advantage: 0,
        })
        .unwrap();
        assert_eq!(sync.resolve_remote_input(Frame::new(1)).unwrap(), 0);
        inbox.push(crate::RemoteInputPacket {
            frame: Frame::new(1),
            input: 2,
            frame_advantage: 0,
        });
        assert_eq!(sync.inbox().len(), 1);
    }
}
