//! What to assume about a remote input that has not arrived yet.
//!
//! A prediction is only ever compared against the eventual confirmation on the
//! same peer, so strategies need to be deterministic within one peer (replays
//! ask again and must get an answer computed from the same inputs), but they
//! may use anything the ledger has confirmed so far.
//!
//! ```
//! use rollback_sync::{Frame, PredictionStrategy};
//!
//! /// Assume the remote player keeps holding whatever it last held, but never
//! /// repeats the "jump" bit.
//! struct NoRepeatJump;
//!
//! impl PredictionStrategy<u8> for NoRepeatJump {
//!     fn predict(&self, _frame: Frame, last_confirmed: Option<&u8>, neutral: &dyn Fn() -> u8) -> u8 {
//!         last_confirmed.map_or_else(neutral, |buttons| buttons & !0b1)
//!     }
//! }
//!
//! assert_eq!(NoRepeatJump.predict(Frame::new(3), Some(&0b11), &|| 0), 0b10);
//! ```

use crate::Frame;

/// Produces a remote input for a frame whose real input is unknown.
pub trait PredictionStrategy<I>: Send + Sync {
    /// Predicts the remote input for `frame`.
    ///
    /// * `last_confirmed`: the confirmed remote input with the highest frame,
    ///   if any.
    /// * `neutral`: the caller's "no input" factory.
    fn predict(&self, frame: Frame, last_confirmed: Option<&I>, neutral: &dyn Fn() -> I) -> I;
}

/// Repeats the latest confirmed remote input; neutral before the first one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatLastConfirmed;

impl<I: Clone> PredictionStrategy<I> for RepeatLastConfirmed {
    fn predict(&self, _frame: Frame, last_confirmed: Option<&I>, neutral: &dyn Fn() -> I) -> I {
        last_confirmed.cloned().unwrap_or_else(neutral)
    }
}

/// Always predicts the neutral input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlankPrediction;

impl<I> PredictionStrategy<I> for BlankPrediction {
    fn predict(&self, _frame: Frame, _last_confirmed: Option<&I>, neutral: &dyn Fn() -> I) -> I {
        neutral()
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

    #[derive(Clone, Debug, PartialEq)]
    struct Pad {
        buttons: u8,
    }

    fn neutral() -> Pad {
        Pad { buttons: 0 }
    }

    #[test]
    fn repeat_last_confirmed_uses_latest() {
        let last = Pad { buttons: 7 };
        let predicted = RepeatLastConfirmed.predict(Frame::new(9), Some(&last), &neutral);
        assert_eq!(predicted, last);
    }

    #[test]
    fn repeat_last_confirmed_falls_back_to_neutral() {
        let predicted: Pad = RepeatLastConfirmed.predict(Frame::new(0), None, &neutral);
        assert_eq!(predicted, neutral());
    }

    #[test]
    fn blank_ignores_history() {
        let predicted = BlankPrediction.predict(Frame::new(4), Some(&Pad { buttons: 3 }), &neutral);
        assert_eq!(predicted, neutral());
    }

    #[test]
    fn strategies_work_as_trait_objects() {
        let strategies: Vec<Box<dyn PredictionStrategy<Pad>>> =
            vec![Box::new(RepeatLastConfirmed), Box::new(BlankPrediction)];
        let last = Pad { buttons: 1 };
        let results: Vec<Pad> = strategies
            .iter()
            .map(|s| s.predict(Frame::new(1), Some(&last), &neutral))
            .collect();
        assert_eq!(results, vec![last, neutral()]);
    }
}
