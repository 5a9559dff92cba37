//! Equality contract used to decide whether a guess was wrong.

/// Decides whether a guessed remote input and the confirmed one are
/// equivalent for simulation purposes.
///
/// Any `Fn(&I, &I) -> bool` closure implements this trait, which lets a caller
/// ignore fields that do not influence the step (a timestamp, a cosmetic
/// emote):
///
/// ```
/// use rollback_sync::InputComparator;
///
/// #[derive(Clone, Debug)]
/// struct Pad { buttons: u8, sent_at_ms: u64 }
///
/// let by_buttons = |a: &Pad, b: &Pad| a.buttons == b.buttons;
/// let guess = Pad { buttons: 4, sent_at_ms: 10 };
/// let real = Pad { buttons: 4, sent_at_ms: 27 };
/// assert!(by_buttons.inputs_match(&guess, &real));
/// ```
pub trait InputComparator<I>: Send + Sync {
    /// `true` if simulating with `guessed` gives the same result as with
    /// `confirmed`.
    fn inputs_match(&self, guessed: &I, confirmed: &I) -> bool;
}

impl<I, F> InputComparator<I> for F
where
    F: Fn(&I, &I) -> bool + Send + Sync,
{
    fn inputs_match(&self, guessed: &I, confirmed: &I) -> bool {
        self(guessed, confirmed)
    }
}

/// Compares with `PartialEq`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartialEqComparator;

impl<I: PartialEq> InputComparator<I> for PartialEqComparator {
    fn inputs_match(&self, guessed: &I, confirmed: &I) -> bool {
        guessed == confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_eq_comparator() {
        assert!(PartialEqComparator.inputs_match(&3u8, &3u8));
        assert!(!PartialEqComparator.inputs_match(&3u8, &4u8));
    }

    #[test]
    fn closure_comparator_can_ignore_bits() {
        let low_nibble = |a: &u8, b: &u8| (a & 0x0F) == (b & 0x0F);
        assert!(low_nibble.inputs_match(&0x13, &0xF3));
        assert!(!low_nibble.inputs_match(&0x13, &0x14));
    }
}
