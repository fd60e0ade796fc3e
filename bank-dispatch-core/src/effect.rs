//! Store mutation results
//!
//! Store mutations return an [`Outcome`] describing whether the action lists
//! changed and which follow-up work the engine must perform. Effects are
//! declarative: the store never saves or recomputes status itself.
//!
//! ```ignore
//! let outcome = store.delete(bank, Direction::Press, &id);
//! for effect in outcome.effects {
//!     match effect {
//!         StoreEffect::Save => persist(&store),
//!         StoreEffect::CheckStatus(bank) => status.check(bank),
//!     }
//! }
//! ```

use crate::bank::BankId;

/// Follow-up work requested by a store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEffect {
    /// Write both action lists to persistence.
    Save,
    /// Recompute the aggregated status of a bank.
    CheckStatus(BankId),
}

/// Result of a store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<E> {
    /// Whether any action list was modified.
    pub changed: bool,
    /// Effects to be processed after the mutation.
    pub effects: Vec<E>,
}

impl<E> Default for Outcome<E> {
    fn default() -> Self {
        Self::unchanged()
    }
}

impl<E> Outcome<E> {
    /// No change, no effects.
    #[inline]
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            effects: vec![],
        }
    }

    /// State changed but no effects.
    #[inline]
    pub fn changed() -> Self {
        Self {
            changed: true,
            effects: vec![],
        }
    }

    /// No state change, one effect.
    #[inline]
    pub fn effect(effect: E) -> Self {
        Self {
            changed: false,
            effects: vec![effect],
        }
    }

    /// State changed with a single effect.
    #[inline]
    pub fn changed_with(effect: E) -> Self {
        Self {
            changed: true,
            effects: vec![effect],
        }
    }

    /// Add an effect to this outcome.
    #[inline]
    pub fn with(mut self, effect: E) -> Self {
        self.effects.push(effect);
        self
    }

    /// Fold another outcome into this one.
    pub fn merge(mut self, other: Outcome<E>) -> Self {
        self.changed |= other.changed;
        self.effects.extend(other.effects);
        self
    }

    #[inline]
    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }
}

impl Outcome<StoreEffect> {
    /// Changed, save, and recheck the status of `bank`.
    pub fn saved(bank: BankId) -> Self {
        Self::changed_with(StoreEffect::Save).with(StoreEffect::CheckStatus(bank))
    }

    /// Effects with duplicates removed, first occurrence kept.
    pub fn unique_effects(&self) -> Vec<StoreEffect> {
        let mut seen = std::collections::HashSet::new();
        self.effects
            .iter()
            .copied()
            .filter(|effect| seen.insert(*effect))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_builders() {
        let r: Outcome<StoreEffect> = Outcome::unchanged();
        assert!(!r.changed);
        assert!(r.effects.is_empty());

        let r: Outcome<StoreEffect> = Outcome::changed();
        assert!(r.changed);
        assert!(!r.has_effects());

        let r = Outcome::effect(StoreEffect::Save);
        assert!(!r.changed);
        assert_eq!(r.effects, vec![StoreEffect::Save]);

        let bank = BankId::new(1, 1);
        let r = Outcome::saved(bank);
        assert!(r.changed);
        assert_eq!(
            r.effects,
            vec![StoreEffect::Save, StoreEffect::CheckStatus(bank)]
        );
    }

    #[test]
    fn test_merge_and_dedup() {
        let a = BankId::new(1, 1);
        let b = BankId::new(1, 2);
        let merged = Outcome::saved(a)
            .merge(Outcome::saved(b))
            .merge(Outcome::unchanged());
        assert!(merged.changed);
        assert_eq!(merged.effects.len(), 4);
        assert_eq!(
            merged.unique_effects(),
            vec![
                StoreEffect::Save,
                StoreEffect::CheckStatus(a),
                StoreEffect::CheckStatus(b)
            ]
        );
    }
}
