//! Per-bank status aggregation

use std::collections::HashMap;

use tracing::debug;

use crate::action::Action;
use crate::bank::BankId;
use crate::registry::InstanceRegistry;

/// Instance status level. `0` is ok, higher is worse.
pub type Severity = u8;

/// Memoized worst status of the instances each bank's press actions use.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    memo: HashMap<BankId, Severity>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the severity of `bank` from its press list.
    ///
    /// Returns the new severity only when it differs from the memoized value
    /// (a bank that was never checked always reports). A bank without a
    /// press list is left alone.
    pub fn check_bank(
        &mut self,
        bank: BankId,
        press_list: Option<&[Action]>,
        registry: &dyn InstanceRegistry,
    ) -> Option<Severity> {
        let list = press_list?;
        let severity = list
            .iter()
            .filter_map(|action| registry.instance(&action.instance_id))
            .map(|instance| instance.status())
            .max()
            .unwrap_or(0);

        if self.memo.get(&bank) == Some(&severity) {
            return None;
        }
        debug!(bank = %bank, severity, "Bank status changed");
        self.memo.insert(bank, severity);
        Some(severity)
    }

    /// Last computed severity, if the bank was ever checked.
    pub fn bank_status(&self, bank: BankId) -> Option<Severity> {
        self.memo.get(&bank).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInstance, FakeRegistry};
    use std::sync::Arc;

    const BANK: BankId = BankId::new(1, 1);

    #[test]
    fn test_notifies_only_on_change() {
        let registry = Arc::new(FakeRegistry::default());
        let obs = registry.insert("obs", FakeInstance::new("OBS"));
        obs.set_status(2);
        let list = vec![Action::new("obs", "scene")];
        let mut status = StatusAggregator::new();

        assert_eq!(status.check_bank(BANK, Some(&list), registry.as_ref()), Some(2));
        assert_eq!(status.bank_status(BANK), Some(2));

        obs.set_status(3);
        assert_eq!(status.check_bank(BANK, Some(&list), registry.as_ref()), Some(3));
        assert_eq!(status.check_bank(BANK, Some(&list), registry.as_ref()), None);
    }

    #[test]
    fn test_max_over_instances_ignoring_missing() {
        let registry = Arc::new(FakeRegistry::default());
        registry.insert("a", FakeInstance::new("A")).set_status(1);
        registry.insert("b", FakeInstance::new("B")).set_status(2);
        let list = vec![
            Action::new("a", "x"),
            Action::new("gone", "x"),
            Action::new("b", "x"),
        ];
        let mut status = StatusAggregator::new();

        assert_eq!(status.check_bank(BANK, Some(&list), registry.as_ref()), Some(2));
    }

    #[test]
    fn test_first_check_reports_ok() {
        let registry = FakeRegistry::default();
        let mut status = StatusAggregator::new();

        assert_eq!(status.check_bank(BANK, Some(&[]), &registry), Some(0));
        assert_eq!(status.check_bank(BANK, Some(&[]), &registry), None);
    }

    #[test]
    fn test_missing_list_is_ignored() {
        let registry = FakeRegistry::default();
        let mut status = StatusAggregator::new();

        assert_eq!(status.check_bank(BANK, None, &registry), None);
        assert_eq!(status.bank_status(BANK), None);
    }
}
