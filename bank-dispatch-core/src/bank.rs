//! Bank addressing and dispatch metadata

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a button: the page it lives on and its index on that page.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BankId {
    pub page: u32,
    pub bank: u32,
}

impl BankId {
    pub const fn new(page: u32, bank: u32) -> Self {
        Self { page, bank }
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.page, self.bank)
    }
}

/// Edge of a button event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Press,
    Release,
}

impl Direction {
    pub fn is_press(self) -> bool {
        matches!(self, Direction::Press)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Press => "press",
            Direction::Release => "release",
        }
    }
}

impl From<bool> for Direction {
    /// `true` is a press (button down), `false` a release.
    fn from(pressed: bool) -> Self {
        if pressed {
            Direction::Press
        } else {
            Direction::Release
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a dispatch group for cancellation and running indication.
///
/// Button presses always dispatch under [`GroupKey::Bank`]. Other callers
/// (schedulers, triggers) may run action lists under their own named group,
/// which participates in abort-all but never requests a redraw.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Bank(BankId),
    Named(String),
}

impl GroupKey {
    /// The bank this group redraws, if it is a bank group.
    pub fn bank(&self) -> Option<BankId> {
        match self {
            GroupKey::Bank(bank) => Some(*bank),
            GroupKey::Named(_) => None,
        }
    }
}

impl From<BankId> for GroupKey {
    fn from(bank: BankId) -> Self {
        GroupKey::Bank(bank)
    }
}

impl From<&'static str> for GroupKey {
    fn from(s: &'static str) -> Self {
        GroupKey::Named(s.to_string())
    }
}

impl From<String> for GroupKey {
    fn from(s: String) -> Self {
        GroupKey::Named(s)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Bank(bank) => write!(f, "{}_{}", bank.page, bank.bank),
            GroupKey::Named(name) => f.write_str(name),
        }
    }
}

/// Metadata handed to every action executed for a button event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSource {
    /// Device that produced the event, if the input source reports one.
    pub device_id: Option<String>,
    pub bank: BankId,
}

impl RunSource {
    pub fn new(bank: BankId, device_id: Option<String>) -> Self {
        Self { device_id, bank }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_conversions() {
        let bank = BankId::new(1, 4);
        assert_eq!(GroupKey::from(bank).bank(), Some(bank));
        assert_eq!(GroupKey::from("schedule").bank(), None);
        assert_eq!(GroupKey::from(bank).to_string(), "1_4");
        assert_eq!(GroupKey::from("schedule").to_string(), "schedule");
    }

    #[test]
    fn test_direction_from_bool() {
        assert_eq!(Direction::from(true), Direction::Press);
        assert_eq!(Direction::from(false), Direction::Release);
        assert!(Direction::Press.is_press());
    }

    #[test]
    fn test_bank_ordering_is_page_major() {
        let mut banks = vec![BankId::new(2, 1), BankId::new(1, 9), BankId::new(1, 2)];
        banks.sort();
        assert_eq!(
            banks,
            vec![BankId::new(1, 2), BankId::new(1, 9), BankId::new(2, 1)]
        );
    }
}
