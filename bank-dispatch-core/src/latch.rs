//! Latch and skip logic for button events
//!
//! [`LatchStateMachine::decide`] turns one press or release into a
//! [`LatchDecision`]: run the matching action list, navigate pages, or drop
//! the event. It owns the two pieces of per-bank state that make latching
//! buttons behave:
//!
//! - *skip-next*: the device whose next event on a latching bank is ignored.
//!   Armed by the press that latches the button, so the physical release that
//!   follows does not immediately unlatch it.
//! - *skip-up*: set when a bank is aborted with unlatch; the next release on
//!   a momentary bank is dropped once.

use std::collections::HashMap;

use tracing::debug;

use crate::bank::{BankId, Direction};
use crate::host::{BankConfig, BankStyle};

/// Page navigation requested by a page button.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageNav {
    Up,
    Set(u32),
    Down,
}

/// Why an event was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suppression {
    /// The release that follows a latching press from the same device.
    SkipNext,
    /// Press on a latching button that is already pushed.
    DuplicatePress,
    /// Release on a latching button that is not pushed.
    DuplicateRelease,
    /// First event, press or release, on a momentary button after an
    /// unlatching abort.
    SkipUp,
    /// Page buttons ignore releases.
    NavigationRelease,
}

/// What to do with a button event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LatchDecision {
    /// Indicate push state and run the list for `direction`.
    Run {
        direction: Direction,
        device_id: Option<String>,
    },
    Navigate {
        nav: PageNav,
        device_id: Option<String>,
    },
    Suppressed(Suppression),
}

#[derive(Debug, Default)]
struct BankLatch {
    skip_next: Option<String>,
    skip_up: bool,
}

impl BankLatch {
    fn is_idle(&self) -> bool {
        self.skip_next.is_none() && !self.skip_up
    }
}

/// Per-bank latch state.
#[derive(Debug)]
pub struct LatchStateMachine {
    banks: HashMap<BankId, BankLatch>,
    default_device: String,
    home_page: u32,
}

impl LatchStateMachine {
    /// `default_device` stands in for events that carry no device id on
    /// latching banks; `home_page` is the target of page-number buttons.
    pub fn new(default_device: impl Into<String>, home_page: u32) -> Self {
        Self {
            banks: HashMap::new(),
            default_device: default_device.into(),
            home_page,
        }
    }

    /// Decide how to handle one event. `is_pushed` is only queried for
    /// latching banks.
    pub fn decide<P>(
        &mut self,
        bank: BankId,
        direction: Direction,
        device_id: Option<&str>,
        config: &BankConfig,
        is_pushed: P,
    ) -> LatchDecision
    where
        P: FnOnce() -> bool,
    {
        let mut device_id = device_id.map(str::to_string);

        if config.latch {
            let device = device_id
                .get_or_insert_with(|| self.default_device.clone())
                .clone();
            let state = self.banks.entry(bank).or_default();

            if state.skip_next.as_deref() == Some(device.as_str()) {
                state.skip_next = None;
                self.forget_if_idle(bank);
                debug!(bank = %bank, device = %device, "Skipping release after latch");
                return LatchDecision::Suppressed(Suppression::SkipNext);
            }

            match (direction, is_pushed()) {
                (Direction::Press, false) => state.skip_next = Some(device),
                (Direction::Press, true) => {
                    return LatchDecision::Suppressed(Suppression::DuplicatePress)
                }
                (Direction::Release, false) => {
                    return LatchDecision::Suppressed(Suppression::DuplicateRelease)
                }
                (Direction::Release, true) => {}
            }
        }

        if let Some(state) = self.banks.get_mut(&bank) {
            if state.skip_up {
                state.skip_up = false;
                self.forget_if_idle(bank);
                if !config.latch {
                    debug!(bank = %bank, "Skipping release after abort");
                    return LatchDecision::Suppressed(Suppression::SkipUp);
                }
            }
        }

        let nav = match config.style {
            BankStyle::Normal => {
                return LatchDecision::Run {
                    direction,
                    device_id,
                }
            }
            BankStyle::PageUp => PageNav::Up,
            BankStyle::PageNumber => PageNav::Set(self.home_page),
            BankStyle::PageDown => PageNav::Down,
        };

        if direction.is_press() {
            LatchDecision::Navigate { nav, device_id }
        } else {
            LatchDecision::Suppressed(Suppression::NavigationRelease)
        }
    }

    /// Drop the next release on this bank (momentary banks only).
    pub fn set_skip_up(&mut self, bank: BankId) {
        self.banks.entry(bank).or_default().skip_up = true;
    }

    pub fn skip_up(&self, bank: BankId) -> bool {
        self.banks.get(&bank).is_some_and(|state| state.skip_up)
    }

    /// Device whose next event on `bank` will be skipped.
    pub fn skip_next(&self, bank: BankId) -> Option<&str> {
        self.banks.get(&bank)?.skip_next.as_deref()
    }

    fn forget_if_idle(&mut self, bank: BankId) {
        if self.banks.get(&bank).is_some_and(BankLatch::is_idle) {
            self.banks.remove(&bank);
        }
    }
}
