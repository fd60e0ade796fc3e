//! Transport commands
//!
//! A transport (web UI, OSC, tests) edits action lists by sending
//! [`BankCommand`]s to the engine. Every command is answered with a
//! [`Response`]; learn commands answer once the instance has replied or the
//! learn timeout elapsed.

use std::fmt::Debug;

use serde_json::Value;

use crate::action::{Action, ActionId, Options};
use crate::bank::{BankId, Direction};

/// Marker trait for transport commands.
///
/// Use `#[derive(Command)]` to implement it; the derive fills in all three
/// methods from the enum's variants.
pub trait Command: Debug + Send + 'static {
    /// Variant name, for logging and filtering.
    fn name(&self) -> &'static str;

    /// Whether the command edits action lists.
    fn is_mutating(&self) -> bool;

    /// The bank the command addresses, if any.
    fn target_bank(&self) -> Option<BankId>;
}

/// Operations a transport may perform on the action lists.
#[derive(crate::Command, Clone, Debug, PartialEq)]
pub enum BankCommand {
    ListActions {
        bank: BankId,
        direction: Direction,
    },
    #[command(mutating)]
    AddAction {
        bank: BankId,
        direction: Direction,
        instance_id: String,
        kind: String,
    },
    #[command(mutating)]
    DeleteAction {
        bank: BankId,
        direction: Direction,
        id: ActionId,
    },
    #[command(mutating)]
    UpdateDelay {
        bank: BankId,
        direction: Direction,
        id: ActionId,
        delay: u64,
    },
    #[command(mutating)]
    UpdateOption {
        bank: BankId,
        direction: Direction,
        id: ActionId,
        key: String,
        value: Value,
    },
    #[command(mutating)]
    Reorder {
        bank: BankId,
        direction: Direction,
        from: usize,
        to: usize,
    },
    #[command(mutating)]
    ResetBank {
        bank: BankId,
    },
    /// Build a template action without storing it.
    ActionDefaults {
        instance_id: String,
        kind: String,
    },
    /// Learn options for an action that is not stored in any list.
    LearnSingle {
        action: Action,
    },
    /// Learn options for a stored action and apply them.
    #[command(mutating)]
    LearnAction {
        bank: BankId,
        direction: Direction,
        id: ActionId,
    },
}

/// Answer to a [`BankCommand`].
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Snapshot of one list after the command ran.
    Actions(Vec<Action>),
    Defaults(Option<Action>),
    /// Result of a learn command. `options` is `None` when learning failed.
    Learned {
        id: Option<ActionId>,
        options: Option<Options>,
    },
    /// The command addressed something that does not exist.
    Ignored,
}

impl Response {
    pub fn actions(&self) -> Option<&[Action]> {
        match self {
            Response::Actions(actions) => Some(actions),
            _ => None,
        }
    }
}
