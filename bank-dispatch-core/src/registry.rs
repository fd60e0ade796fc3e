//! Instance registry interface
//!
//! Instances are the installed device or software connections that actually
//! perform actions. The engine never owns them: it looks them up by id through
//! an [`InstanceRegistry`] every time it needs one, so an instance that is
//! removed or disabled takes effect immediately.
//!
//! Action definitions are capability-flagged. A definition reports which hooks
//! it implements through [`ActionDefinition::capabilities`], and every hook has
//! a no-op default, so call sites never need to check for a callback.
//!
//! # Example
//!
//! ```ignore
//! struct Cut;
//!
//! impl ActionDefinition for Cut {
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::EXECUTE
//!     }
//!
//!     fn execute(&self, action: &Action, _source: Option<&RunSource>) -> Execution {
//!         switcher.cut(action.options.get("me"));
//!         Execution::done()
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bitflags::bitflags;
use serde_json::Value;

use crate::action::{Action, Options};
use crate::bank::RunSource;
use crate::error::ActionError;
use crate::status::Severity;

/// Future returned by a deferred action execution.
pub type ExecuteFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send + 'static>>;

/// Future returned by a learn request. `Ok(None)` means the instance had
/// nothing to offer.
pub type LearnFuture =
    Pin<Box<dyn Future<Output = Result<Option<Options>, ActionError>> + Send + 'static>>;

bitflags! {
    /// Hooks an action definition implements.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const EXECUTE = 1 << 0;
        const SUBSCRIBE = 1 << 1;
        const UNSUBSCRIBE = 1 << 2;
        const LEARN = 1 << 3;
    }
}

/// Result of asking a definition to execute an action.
pub enum Execution {
    /// The handler finished synchronously.
    Complete(Result<(), ActionError>),
    /// The handler started work that finishes later. Failures are logged
    /// when the future resolves.
    Deferred(ExecuteFuture),
}

impl Execution {
    pub fn done() -> Self {
        Execution::Complete(Ok(()))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Execution::Complete(Err(ActionError::new(message)))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Execution::Deferred(Box::pin(future))
    }
}

impl From<Result<(), ActionError>> for Execution {
    fn from(result: Result<(), ActionError>) -> Self {
        Execution::Complete(result)
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Execution::Complete(result) => f.debug_tuple("Complete").field(result).finish(),
            Execution::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// One option in a definition's schema.
#[derive(Clone, Debug, PartialEq)]
pub struct OptionSpec {
    pub id: String,
    pub default: Value,
}

impl OptionSpec {
    pub fn new(id: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            default: default.into(),
        }
    }
}

/// Definition of one kind of action an instance offers.
pub trait ActionDefinition: Send + Sync {
    /// Hooks this definition implements.
    fn capabilities(&self) -> Capabilities;

    /// Option schema used to fill defaults on newly added actions.
    fn options(&self) -> &[OptionSpec] {
        &[]
    }

    fn execute(&self, _action: &Action, _source: Option<&RunSource>) -> Execution {
        Execution::done()
    }

    /// Called when an action becomes live (added, edited, activated).
    fn subscribe(&self, _action: &Action) {}

    /// Called when a live action is edited, removed or pruned.
    fn unsubscribe(&self, _action: &Action) {}

    /// Read option values from the live device. Receives its own copy of
    /// the action.
    fn learn(&self, _action: Action) -> LearnFuture {
        Box::pin(async { Ok(None) })
    }

    fn has_execute(&self) -> bool {
        self.capabilities().contains(Capabilities::EXECUTE)
    }

    fn has_subscribe(&self) -> bool {
        self.capabilities().contains(Capabilities::SUBSCRIBE)
    }

    fn has_unsubscribe(&self) -> bool {
        self.capabilities().contains(Capabilities::UNSUBSCRIBE)
    }

    fn has_learn(&self) -> bool {
        self.capabilities().contains(Capabilities::LEARN)
    }
}

/// A registered instance.
pub trait Instance: Send + Sync {
    /// Human readable name used in logs.
    fn label(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Current status level (0 = ok, higher = worse).
    fn status(&self) -> Severity;

    fn definition(&self, kind: &str) -> Option<Arc<dyn ActionDefinition>>;

    /// Instance-wide handler used when the definition does not execute.
    ///
    /// Returns `None` when the instance has no such handler.
    fn execute(&self, _action: &Action, _source: Option<&RunSource>) -> Option<Execution> {
        None
    }
}

/// Lookup of instances by id.
pub trait InstanceRegistry: Send + Sync {
    fn instance(&self, id: &str) -> Option<Arc<dyn Instance>>;

    fn definition(&self, instance_id: &str, kind: &str) -> Option<Arc<dyn ActionDefinition>> {
        self.instance(instance_id)?.definition(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl ActionDefinition for Plain {
        fn capabilities(&self) -> Capabilities {
            Capabilities::EXECUTE | Capabilities::LEARN
        }
    }

    #[test]
    fn test_capability_queries() {
        let def = Plain;
        assert!(def.has_execute());
        assert!(def.has_learn());
        assert!(!def.has_subscribe());
        assert!(!def.has_unsubscribe());
    }

    #[tokio::test]
    async fn test_default_learn_offers_nothing() {
        let def = Plain;
        let result = def.learn(Action::new("i", "k")).await;
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_execution_from_result() {
        let exec: Execution = Err(ActionError::new("offline")).into();
        assert!(matches!(exec, Execution::Complete(Err(e)) if e.message() == "offline"));
    }
}
