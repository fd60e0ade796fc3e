//! Single-action execution
//!
//! [`run_action`] resolves an action's instance and definition at call time
//! and invokes the handler. Nothing here is fatal: a missing instance, a
//! disabled one, or a missing handler is logged and skipped, and handler
//! failures (errors and panics alike) are logged against the instance label.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::action::Action;
use crate::bank::RunSource;
use crate::registry::{Execution, InstanceRegistry};

/// Why an action was not executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    MissingInstance,
    Disabled,
    NoHandler,
}

/// What happened to one action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler completed successfully.
    Executed,
    /// The handler returned deferred work; it runs on a spawned task.
    Deferred,
    /// The handler reported a failure (already logged).
    Failed,
    Skipped(SkipReason),
}

/// Whether the action's instance exists and is enabled right now.
pub fn is_runnable(registry: &dyn InstanceRegistry, action: &Action) -> bool {
    registry
        .instance(&action.instance_id)
        .is_some_and(|instance| instance.is_enabled())
}

/// Execute one action.
///
/// Deferred executions are spawned onto the current tokio runtime, so this
/// must be called from within one when a handler may defer.
pub fn run_action(
    registry: &dyn InstanceRegistry,
    action: &Action,
    source: Option<&RunSource>,
) -> DispatchOutcome {
    let Some(instance) = registry.instance(&action.instance_id) else {
        debug!(
            action = %action.id,
            instance = %action.instance_id,
            "Trying to run action on a missing instance"
        );
        return DispatchOutcome::Skipped(SkipReason::MissingInstance);
    };
    if !instance.is_enabled() {
        debug!(action = %action.id, instance = %instance.label(), "Instance disabled, not running action");
        return DispatchOutcome::Skipped(SkipReason::Disabled);
    }

    let definition = instance
        .definition(&action.kind)
        .filter(|definition| definition.has_execute());
    let execution = catch_unwind(AssertUnwindSafe(|| match &definition {
        Some(definition) => Some(definition.execute(action, source)),
        None => instance.execute(action, source),
    }));
    let execution = match execution {
        Ok(execution) => execution,
        Err(payload) => {
            warn!(
                instance = %instance.label(),
                kind = %action.kind,
                panic = %panic_message(payload.as_ref()),
                "Action handler panicked"
            );
            return DispatchOutcome::Failed;
        }
    };
    let Some(execution) = execution else {
        warn!(
            instance = %instance.label(),
            kind = %action.kind,
            "Instance has no handler for action"
        );
        return DispatchOutcome::Skipped(SkipReason::NoHandler);
    };

    match execution {
        Execution::Complete(Ok(())) => DispatchOutcome::Executed,
        Execution::Complete(Err(err)) => {
            warn!(instance = %instance.label(), kind = %action.kind, error = %err, "Error executing action");
            DispatchOutcome::Failed
        }
        Execution::Deferred(future) => {
            let label = instance.label().to_string();
            let kind = action.kind.clone();
            tokio::spawn(async move {
                if let Err(err) = future.await {
                    warn!(instance = %label, kind = %kind, error = %err, "Error executing action");
                }
            });
            DispatchOutcome::Deferred
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
