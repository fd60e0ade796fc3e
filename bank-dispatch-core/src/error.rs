//! Error types

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the engine and its runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("instance registry is not ready: dispatch refused")]
    NotReady,

    #[error("engine runtime has stopped")]
    RuntimeClosed,

    #[error("failed to decode persisted '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reported by an instance while executing or learning an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a learn request produced no options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LearnError {
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error(transparent)]
    Rejected(#[from] ActionError),

    #[error("no new options")]
    NoOptions,

    #[error("action does not support learning")]
    Unsupported,
}
