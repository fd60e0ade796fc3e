//! Core types and engine for bank-dispatch
//!
//! This crate turns button events from control surfaces into scheduled,
//! cancellable invocations of actions on external instances (device or
//! software connections).
//!
//! # Core Concepts
//!
//! - **Action**: one configured step on a button (instance, kind, options, delay)
//! - **ActionStore**: press and release lists per bank, with live-state tracking
//! - **LatchStateMachine**: latching buttons, skip-next and skip-up handling
//! - **DelayScheduler**: cancellable timers grouped per dispatch group
//! - **Engine**: everything above behind one `&mut self` API
//! - **EngineRuntime**: a loop that owns the engine and serializes its input
//!
//! # Basic Example
//!
//! ```ignore
//! use bank_dispatch_core::prelude::*;
//!
//! let host = Host {
//!     registry: instances.clone(),
//!     banks: bank_configs.clone(),
//!     surface: graphics.clone(),
//!     paging: devices.clone(),
//!     persistence: db.clone(),
//! };
//! let mut engine = Engine::new(host, EngineConfig::default())?;
//! engine.instances_loaded(instances.ids());
//!
//! engine.bank_pressed(BankId::new(1, 1), Direction::Press, Some("sd:1"))?;
//! ```
//!
//! # Runtime Pattern
//!
//! Timers and learn requests resolve asynchronously, so applications usually
//! hand the engine to an [`EngineRuntime`] and talk to it through
//! [`EngineHandle`]s:
//!
//! ```ignore
//! let runtime = EngineRuntime::new(engine);
//! let handle = runtime.handle();
//! tokio::spawn(runtime.run());
//!
//! // Button input
//! handle.press(bank, Direction::Press, Some("sd:1"))?;
//!
//! // Transport commands
//! let response = handle
//!     .request(BankCommand::AddAction { bank, direction, instance_id, kind })
//!     .await?;
//! ```
//!
//! Action handlers that need to change the engine (abort a button, edit a
//! list) keep a clone of the handle. Their requests are queued and handled
//! once the running dispatch returns.

extern crate self as bank_dispatch_core;

pub mod action;
pub mod bank;
pub mod command;
pub mod command_log;
pub mod config;
pub mod dispatcher;
pub mod effect;
pub mod engine;
pub mod error;
pub mod host;
pub mod latch;
pub mod learn;
pub mod middleware;
pub mod registry;
pub mod running;
pub mod runtime;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod subscription;
pub mod testing;

// Data model exports
pub use action::{Action, ActionId, Options};
pub use bank::{BankId, Direction, GroupKey, RunSource};

// Collaborator exports
pub use host::{BankConfig, BankConfigSource, BankStyle, Host, Paging, Persistence, Surface};
pub use registry::{
    ActionDefinition, Capabilities, ExecuteFuture, Execution, Instance, InstanceRegistry,
    LearnFuture, OptionSpec,
};

// Engine exports
pub use engine::{
    CommandReply, Engine, Handled, LearnResult, LearnTarget, PendingLearn, PressOutcome,
    RunSummary,
};
pub use latch::{LatchDecision, LatchStateMachine, PageNav, Suppression};
pub use runtime::{EngineHandle, EngineRuntime};
pub use scheduler::{effective_delays, DelayScheduler, Expired, TimerId};
pub use status::Severity;
pub use store::ActionStore;

// Command exports
pub use bank_dispatch_macros::Command;
pub use command::{BankCommand, Command, Response};
pub use command_log::{
    CommandFilter, CommandLog, CommandLogConfig, CommandLogEntry, CommandLoggerMiddleware,
    SharedCommandLog,
};
pub use middleware::{ComposedMiddleware, LoggingMiddleware, Middleware};

// Config and error exports
pub use config::{ConfigError, EngineConfig, PersistenceKeys};
pub use error::{ActionError, EngineError, LearnError};

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionId, Options};
    pub use crate::bank::{BankId, Direction, GroupKey, RunSource};
    pub use crate::command::{BankCommand, Command, Response};
    pub use crate::command_log::{CommandFilter, CommandLoggerMiddleware};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, PressOutcome};
    pub use crate::error::{ActionError, EngineError};
    pub use crate::host::{
        BankConfig, BankConfigSource, BankStyle, Host, Paging, Persistence, Surface,
    };
    pub use crate::middleware::{LoggingMiddleware, Middleware};
    pub use crate::registry::{
        ActionDefinition, Capabilities, Execution, Instance, InstanceRegistry, OptionSpec,
    };
    pub use crate::runtime::{EngineHandle, EngineRuntime};
}
