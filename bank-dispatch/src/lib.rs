//! bank-dispatch: scheduled, cancellable actions for control-surface buttons
//!
//! Buttons carry a press list and a release list of actions. Pressing a
//! button runs its list against external instances, immediately or after a
//! per-action delay; latching buttons, page buttons and aborts are handled
//! on the way.
//!
//! # Example
//! ```ignore
//! use bank_dispatch::prelude::*;
//!
//! let mut engine = Engine::new(host, EngineConfig::default())?;
//! engine.instances_loaded(registry.ids());
//!
//! let runtime = EngineRuntime::new(engine);
//! let handle = runtime.handle();
//! tokio::spawn(runtime.run());
//!
//! handle.press(BankId::new(1, 1), Direction::Press, Some("sd:1"))?;
//! ```

// Re-export everything from core, including the `Command` derive
pub use bank_dispatch_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Data model
    pub use bank_dispatch_core::{Action, ActionId, BankId, Direction, GroupKey, Options, RunSource};

    // Collaborators
    pub use bank_dispatch_core::{
        ActionDefinition, BankConfig, BankConfigSource, BankStyle, Capabilities, Execution, Host,
        Instance, InstanceRegistry, OptionSpec, Paging, Persistence, Surface,
    };

    // Engine
    pub use bank_dispatch_core::{
        EngineConfig, Engine, EngineError, EngineHandle, EngineRuntime, PressOutcome,
    };

    // Commands
    pub use bank_dispatch_core::{
        BankCommand, CommandFilter, CommandLoggerMiddleware, LoggingMiddleware, Middleware,
        Response,
    };

    // Derive macros and the trait they implement
    pub use bank_dispatch_core::Command;
}
