//! Middleware around command handling

use crate::command::Command;

/// Intercepts commands before and after the engine handles them.
///
/// Implement this trait to add logging, auditing or metrics around the
/// transport surface of the engine.
pub trait Middleware<C: Command>: Send {
    /// Called before the command is handled.
    fn before(&mut self, command: &C);

    /// Called after the command is handled. `changed` is true when the
    /// command modified an action list.
    fn after(&mut self, command: &C, changed: bool);
}

/// Logs every command through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    /// Whether to log before handling
    pub log_before: bool,
    /// Whether to log after handling
    pub log_after: bool,
}

impl LoggingMiddleware {
    /// Log after handling only.
    pub fn new() -> Self {
        Self {
            log_before: false,
            log_after: true,
        }
    }

    /// Log both before and after.
    pub fn verbose() -> Self {
        Self {
            log_before: true,
            log_after: true,
        }
    }
}

impl<C: Command> Middleware<C> for LoggingMiddleware {
    fn before(&mut self, command: &C) {
        if self.log_before {
            tracing::debug!(command = %command.name(), "Handling command");
        }
    }

    fn after(&mut self, command: &C, changed: bool) {
        if self.log_after {
            tracing::debug!(
                command = %command.name(),
                changed = changed,
                "Command handled"
            );
        }
    }
}

/// Compose multiple middleware into one. Empty composition does nothing.
pub struct ComposedMiddleware<C: Command> {
    middlewares: Vec<Box<dyn Middleware<C>>>,
}

impl<C: Command> std::fmt::Debug for ComposedMiddleware<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl<C: Command> Default for ComposedMiddleware<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> ComposedMiddleware<C> {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: Middleware<C> + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }
}

impl<C: Command> Middleware<C> for ComposedMiddleware<C> {
    fn before(&mut self, command: &C) {
        for middleware in &mut self.middlewares {
            middleware.before(command);
        }
    }

    fn after(&mut self, command: &C, changed: bool) {
        // Reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(command, changed);
        }
    }
}
