//! Command logging with pattern-based filtering and in-memory storage
//!
//! Provides configurable command logging using glob patterns to include or
//! exclude specific commands. Supports both tracing output and an in-memory
//! ring buffer that a transport can expose for diagnostics.
//!
//! # Example
//!
//! ```ignore
//! use bank_dispatch_core::command_log::{CommandFilter, CommandLogConfig, CommandLoggerMiddleware};
//!
//! // Log every mutating command (tracing only)
//! let middleware = CommandLoggerMiddleware::new(CommandFilter::default());
//!
//! // Keep the last 100 commands in memory as well
//! let middleware = CommandLoggerMiddleware::with_log(CommandLogConfig::default());
//! let log = middleware.log_handle();
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::bank::BankId;
use crate::command::Command;
use crate::middleware::Middleware;

/// Command name filter with glob patterns.
///
/// Patterns support `*` (any sequence) and `?` (any single character).
/// `Learn*` matches LearnSingle and LearnAction; `*Action` matches
/// AddAction, DeleteAction and LearnAction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandFilter {
    /// If non-empty, only log commands matching these patterns
    pub include: Vec<String>,
    /// Exclude commands matching these patterns (applied after include)
    pub exclude: Vec<String>,
}

impl Default for CommandFilter {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            // Read-only list queries are polled by every connected client
            exclude: vec!["ListActions".to_string()],
        }
    }
}

impl CommandFilter {
    /// Create a filter from comma-separated pattern strings.
    ///
    /// `None` for `exclude` keeps the default excludes.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        let split = |s: &str| -> Vec<String> {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            include: include.map(split).unwrap_or_default(),
            exclude: exclude.map(split).unwrap_or_else(|| Self::default().exclude),
        }
    }

    /// A filter that lets everything through.
    pub fn all() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn should_log(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| glob_match(p, name)) {
            return false;
        }
        !self.exclude.iter().any(|p| glob_match(p, name))
    }
}

/// An entry in the command log
#[derive(Debug, Clone)]
pub struct CommandLogEntry {
    pub name: &'static str,
    /// Debug rendering of the command
    pub summary: String,
    pub bank: Option<BankId>,
    /// Whether the command is one that edits action lists
    pub mutating: bool,
    pub timestamp: Instant,
    /// Sequence number for ordering
    pub sequence: u64,
    /// Whether the command changed an action list (set after handling)
    pub changed: Option<bool>,
}

/// Configuration for the command log ring buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandLogConfig {
    /// Maximum number of entries to keep
    pub capacity: usize,
    pub filter: CommandFilter,
}

impl Default for CommandLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            filter: CommandFilter::default(),
        }
    }
}

impl CommandLogConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

/// In-memory ring buffer of recent commands.
#[derive(Debug, Clone)]
pub struct CommandLog {
    entries: VecDeque<CommandLogEntry>,
    config: CommandLogConfig,
    next_sequence: u64,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new(CommandLogConfig::default())
    }
}

impl CommandLog {
    pub fn new(config: CommandLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Log a command if it passes the filter.
    ///
    /// Returns the entry if it was logged, None if filtered out.
    pub fn log<C: Command>(&mut self, command: &C) -> Option<&CommandLogEntry> {
        let name = command.name();
        if !self.config.filter.should_log(name) || self.config.capacity == 0 {
            return None;
        }

        let entry = CommandLogEntry {
            name,
            summary: format!("{command:?}"),
            bank: command.target_bank(),
            mutating: command.is_mutating(),
            timestamp: Instant::now(),
            sequence: self.next_sequence,
            changed: None,
        };
        self.next_sequence += 1;

        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.entries.back()
    }

    /// Update the last entry after the command was handled
    pub fn update_last_changed(&mut self, changed: bool) {
        if let Some(entry) = self.entries.back_mut() {
            entry.changed = Some(changed);
        }
    }

    /// All entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &CommandLogEntry> {
        self.entries.iter()
    }

    /// The most recent `count` entries, newest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &CommandLogEntry> {
        self.entries.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Command log shared between the runtime and whoever displays it.
pub type SharedCommandLog = Arc<Mutex<CommandLog>>;

/// Middleware that logs commands with configurable pattern filtering.
///
/// Logs via `tracing::debug!()` and, when created with
/// [`with_log`](Self::with_log), also records into a shared [`CommandLog`].
#[derive(Debug, Clone)]
pub struct CommandLoggerMiddleware {
    filter: CommandFilter,
    log: Option<SharedCommandLog>,
    /// Whether the last command made it into the log
    last_logged: bool,
}

impl CommandLoggerMiddleware {
    /// Tracing only, no in-memory storage
    pub fn new(filter: CommandFilter) -> Self {
        Self {
            filter,
            log: None,
            last_logged: false,
        }
    }

    pub fn with_log(config: CommandLogConfig) -> Self {
        Self {
            filter: config.filter.clone(),
            log: Some(Arc::new(Mutex::new(CommandLog::new(config)))),
            last_logged: false,
        }
    }

    /// Handle to the in-memory log, if storage is enabled
    pub fn log_handle(&self) -> Option<SharedCommandLog> {
        self.log.clone()
    }

    pub fn filter(&self) -> &CommandFilter {
        &self.filter
    }
}

impl<C: Command> Middleware<C> for CommandLoggerMiddleware {
    fn before(&mut self, command: &C) {
        let name = command.name();
        if self.filter.should_log(name) {
            let mutating = command.is_mutating();
            match command.target_bank() {
                Some(bank) => tracing::debug!(command = %name, bank = %bank, mutating, "command"),
                None => tracing::debug!(command = %name, mutating, "command"),
            }
        }

        self.last_logged = false;
        if let Some(log) = &self.log {
            let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
            self.last_logged = log.log(command).is_some();
        }
    }

    fn after(&mut self, _command: &C, changed: bool) {
        if !self.last_logged {
            return;
        }
        if let Some(log) = &self.log {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update_last_changed(changed);
        }
    }
}

/// Simple glob pattern matching supporting `*` and `?`.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some(&c) if c == '?' || c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                // Backtrack: let the last star swallow one more character
                Some((spi, sti)) => {
                    pi = spi + 1;
                    ti = sti + 1;
                    star = Some((spi, sti + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionId;
    use crate::bank::Direction;
    use crate::command::BankCommand;

    const BANK: BankId = BankId::new(1, 3);

    fn list() -> BankCommand {
        BankCommand::ListActions {
            bank: BANK,
            direction: Direction::Press,
        }
    }

    fn delete() -> BankCommand {
        BankCommand::DeleteAction {
            bank: BANK,
            direction: Direction::Press,
            id: ActionId::new("a"),
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("ResetBank", "ResetBank"));
        assert!(!glob_match("ResetBank", "Reset"));
        assert!(glob_match("Learn*", "LearnAction"));
        assert!(glob_match("*Action", "DeleteAction"));
        assert!(glob_match("*", ""));
        assert!(glob_match("Re?et*", "ResetBank"));
        assert!(glob_match("*a*b", "xxaxxb"));
        assert!(!glob_match("*a*b", "xxaxxc"));
    }

    #[test]
    fn test_filter_include_exclude() {
        let filter = CommandFilter::new(Some("*Action"), Some("Learn*"));
        assert!(filter.should_log("AddAction"));
        assert!(!filter.should_log("LearnAction"));
        assert!(!filter.should_log("Reorder"));
    }

    #[test]
    fn test_filter_default_excludes_list() {
        let filter = CommandFilter::default();
        assert!(!filter.should_log("ListActions"));
        assert!(filter.should_log("ResetBank"));
        assert!(CommandFilter::all().should_log("ListActions"));
    }

    #[test]
    fn test_log_capacity_and_order() {
        let mut log = CommandLog::new(CommandLogConfig {
            capacity: 2,
            filter: CommandFilter::all(),
        });
        log.log(&list());
        log.log(&delete());
        log.log(&BankCommand::ResetBank { bank: BANK });

        assert_eq!(log.len(), 2);
        let names: Vec<_> = log.recent(5).map(|e| e.name).collect();
        assert_eq!(names, vec!["ResetBank", "DeleteAction"]);
        assert_eq!(log.entries().next().unwrap().sequence, 1);
    }

    #[test]
    fn test_middleware_records_changed() {
        let mut middleware = CommandLoggerMiddleware::with_log(CommandLogConfig::default());
        let log = middleware.log_handle().unwrap();

        let command = delete();
        middleware.before(&command);
        middleware.after(&command, true);

        // Filtered commands must not touch the previous entry
        let command = list();
        middleware.before(&command);
        middleware.after(&command, false);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let entry = log.entries().next().unwrap();
        assert_eq!(entry.name, "DeleteAction");
        assert_eq!(entry.bank, Some(BANK));
        assert_eq!(entry.changed, Some(true));
    }

    #[test]
    fn test_entries_record_mutating() {
        let mut log = CommandLog::new(CommandLogConfig {
            capacity: 10,
            filter: CommandFilter::all(),
        });
        log.log(&list());
        log.log(&delete());
        log.log(&BankCommand::ActionDefaults {
            instance_id: "obs".into(),
            kind: "scene".into(),
        });

        let flags: Vec<_> = log.entries().map(|e| (e.name, e.mutating)).collect();
        assert_eq!(
            flags,
            vec![
                ("ListActions", false),
                ("DeleteAction", true),
                ("ActionDefaults", false)
            ]
        );
    }
}
