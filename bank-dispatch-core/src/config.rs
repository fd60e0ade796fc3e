//! Engine configuration
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration.
//!
//! ```ignore
//! let config = EngineConfig::from_json_str(r#"{ "learn_timeout_ms": 5000 }"#)?;
//! assert_eq!(config.learn_timeout(), Duration::from_secs(5));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command_log::CommandLogConfig;

/// Persistence keys the two action lists are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceKeys {
    pub press: String,
    pub release: String,
}

impl Default for PersistenceKeys {
    fn default() -> Self {
        Self {
            press: "bank_actions".to_string(),
            release: "bank_release_actions".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a learn request may take before its answer is discarded.
    pub learn_timeout_ms: u64,
    /// Device id assumed for latching events that carry none (web and OSC).
    pub default_device_id: String,
    pub persistence: PersistenceKeys,
    /// Buttons per page materialized on startup.
    pub max_buttons: u32,
    /// Target of page-number buttons.
    pub home_page: u32,
    pub command_log: CommandLogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            learn_timeout_ms: 2000,
            default_device_id: "osc-web".to_string(),
            persistence: PersistenceKeys::default(),
            max_buttons: 32,
            home_page: 1,
            command_log: CommandLogConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn learn_timeout(&self) -> Duration {
        Duration::from_millis(self.learn_timeout_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.learn_timeout(), Duration::from_millis(2000));
        assert_eq!(config.persistence.press, "bank_actions");
        assert_eq!(config.persistence.release, "bank_release_actions");
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json_str(
            r#"{
                "learn_timeout_ms": 500,
                "persistence": { "press": "down" },
                "command_log": { "capacity": 10, "filter": { "include": ["Learn*"] } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.learn_timeout_ms, 500);
        assert_eq!(config.persistence.press, "down");
        assert_eq!(config.persistence.release, "bank_release_actions");
        assert_eq!(config.command_log.capacity, 10);
        assert!(config.command_log.filter.should_log("LearnAction"));
        assert!(!config.command_log.filter.should_log("ResetBank"));
        assert_eq!(config.default_device_id, "osc-web");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            EngineConfig::from_json_str("{ nope"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            EngineConfig::from_path("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
