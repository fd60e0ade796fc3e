//! Host collaborators
//!
//! The engine talks to the rest of the application only through the traits
//! in this module: bank configuration, the button surface (graphics and
//! indication), device paging and persistence. [`Host`] bundles one of each.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bank::BankId;
use crate::registry::InstanceRegistry;
use crate::status::Severity;

/// Button style as far as dispatch is concerned.
///
/// Stored as the style string of the button; any style that is not one of
/// the page buttons runs actions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BankStyle {
    #[default]
    Normal,
    PageUp,
    PageNumber,
    PageDown,
}

impl BankStyle {
    pub fn is_page_navigation(self) -> bool {
        !matches!(self, BankStyle::Normal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BankStyle::Normal => "normal",
            BankStyle::PageUp => "pageup",
            BankStyle::PageNumber => "pagenum",
            BankStyle::PageDown => "pagedown",
        }
    }
}

impl From<String> for BankStyle {
    fn from(style: String) -> Self {
        match style.as_str() {
            "pageup" => BankStyle::PageUp,
            "pagenum" => BankStyle::PageNumber,
            "pagedown" => BankStyle::PageDown,
            _ => BankStyle::Normal,
        }
    }
}

impl From<BankStyle> for String {
    fn from(style: BankStyle) -> Self {
        style.as_str().to_string()
    }
}

/// Dispatch-relevant configuration of a bank.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankConfig {
    #[serde(default)]
    pub latch: bool,
    #[serde(default)]
    pub style: BankStyle,
    /// Delays accumulate down the list instead of counting from the press.
    #[serde(default)]
    pub relative_delay: bool,
}

impl BankConfig {
    pub fn latching() -> Self {
        Self {
            latch: true,
            ..Self::default()
        }
    }

    pub fn with_style(style: BankStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }

    pub fn relative(mut self, relative_delay: bool) -> Self {
        self.relative_delay = relative_delay;
        self
    }
}

/// Source of bank configuration.
pub trait BankConfigSource: Send + Sync {
    fn bank_config(&self, bank: BankId) -> BankConfig;
}

/// The button surface: push indication, redraw requests and status display.
pub trait Surface: Send + Sync {
    fn indicate_push(&self, bank: BankId, pushed: bool, device_id: Option<&str>);

    /// Request a redraw of a bank.
    fn invalidate(&self, bank: BankId);

    fn is_pushed(&self, bank: BankId) -> bool;

    /// Aggregated status of a bank changed.
    fn bank_status_changed(&self, _bank: BankId, _severity: Severity) {}
}

/// Page navigation on a device.
pub trait Paging: Send + Sync {
    fn page_up(&self, device_id: Option<&str>);
    fn page_set(&self, device_id: Option<&str>, page: u32);
    fn page_down(&self, device_id: Option<&str>);
}

/// Key/value persistence. Writes are last-write-wins; `save` flushes.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn save(&self);
}

/// Everything the engine calls out to.
#[derive(Clone)]
pub struct Host {
    pub registry: Arc<dyn InstanceRegistry>,
    pub banks: Arc<dyn BankConfigSource>,
    pub surface: Arc<dyn Surface>,
    pub paging: Arc<dyn Paging>,
    pub persistence: Arc<dyn Persistence>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bank_config_from_json() {
        let config: BankConfig =
            serde_json::from_value(json!({"latch": true, "style": "pageup"})).unwrap();
        assert!(config.latch);
        assert_eq!(config.style, BankStyle::PageUp);
        assert!(!config.relative_delay);
    }

    #[test]
    fn test_unknown_style_is_normal() {
        let config: BankConfig = serde_json::from_value(json!({"style": "png"})).unwrap();
        assert_eq!(config.style, BankStyle::Normal);
        assert!(!config.style.is_page_navigation());
    }

    #[test]
    fn test_navigation_styles() {
        assert!(BankStyle::PageUp.is_page_navigation());
        assert!(BankStyle::PageNumber.is_page_navigation());
        assert!(BankStyle::PageDown.is_page_navigation());
    }
}
