//! Configured button actions
//!
//! An [`Action`] is one entry in a bank's press or release list: a reference
//! to an instance, the kind of action that instance should perform, the
//! user's option values and an optional delay.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Option values of an action, keyed by option id.
pub type Options = serde_json::Map<String, Value>;

/// Opaque identity of an action, unique within the list that holds it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configured action on a button.
///
/// The serialized field names (`instance`, `action`) match the persisted
/// layout of action lists, so stored configurations load unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "instance")]
    pub instance_id: String,
    #[serde(rename = "action")]
    pub kind: String,
    #[serde(default)]
    pub options: Options,
    /// User delay in milliseconds.
    #[serde(default, deserialize_with = "lenient_delay")]
    pub delay: u64,
}

impl Action {
    /// Create an action with a generated id and no options.
    pub fn new(instance_id: impl Into<String>, kind: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        let kind = kind.into();
        Self {
            id: ActionId::generate(),
            label: format!("{instance_id}:{kind}"),
            instance_id,
            kind,
            options: Options::new(),
            delay: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<ActionId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Accepts delays stored as numbers, numeric strings, empty strings or null.
///
/// Older configurations saved the delay field straight from a text input, so
/// `""` and `"250"` both occur in the wild. Anything unparsable counts as no
/// delay, and so does a negative number.
fn lenient_delay<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => leading_integer(&s),
        _ => 0,
    })
}

fn leading_integer(s: &str) -> u64 {
    let digits: String = s
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_action_label() {
        let action = Action::new("obs", "scene");
        assert_eq!(action.label, "obs:scene");
        assert_eq!(action.delay, 0);
        assert!(action.options.is_empty());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(ActionId::generate(), ActionId::generate());
    }

    #[test]
    fn test_persisted_layout() {
        let action = Action::new("atem", "cut")
            .with_id("a1")
            .with_delay(40)
            .with_option("me", 1);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["instance"], "atem");
        assert_eq!(value["action"], "cut");
        assert_eq!(value["id"], "a1");
        assert_eq!(value["delay"], 40);
        assert!(value.get("effective_delay").is_none());
    }

    #[test]
    fn test_lenient_delay() {
        let parse = |delay: Value| -> u64 {
            let raw = json!({"id": "x", "instance": "i", "action": "k", "delay": delay});
            serde_json::from_value::<Action>(raw).unwrap().delay
        };
        assert_eq!(parse(json!(250)), 250);
        assert_eq!(parse(json!("250")), 250);
        assert_eq!(parse(json!("")), 0);
        assert_eq!(parse(json!("12ms")), 12);
        assert_eq!(parse(json!(null)), 0);
        assert_eq!(parse(json!(-5)), 0);
    }

    #[test]
    fn test_missing_delay_and_options() {
        let raw = json!({"id": "x", "instance": "i", "action": "k"});
        let action: Action = serde_json::from_value(raw).unwrap();
        assert_eq!(action.delay, 0);
        assert!(action.options.is_empty());
        assert_eq!(action.label, "");
    }
}
