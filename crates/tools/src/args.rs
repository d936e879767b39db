//! Tool arguments.
//!
//! Models send loosely typed JSON objects.  Handlers parse them into their
//! own `Deserialize` records with [`ToolArgs::parse`]; the [`lenient`]
//! helpers accept the usual slop (`"101"` vs `101`).  Keys starting with `_`
//! belong to the execution envelope rather than the tool.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Envelope key carrying a previously granted approval.
pub const APPROVAL_ID_ARG: &str = "_approval_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("{0} is required")]
    Missing(String),
    #[error("invalid arguments: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// `null` is treated as no arguments.
    pub fn from_value(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            _ => Err(ArgError::NotAnObject),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty string value.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str, ArgError> {
        self.str(key).ok_or_else(|| ArgError::Missing(key.to_string()))
    }

    pub fn bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn int(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn approval_id(&self) -> Option<&str> {
        self.str(APPROVAL_ID_ARG)
    }

    /// Deserialize into a handler's parameter record.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ArgError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|err| ArgError::Invalid(err.to_string()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ToolArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// `deserialize_with` helpers for model-supplied values.
pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// A string, or a number rendered as one.  Empty strings become `None`.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    /// An integer, or a string holding one.  Anything else is `None`.
    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// `true`, or the string `"true"`.
    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct GuestParams {
        #[serde(default, deserialize_with = "lenient::string")]
        guest_id: Option<String>,
        #[serde(default, deserialize_with = "lenient::int")]
        lines: Option<i64>,
        #[serde(default, deserialize_with = "lenient::flag")]
        force: bool,
    }

    #[test]
    fn accessors() {
        let args = ToolArgs::from_value(json!({
            "command": "uptime",
            "empty": "",
            "force": true,
            "lines": "250",
            "_approval_id": "abc",
        }))
        .unwrap();

        assert_eq!(args.str("command"), Some("uptime"));
        assert_eq!(args.str("empty"), None);
        assert!(args.bool("force"));
        assert!(!args.bool("missing"));
        assert_eq!(args.int("lines", 100), 250);
        assert_eq!(args.int("missing", 100), 100);
        assert_eq!(args.approval_id(), Some("abc"));
        assert_eq!(args.require("target_host"), Err(ArgError::Missing("target_host".into())));
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert_eq!(ToolArgs::from_value(json!([1, 2])), Err(ArgError::NotAnObject));
        assert!(ToolArgs::from_value(Value::Null).unwrap().as_map().is_empty());
    }

    #[test]
    fn lenient_fields() {
        let args = ToolArgs::new()
            .with("guest_id", 101)
            .with("lines", "20")
            .with("force", "true");
        let params: GuestParams = args.parse().unwrap();
        assert_eq!(params.guest_id.as_deref(), Some("101"));
        assert_eq!(params.lines, Some(20));
        assert!(params.force);

        let params: GuestParams = ToolArgs::new().with("guest_id", "  ").parse().unwrap();
        assert!(params.guest_id.is_none());
        assert!(params.lines.is_none());
        assert!(!params.force);
    }
}
