//! Result envelopes returned to the model.
//!
//! Every call produces a [`CallToolResult`].  Structured failures use the
//! [`ToolResponse`] error shape:
//!
//! ```json
//! {"ok": false, "error": {"code": "...", "message": "...", "blocked": true,
//!   "details": {...}, "recovery_hint": "...", "auto_recoverable": true}}
//! ```

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: impl Display) -> Self {
        Self {
            content: vec![Content::text(message.to_string())],
            is_error: true,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        Self::json_with_is_error(value, false)
    }

    pub fn json_with_is_error<T: Serialize>(value: &T, is_error: bool) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => Self {
                content: vec![Content::text(text)],
                is_error,
            },
            Err(err) => Self::error(format!("failed to encode result: {err}")),
        }
    }

    /// All text blocks joined by newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The text parsed as JSON, when it is JSON.
    pub fn json_content(&self) -> Option<Value> {
        serde_json::from_str(&self.text_content()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_recoverable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// A blocked operation.  `recovery_hint` and `auto_recoverable` found in
    /// `details` are also lifted onto the error itself.
    pub fn blocked(code: &str, message: impl Into<String>, details: Map<String, Value>) -> Self {
        let recovery_hint = details
            .get("recovery_hint")
            .and_then(Value::as_str)
            .map(str::to_string);
        let auto_recoverable = details.get("auto_recoverable").and_then(Value::as_bool);
        Self {
            ok: false,
            data: None,
            error: Some(ToolError {
                code: code.to_string(),
                message: message.into(),
                blocked: true,
                details,
                recovery_hint,
                auto_recoverable,
            }),
        }
    }

    /// A failure that was not a policy decision, e.g. cancellation.
    pub fn failed(code: &str, message: impl Into<String>, details: Map<String, Value>) -> Self {
        let mut resp = Self::blocked(code, message, details);
        if let Some(err) = resp.error.as_mut() {
            err.blocked = false;
        }
        resp
    }

    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

impl From<ToolResponse> for CallToolResult {
    fn from(resp: ToolResponse) -> Self {
        let is_error = !resp.ok;
        CallToolResult::json_with_is_error(&resp, is_error)
    }
}
