//! Tool surface shared by the executor and its front ends: parameter and
//! schema types, the `CallToolResult` envelope, typed argument access and a
//! registry generic over the context a tool runs in.

pub mod args;
pub mod result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use args::{ArgError, ToolArgs};
pub use result::{CallToolResult, Content, ToolError, ToolResponse};

// ── Tool trait and registry ──────────────────────────────────────────────────

/// JSON-friendly type hint for a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Whether a tool observes or changes infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolAccess {
    #[default]
    Read,
    Write,
    /// Some actions read, others write.
    Mixed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub access: ToolAccess,
    /// Hidden from listings when the control level forbids writes.
    pub require_control: bool,
}

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default)]
    pub param_type: ParamType,
    /// Allowed values when the parameter is an enum.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    /// Default value expressed as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ToolParam {
    /// Required string parameter.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            ..Self::default()
        }
    }

    /// Optional string parameter.
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn typed(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn schema(&self) -> serde_json::Value {
        let mut prop = serde_json::json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        });
        if !self.enum_values.is_empty() {
            prop["enum"] = serde_json::json!(self.enum_values);
        }
        if let Some(ref def) = self.default {
            // Defaults are stored as strings; emit them as their JSON type.
            prop["default"] = match self.param_type {
                ParamType::Number => def
                    .parse::<f64>()
                    .map(|n| serde_json::json!(n))
                    .unwrap_or_else(|_| serde_json::Value::String(def.clone())),
                ParamType::Integer => def
                    .parse::<i64>()
                    .map(|n| serde_json::json!(n))
                    .unwrap_or_else(|_| serde_json::Value::String(def.clone())),
                ParamType::Boolean => match def.as_str() {
                    "true" => serde_json::json!(true),
                    "false" => serde_json::json!(false),
                    _ => serde_json::Value::String(def.clone()),
                },
                ParamType::Array | ParamType::Object => serde_json::from_str(def)
                    .unwrap_or_else(|_| serde_json::Value::String(def.clone())),
                ParamType::String => serde_json::Value::String(def.clone()),
            };
        }
        prop
    }
}

/// Static description of a tool as the model sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
    #[serde(default)]
    pub metadata: ToolMetadata,
}

impl ToolSpec {
    /// The `inputSchema` object:
    ///
    /// ```json
    /// {
    ///   "type": "object",
    ///   "properties": { "action": { "type": "string", "enum": [...] } },
    ///   "required": ["action"]
    /// }
    /// ```
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<String> = Vec::new();

        for p in &self.params {
            properties.insert(p.name.clone(), p.schema());
            if p.required {
                required.push(p.name.clone());
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// `{name, description, inputSchema}` as listed to clients.
    pub fn to_tool_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

/// Implemented by every tool.  `C` is whatever the host passes to a call:
/// providers, session state, cancellation.
#[async_trait]
pub trait Tool<C: Send + Sync>: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// False when a backing provider is missing.
    fn is_available(&self, _cx: &C) -> bool {
        true
    }

    async fn call(&self, cx: &C, args: &ToolArgs) -> CallToolResult;
}

/// Ordered set of tools.  Lookups scan in registration order, so the first
/// tool registered under a name wins.
pub struct ToolRegistry<C> {
    tools: Vec<Box<dyn Tool<C>>>,
}

impl<C> Default for ToolRegistry<C> {
    fn default() -> Self {
        Self { tools: Vec::new() }
    }
}

impl<C: Send + Sync> ToolRegistry<C> {
    pub fn register(&mut self, tool: Box<dyn Tool<C>>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool<C>> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }

    /// Specs of tools that can run in `cx`.  Tools marked `require_control`
    /// are dropped unless `allow_control` is set.
    pub fn available_specs(&self, cx: &C, allow_control: bool) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .filter(|t| t.is_available(cx))
            .map(|t| t.spec())
            .filter(|spec| allow_control || !spec.metadata.require_control)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ── ToolRegistry tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod registry_tests {
    use super::*;

    /// Context for the test tools: which names are backed.
    struct Backed(Vec<&'static str>);

    struct DummyTool {
        name: String,
        control: bool,
    }

    impl DummyTool {
        fn boxed(name: &str, control: bool) -> Box<Self> {
            Box::new(Self {
                name: name.into(),
                control,
            })
        }
    }

    #[async_trait]
    impl Tool<Backed> for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("Dummy tool: {}", self.name),
                params: vec![ToolParam::required("input", "test param")],
                metadata: ToolMetadata {
                    access: if self.control { ToolAccess::Write } else { ToolAccess::Read },
                    require_control: self.control,
                },
            }
        }

        fn is_available(&self, cx: &Backed) -> bool {
            cx.0.contains(&self.name.as_str())
        }

        async fn call(&self, _cx: &Backed, args: &ToolArgs) -> CallToolResult {
            CallToolResult::text(format!("ran {} with {}", self.name, args.str("input").unwrap_or("-")))
        }
    }

    #[test]
    fn empty_registry() {
        let reg = ToolRegistry::<Backed>::default();
        assert!(reg.is_empty());
        assert!(reg.list_specs().is_empty());
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::default();
        reg.register(DummyTool::boxed("alpha", false));
        reg.register(DummyTool::boxed("beta", true));

        assert_eq!(reg.len(), 2);
        assert!(reg.get("alpha").is_some());
        assert!(reg.get("beta").is_some());
        assert!(reg.get("gamma").is_none());
    }

    #[test]
    fn available_specs_filters_backing_and_control() {
        let mut reg = ToolRegistry::default();
        reg.register(DummyTool::boxed("query", false));
        reg.register(DummyTool::boxed("control", true));
        reg.register(DummyTool::boxed("discovery", false));

        let cx = Backed(vec!["query", "control"]);
        let names = |specs: Vec<ToolSpec>| specs.into_iter().map(|s| s.name).collect::<Vec<_>>();

        assert_eq!(names(reg.available_specs(&cx, true)), vec!["query", "control"]);
        assert_eq!(names(reg.available_specs(&cx, false)), vec!["query"]);
    }

    #[tokio::test]
    async fn call_registered_tool() -> anyhow::Result<()> {
        let mut reg = ToolRegistry::default();
        reg.register(DummyTool::boxed("runner", false));

        let tool = reg.get("runner").expect("registered");
        let args = ToolArgs::from_value(serde_json::json!({"input": "x"}))?;
        let result = tool.call(&Backed(vec![]), &args).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "ran runner with x");
        Ok(())
    }

    /// Duplicate registration: the first tool wins on `get` (Vec + find).
    #[test]
    fn duplicate_name_get_returns_first_registered() {
        let mut reg = ToolRegistry::default();
        reg.register(DummyTool::boxed("dup", false));
        reg.register(DummyTool::boxed("dup", true));

        let dup_count = reg.list_specs().iter().filter(|s| s.name == "dup").count();
        assert_eq!(dup_count, 2, "both duplicates should appear in list_specs");

        let first = reg.get("dup").expect("registered").spec();
        assert!(!first.metadata.require_control);
    }

    #[test]
    fn input_schema_shape() {
        let spec = ToolSpec {
            name: "pulse_read".into(),
            description: "read things".into(),
            params: vec![
                ToolParam::required("action", "what to do").one_of(&["exec", "file"]),
                ToolParam::optional("lines", "line count")
                    .typed(ParamType::Integer)
                    .default_value("100"),
                ToolParam::optional("force", "skip locks")
                    .typed(ParamType::Boolean)
                    .default_value("false"),
            ],
            metadata: ToolMetadata::default(),
        };

        let schema = spec.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], serde_json::json!(["action"]));
        assert_eq!(schema["properties"]["action"]["enum"], serde_json::json!(["exec", "file"]));
        assert_eq!(schema["properties"]["lines"]["default"], serde_json::json!(100));
        assert_eq!(schema["properties"]["force"]["default"], serde_json::json!(false));

        let listed = spec.to_tool_json();
        assert_eq!(listed["name"], "pulse_read");
        assert_eq!(listed["inputSchema"], schema);
    }
}
