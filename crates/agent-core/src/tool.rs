//! Tool System
//!
//! Uniform descriptor and invocation wrapper for every capability, whether
//! built in, backed by a sub-agent, or discovered on an external tool server.
//! Tools are registered at runtime; each loop execution works against an
//! immutable [`ToolSnapshot`].

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{AgentError, Result};

/// Argument mapping passed to a tool
pub type Arguments = HashMap<String, Value>;

/// Generate a fresh call identifier
pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID correlating the request with its tool_result
    #[serde(default = "new_call_id")]
    pub id: String,

    /// Tool identifier
    #[serde(alias = "tool")]
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Arguments,

    /// Set when the model's raw arguments could not be decoded
    #[serde(skip)]
    pub argument_error: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_call_id(),
            name: name.into(),
            arguments: Arguments::new(),
            argument_error: None,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Mark the call as carrying arguments that failed to decode
    pub fn with_argument_error(mut self, error: impl Into<String>) -> Self {
        self.argument_error = Some(error.into());
        self
    }
}

/// Invocation record for one requested call within a model turn
#[derive(Debug)]
pub struct ToolResult {
    /// Call ID from the request
    pub call_id: String,

    /// Tool that was called
    pub name: String,

    /// Output text or the failure
    pub outcome: Result<String>,

    /// Wall time spent in the tool
    pub elapsed: Duration,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Text folded into the conversation as the tool_result content
    pub fn content(&self) -> String {
        match &self.outcome {
            Ok(output) => output.clone(),
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// Argument kind understood by the generic validator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    /// Objects and unknown schema types pass through unchecked
    Any,
}

impl FieldKind {
    /// Map a JSON Schema `type` keyword
    pub fn from_json_type(ty: Option<&str>) -> Self {
        match ty {
            Some("integer") => FieldKind::Integer,
            Some("number") => FieldKind::Number,
            Some("boolean") => FieldKind::Boolean,
            Some("array") => FieldKind::Array,
            Some("string") | None => FieldKind::String,
            Some(_) => FieldKind::Any,
        }
    }

    pub fn json_type(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Any => "object",
        }
    }

    /// Coerce a value into this kind, or describe why it cannot be
    fn coerce(self, value: Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (FieldKind::Any, v) => Ok(v),
            (FieldKind::String, Value::String(s)) => Ok(Value::String(s)),
            (FieldKind::String, v @ (Value::Number(_) | Value::Bool(_))) => Ok(Value::String(v.to_string())),
            (FieldKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            (FieldKind::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(format!("expected integer, got {}", n)),
            },
            (FieldKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected integer, got '{}'", s)),
            (FieldKind::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (FieldKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected number, got '{}'", s)),
            (FieldKind::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (FieldKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got '{}'", s)),
            },
            (FieldKind::Array, Value::Array(items)) => Ok(Value::Array(items)),
            (FieldKind::Array, Value::String(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Array(items)) => Ok(Value::Array(items)),
                _ => Ok(Value::Array(vec![Value::String(s)])),
            },
            (kind, v) => Err(format!("expected {}, got {}", kind.json_type(), v)),
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// Argument kind
    pub kind: FieldKind,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// Build a schema from a JSON Schema object (`properties` + `required`)
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: &Value,
    ) -> Self {
        let required: Vec<&str> = input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let parameters = input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(prop, spec)| ParameterSchema {
                        name: prop.clone(),
                        kind: FieldKind::from_json_type(spec.get("type").and_then(Value::as_str)),
                        description: spec
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        required: required.contains(&prop.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Render as a JSON Schema object (for native function calling)
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                let mut spec = serde_json::json!({ "description": p.description });
                if p.kind != FieldKind::Any {
                    spec["type"] = Value::from(p.kind.json_type());
                }
                (p.name.clone(), spec)
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate required fields and coerce declared kinds.
    ///
    /// Undeclared arguments pass through untouched.
    pub fn coerce_arguments(&self, mut arguments: Arguments) -> Result<Arguments> {
        for param in &self.parameters {
            match arguments.remove(&param.name) {
                Some(Value::Null) | None if param.required => {
                    return Err(AgentError::ToolValidation(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
                Some(Value::Null) | None => {}
                Some(value) => {
                    let coerced = param.kind.coerce(value).map_err(|e| {
                        AgentError::ToolValidation(format!("Parameter '{}': {}", param.name, e))
                    })?;
                    arguments.insert(param.name.clone(), coerced);
                }
            }
        }
        Ok(arguments)
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Invoke the tool with already-validated arguments
    async fn invoke(&self, arguments: &Arguments) -> Result<String>;
}

/// Registry for available tools.
///
/// Names are unique; registering an existing name replaces the old entry
/// in place (last-registered wins) and logs a warning.
pub struct ToolRegistry {
    tools: RwLock<Vec<(String, Arc<dyn Tool>)>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());

        if let Some(slot) = tools.iter_mut().find(|(existing, _)| *existing == name) {
            tracing::warn!(tool = %name, "Tool name collision, replacing earlier registration");
            slot.1 = tool;
        } else {
            tools.push((name, tool));
        }
    }

    /// Remove a tool by name
    pub fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        let before = tools.len();
        tools.retain(|(existing, _)| existing != name);
        before != tools.len()
    }

    /// Immutable view for one loop execution
    pub fn snapshot(&self) -> ToolSnapshot {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        ToolSnapshot::new(tools.iter().map(|(_, t)| Arc::clone(t)).collect())
    }

    /// Get tool names in registration order
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descriptors valid for the duration of one loop execution
#[derive(Clone)]
pub struct ToolSnapshot {
    tools: Arc<[Arc<dyn Tool>]>,
    schemas: Arc<[ToolSchema]>,
}

impl ToolSnapshot {
    fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let schemas: Vec<ToolSchema> = tools.iter().map(|t| t.schema()).collect();
        Self {
            tools: tools.into(),
            schemas: schemas.into(),
        }
    }

    /// Snapshot with no tools
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.schemas
            .iter()
            .position(|s| s.name == name)
            .map(|idx| &self.tools[idx])
    }

    /// Get all tool schemas (for system prompt generation)
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call.
    ///
    /// Never fails: unknown names, invalid arguments, errors and panics all
    /// come back as the record's `outcome`.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let outcome = match self.schemas.iter().position(|s| s.name == call.name) {
            None => Err(AgentError::ToolNotFound(call.name.clone())),
            Some(idx) => {
                let tool = &self.tools[idx];
                let arguments = match &call.argument_error {
                    Some(e) => Err(AgentError::ToolValidation(format!("Invalid arguments JSON: {}", e))),
                    None => self.schemas[idx].coerce_arguments(call.arguments.clone()),
                };
                match arguments {
                    Err(e) => Err(e),
                    Ok(arguments) => match AssertUnwindSafe(tool.invoke(&arguments)).catch_unwind().await {
                        Ok(Ok(output)) => Ok(output),
                        Ok(Err(e)) if e.is_tool_level() => Err(e),
                        Ok(Err(e)) => Err(AgentError::tool_failed(&call.name, e)),
                        Err(panic) => Err(AgentError::tool_failed(&call.name, panic_message(panic.as_ref()))),
                    },
                }
            }
        };

        if let Err(e) = &outcome {
            tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
        }

        ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("tool panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("tool panicked: {}", s)
    } else {
        "tool panicked".into()
    }
}

// ============================================================================
// Text tool-call protocol
// ============================================================================

const TOOL_BLOCK_START: &str = "```tool";
const TOOL_BLOCK_END: &str = "```";

/// Generate system prompt section describing available tools
pub fn prompt_section(schemas: &[ToolSchema]) -> String {
    let mut prompt = String::from("## Available Tools\n\n");
    prompt.push_str("You can use the following tools by responding with one JSON block per call:\n\n");
    prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");
    prompt.push_str("Several blocks in one reply run together. Answer in plain text when no tool is needed.\n\n");

    for schema in schemas {
        prompt.push_str(&format!("### {}\n", schema.name));
        prompt.push_str(&format!("{}\n", schema.description));

        if !schema.parameters.is_empty() {
            prompt.push_str("**Parameters:**\n");
            for param in &schema.parameters {
                let required = if param.required { " (required)" } else { "" };
                prompt.push_str(&format!(
                    "- `{}` ({}){}: {}\n",
                    param.name,
                    param.kind.json_type(),
                    required,
                    param.description
                ));
            }
        }
        prompt.push('\n');
    }

    prompt
}

/// Render a call in the text protocol
pub fn render_tool_block(call: &ToolCall) -> String {
    let body = serde_json::json!({ "tool": call.name, "arguments": call.arguments });
    format!("{}\n{}\n{}", TOOL_BLOCK_START, body, TOOL_BLOCK_END)
}

/// Parse every ```tool block from a model response
pub fn parse_tool_blocks(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;

    while let Some(start_idx) = rest.find(TOOL_BLOCK_START) {
        let after_marker = &rest[start_idx + TOOL_BLOCK_START.len()..];
        let Some(end_idx) = after_marker.find(TOOL_BLOCK_END) else {
            break;
        };
        let json_str = after_marker[..end_idx].trim();
        match serde_json::from_str::<ToolCall>(json_str) {
            Ok(call) => calls.push(call),
            Err(e) => tracing::debug!(error = %e, "Ignoring malformed tool block"),
        }
        rest = &after_marker[end_idx + TOOL_BLOCK_END.len()..];
    }

    if calls.is_empty() {
        calls.extend(parse_inline_tool_call(content));
    }
    calls
}

/// Text with all ```tool blocks removed
pub fn strip_tool_blocks(content: &str) -> String {
    let mut out = String::new();
    let mut rest = content;
    while let Some(start_idx) = rest.find(TOOL_BLOCK_START) {
        out.push_str(&rest[..start_idx]);
        let after_marker = &rest[start_idx + TOOL_BLOCK_START.len()..];
        match after_marker.find(TOOL_BLOCK_END) {
            Some(end_idx) => rest = &after_marker[end_idx + TOOL_BLOCK_END.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Try to parse a bare JSON object with a "tool" key
fn parse_inline_tool_call(content: &str) -> Option<ToolCall> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<ToolCall>(&content[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{CalculatorTool, DateTimeTool};

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "flaky".into(),
                description: "Always fails".into(),
                parameters: vec![],
            }
        }

        async fn invoke(&self, _arguments: &Arguments) -> Result<String> {
            Err(AgentError::Other("backend exploded".into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "panicky".into(),
                description: "Panics".into(),
                parameters: vec![],
            }
        }

        async fn invoke(&self, _arguments: &Arguments) -> Result<String> {
            panic!("index out of bounds")
        }
    }

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.0.into(),
                description: "test".into(),
                parameters: vec![],
            }
        }

        async fn invoke(&self, _arguments: &Arguments) -> Result<String> {
            Ok(self.1.into())
        }
    }

    #[test]
    fn test_tool_registry() {
        let registry = ToolRegistry::new();
        registry.register(DateTimeTool);
        registry.register(CalculatorTool);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("datetime").is_some());
        assert!(snapshot.get("calculate").is_some());
        assert!(snapshot.get("unknown").is_none());
    }

    #[tokio::test]
    async fn test_collision_is_last_registered_wins() {
        let registry = ToolRegistry::new();
        registry.register(Named("echo", "first"));
        registry.register(Named("other", "x"));
        registry.register(Named("echo", "second"));

        assert_eq!(registry.names(), vec!["echo".to_string(), "other".to_string()]);
        let result = registry.snapshot().invoke(&ToolCall::new("echo")).await;
        assert_eq!(result.outcome.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_registrations() {
        let registry = ToolRegistry::new();
        let snapshot = registry.snapshot();
        registry.register(Named("late", "x"));

        assert!(snapshot.is_empty());
        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.unregister("late"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_result_not_a_panic() {
        let result = ToolSnapshot::empty().invoke(&ToolCall::new("missing")).await;
        assert!(matches!(result.outcome, Err(AgentError::ToolNotFound(ref n)) if n == "missing"));
        assert!(result.content().contains("missing"));
    }

    #[tokio::test]
    async fn test_failures_and_panics_become_execution_failed() {
        let registry = ToolRegistry::new();
        registry.register(FailingTool);
        registry.register(PanickingTool);
        let snapshot = registry.snapshot();

        let failed = snapshot.invoke(&ToolCall::new("flaky")).await;
        assert!(matches!(failed.outcome, Err(AgentError::ToolExecutionFailed { ref tool, .. }) if tool == "flaky"));

        let panicked = snapshot.invoke(&ToolCall::new("panicky")).await;
        match panicked.outcome {
            Err(AgentError::ToolExecutionFailed { tool, message }) => {
                assert_eq!(tool, "panicky");
                assert!(message.contains("index out of bounds"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_arguments_are_a_validation_error() {
        let registry = ToolRegistry::new();
        registry.register(CalculatorTool);
        let snapshot = registry.snapshot();

        let call = ToolCall::new("calculate").with_argument_error("EOF while parsing a string");
        let result = snapshot.invoke(&call).await;
        assert!(matches!(result.outcome, Err(AgentError::ToolValidation(ref m)) if m.contains("EOF while parsing")));
        assert!(result.content().starts_with("Error:"));
    }

    #[test]
    fn test_schema_from_json_schema() {
        let schema = ToolSchema::from_json_schema(
            "search",
            "Search things",
            &serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to find"},
                    "limit": {"type": "integer"},
                    "filters": {"type": "object"}
                },
                "required": ["query"]
            }),
        );

        let query = schema.parameters.iter().find(|p| p.name == "query").unwrap();
        assert!(query.required);
        assert_eq!(query.description, "What to find");
        let limit = schema.parameters.iter().find(|p| p.name == "limit").unwrap();
        assert_eq!(limit.kind, FieldKind::Integer);
        assert!(!limit.required);
        let filters = schema.parameters.iter().find(|p| p.name == "filters").unwrap();
        assert_eq!(filters.kind, FieldKind::Any);
    }

    #[test]
    fn test_coerce_arguments() {
        let schema = ToolSchema {
            name: "t".into(),
            description: String::new(),
            parameters: vec![
                ParameterSchema::required("count", FieldKind::Integer, ""),
                ParameterSchema::optional("verbose", FieldKind::Boolean, ""),
                ParameterSchema::optional("tags", FieldKind::Array, ""),
            ],
        };

        let args: Arguments = serde_json::from_value(serde_json::json!({
            "count": "5", "verbose": "true", "tags": "solo", "extra": 1
        }))
        .unwrap();
        let coerced = schema.coerce_arguments(args).unwrap();
        assert_eq!(coerced["count"], 5);
        assert_eq!(coerced["verbose"], true);
        assert_eq!(coerced["tags"], serde_json::json!(["solo"]));
        assert_eq!(coerced["extra"], 1);

        let missing = schema.coerce_arguments(Arguments::new());
        assert!(matches!(missing, Err(AgentError::ToolValidation(_))));

        let bad: Arguments = serde_json::from_value(serde_json::json!({"count": "many"})).unwrap();
        assert!(schema.coerce_arguments(bad).is_err());
    }

    #[test]
    fn test_parse_multiple_tool_blocks() {
        let content = r#"Let me check both.
```tool
{"tool": "calculate", "arguments": {"expression": "2 + 2"}}
```
```tool
{"tool": "datetime", "arguments": {}}
```"#;

        let calls = parse_tool_blocks(content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "calculate");
        assert_eq!(calls[0].arguments["expression"], "2 + 2");
        assert_eq!(calls[1].name, "datetime");
        assert_ne!(calls[0].id, calls[1].id);
        assert_eq!(strip_tool_blocks(content), "Let me check both.");
    }

    #[test]
    fn test_parse_inline_and_plain_text() {
        let inline = r#"{"tool": "datetime", "arguments": {"format": "iso"}}"#;
        assert_eq!(parse_tool_blocks(inline).len(), 1);
        assert!(parse_tool_blocks("The answer is 4.").is_empty());
    }

    #[test]
    fn test_render_round_trips_through_parser() {
        let call = ToolCall::new("calculate").with_arg("expression", "1+1");
        let parsed = parse_tool_blocks(&render_tool_block(&call));
        assert_eq!(parsed[0].name, "calculate");
        assert_eq!(parsed[0].arguments, call.arguments);
    }
}
