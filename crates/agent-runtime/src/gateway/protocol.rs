//! Line-delimited JSON-RPC messages exchanged with external tool sources.
//!
//! - **Requests**: gateway → source (`tools/list`, `tools/call`, ...)
//! - **Responses**: source → gateway, correlated by `id`
//! - **Notifications**: either direction, no `id`, no response
//!
//! Lenient sources answer with bare objects (`{"tools": [...]}`) that carry
//! neither `id` nor a `result` wrapper; see [`classify`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{GatewayError, Result};

/// Protocol revision announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC notification
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Tool advertised by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema of the arguments
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Resource advertised by `resources/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub uri: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Kind of a line read from a source
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Response to the request with this id
    Response(u64),
    /// Response without an id; belongs to the oldest pending request
    Unkeyed,
    /// Notification or server-initiated request
    Notification(String),
}

pub fn classify(message: &Value) -> Incoming {
    if let Some(method) = message.get("method").and_then(Value::as_str) {
        return Incoming::Notification(method.to_string());
    }
    match message.get("id").and_then(Value::as_u64) {
        Some(id) => Incoming::Response(id),
        None => Incoming::Unkeyed,
    }
}

/// Whether the source wrapped its answer in a JSON-RPC envelope
pub fn is_enveloped(message: &Value) -> bool {
    message.get("jsonrpc").is_some()
}

/// Extract the payload of a response, turning `error` into [`GatewayError::Rpc`]
pub fn into_result(mut message: Value) -> Result<Value> {
    if let Some(error) = message.get("error") {
        return Err(rpc_error(error));
    }
    match message.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Ok(message),
    }
}

fn rpc_error(error: &Value) -> GatewayError {
    match error {
        Value::String(message) => GatewayError::Rpc {
            code: 0,
            message: message.clone(),
        },
        Value::Object(fields) => GatewayError::Rpc {
            code: fields.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: fields
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string),
        },
        other => GatewayError::Rpc {
            code: 0,
            message: other.to_string(),
        },
    }
}

/// Join the `text` of every item in `result[key]`, keeping only `type: text`
/// items when a type is given.
pub fn join_text(result: &Value, key: &str) -> Option<String> {
    let items = result.get(key)?.as_array()?;
    let parts: Vec<&str> = items
        .iter()
        .filter(|item| {
            item.get("type")
                .and_then(Value::as_str)
                .is_none_or(|ty| ty == "text")
        })
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    Some(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let request = JsonRpcRequest::new(7, "tools/list", json!({}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list", "params": {}}));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 3, "result": {}})), Incoming::Response(3));
        assert_eq!(classify(&json!({"tools": []})), Incoming::Unkeyed);
        assert_eq!(
            classify(&json!({"jsonrpc": "2.0", "method": "notifications/message"})),
            Incoming::Notification("notifications/message".into())
        );
    }

    #[test]
    fn test_into_result_variants() {
        let wrapped = into_result(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}})).unwrap();
        assert_eq!(wrapped, json!({"tools": []}));

        let bare = into_result(json!({"tools": []})).unwrap();
        assert_eq!(bare, json!({"tools": []}));

        match into_result(json!({"error": "Method 'initialize' not supported"})) {
            Err(GatewayError::Rpc { code, message }) => {
                assert_eq!(code, 0);
                assert!(message.contains("initialize"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            into_result(json!({"id": 1, "error": {"code": -32601, "message": "nope"}})),
            Err(GatewayError::Rpc { code: -32601, .. })
        ));
    }

    #[test]
    fn test_join_text_content() {
        let result = json!({"content": [
            {"type": "text", "text": "first"},
            {"type": "image", "data": "..."},
            {"type": "text", "text": "second"}
        ]});
        assert_eq!(join_text(&result, "content").as_deref(), Some("first\nsecond"));
        assert_eq!(join_text(&json!({"other": 1}), "content"), None);
    }
}
