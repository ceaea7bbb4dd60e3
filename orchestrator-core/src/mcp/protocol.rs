use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

/// Which interpreter a declared MCP server's script is launched with (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterKind {
    Node,
    Python,
}

impl InterpreterKind {
    /// The executable used to launch the server's script.
    pub fn executable(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python3",
        }
    }
}

/// A tool exposed by an MCP server's catalogue (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// One line sent to an MCP child's stdin (spec §6, "MCP child-process
/// protocol"): `{id, type, ...}` where `type` is one of `initialize`,
/// `list_tools`, `tool_call`, `shutdown`.
///
/// `body` holds whatever extra fields accompany `id`/`type` (e.g. `tool` for
/// a `tool_call`) and is merged into the top-level object at serialization
/// time rather than via `#[serde(flatten)]`, since `body` is `Value::Null`
/// for `list_tools`/`shutdown` and flattening a non-map `Value` is a runtime
/// error in serde, not just an empty no-op.
#[derive(Debug, Clone)]
pub struct ChildRequest {
    pub id: u64,
    pub message_type: &'static str,
    pub body: Value,
}

impl ChildRequest {
    pub fn initialize(id: u64) -> Self {
        Self {
            id,
            message_type: "initialize",
            body: serde_json::json!({ "version": "1.0" }),
        }
    }

    pub fn list_tools(id: u64) -> Self {
        Self {
            id,
            message_type: "list_tools",
            body: Value::Null,
        }
    }

    pub fn tool_call(id: u64, tool_name: &str, args: Value) -> Self {
        Self {
            id,
            message_type: "tool_call",
            body: serde_json::json!({ "tool": { "name": tool_name, "args": args } }),
        }
    }

    pub fn shutdown(id: u64) -> Self {
        Self {
            id,
            message_type: "shutdown",
            body: Value::Null,
        }
    }

    pub fn to_line(&self) -> String {
        let mut object = serde_json::Map::new();
        object.insert("id".to_owned(), serde_json::json!(self.id));
        object.insert("type".to_owned(), serde_json::json!(self.message_type));
        if let Value::Object(fields) = &self.body {
            for (key, value) in fields {
                object.insert(key.clone(), value.clone());
            }
        }
        serde_json::to_string(&Value::Object(object)).expect("ChildRequest is always serializable")
    }
}

/// One line read back from an MCP child's stdout. The child echoes the
/// request's `id`; a reply carries either `result`/tool data or `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChildReply {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ChildReply {
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_request_serializes_expected_shape() {
        let request = ChildRequest::tool_call(3, "add", serde_json::json!({"a": 2, "b": 3}));
        let value: Value = serde_json::from_str(&request.to_line()).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["tool"]["name"], "add");
    }

    #[test]
    fn parses_error_reply() {
        let reply = ChildReply::parse_line(r#"{"id":1,"error":"boom"}"#).unwrap();
        assert_eq!(reply.error.as_deref(), Some("boom"));
        assert!(reply.result.is_none());
    }
}
