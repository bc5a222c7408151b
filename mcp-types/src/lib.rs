//! JSON-RPC 2.0 envelope plus the subset of the Model Context Protocol this
//! server speaks: initialize, ping, tools/list, and tools/call. Field names
//! follow the MCP schema's camelCase on the wire.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_SCHEMA_VERSION: &str = "2025-03-26";

/// A request id may be a string or an integer; it is echoed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

/// Any frame that can arrive on or leave over the wire. Variants are tried
/// in declaration order: a `method` plus `id` is a request, a bare `method`
/// a notification, an `id` plus `result` a response, an `id` plus `error`
/// an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const INVALID_REQUEST_ERROR_CODE: i64 = -32600;
pub const METHOD_NOT_FOUND_ERROR_CODE: i64 = -32601;
pub const INVALID_PARAMS_ERROR_CODE: i64 = -32602;

// ---------------------------------------------------------------------
// initialize
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParams {
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub capabilities: ServerCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub protocol_version: String,
    pub server_info: Implementation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ServerCapabilitiesTools>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilitiesTools {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

// ---------------------------------------------------------------------
// tools
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub input_schema: ToolInputSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequestParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<CallToolResultContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallToolResultContent {
    TextContent(TextContent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub r#type: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl TextContent {
    pub fn new(text: String) -> Self {
        Self {
            r#type: "text".to_string(),
            text,
            annotations: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frames_deserialize_by_shape() {
        let request: JSONRPCMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#,
        )
        .expect("request");
        assert!(matches!(request, JSONRPCMessage::Request(_)));

        let notification: JSONRPCMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .expect("notification");
        assert!(matches!(notification, JSONRPCMessage::Notification(_)));

        let response: JSONRPCMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#).expect("response");
        assert!(matches!(response, JSONRPCMessage::Response(_)));

        let error: JSONRPCMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32600,"message":"bad"}}"#,
        )
        .expect("error");
        assert!(matches!(error, JSONRPCMessage::Error(_)));
    }

    #[test]
    fn request_ids_round_trip_both_forms() {
        let string_id: RequestId = serde_json::from_str(r#""abc""#).expect("string id");
        assert_eq!(string_id, RequestId::String("abc".to_string()));
        let int_id: RequestId = serde_json::from_str("7").expect("int id");
        assert_eq!(int_id, RequestId::Integer(7));
    }

    #[test]
    fn call_tool_result_serializes_camel_case() {
        let result = CallToolResult {
            content: vec![CallToolResultContent::TextContent(TextContent::new(
                "hi".to_string(),
            ))],
            is_error: Some(true),
        };
        let json = serde_json::to_value(&result).expect("serializes");
        assert_eq!(json["isError"], serde_json::json!(true));
        assert_eq!(json["content"][0]["type"], serde_json::json!("text"));
    }
}
