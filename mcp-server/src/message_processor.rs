//! Routes incoming JSON-RPC frames. The interesting path is `tools/call`,
//! which is handed to an async task so a long evaluation never blocks the
//! message loop; everything else is answered inline.

use std::sync::Arc;

use mcp_types::CallToolRequestParams;
use mcp_types::INVALID_PARAMS_ERROR_CODE;
use mcp_types::INVALID_REQUEST_ERROR_CODE;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JSONRPC_VERSION;
use mcp_types::ListToolsResult;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::METHOD_NOT_FOUND_ERROR_CODE;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::ServerCapabilitiesTools;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task;
use tracing::info;
use tracing::warn;

use anneal_core::SessionRegistry;
use anneal_core::fs::Fs;

use crate::tool_config::all_tools;
use crate::tool_handlers::handle_tool_call;

pub(crate) struct MessageProcessor {
    outgoing: mpsc::Sender<JSONRPCMessage>,
    registry: Arc<SessionRegistry>,
    fs: Arc<dyn Fs>,
    initialized: bool,
}

impl MessageProcessor {
    pub(crate) fn new(
        outgoing: mpsc::Sender<JSONRPCMessage>,
        registry: Arc<SessionRegistry>,
        fs: Arc<dyn Fs>,
    ) -> Self {
        Self {
            outgoing,
            registry,
            fs,
            initialized: false,
        }
    }

    pub(crate) fn process_request(&mut self, request: JSONRPCRequest) {
        let JSONRPCRequest {
            id, method, params, ..
        } = request;
        match method.as_str() {
            "initialize" => self.handle_initialize(id, params),
            "ping" => self.send_response(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, params),
            other => {
                self.send_error(
                    id,
                    METHOD_NOT_FOUND_ERROR_CODE,
                    format!("method not supported: {other}"),
                );
            }
        }
    }

    pub(crate) fn process_notification(&mut self, notification: JSONRPCNotification) {
        info!("<- notification: {}", notification.method);
    }

    pub(crate) fn process_response(&mut self, response: JSONRPCResponse) {
        info!("<- response: {response:?}");
    }

    pub(crate) fn process_error(&mut self, err: JSONRPCError) {
        warn!("<- error: {err:?}");
    }

    fn handle_initialize(&mut self, id: RequestId, params: Option<serde_json::Value>) {
        if self.initialized {
            self.send_error(
                id,
                INVALID_REQUEST_ERROR_CODE,
                "initialize called more than once".to_string(),
            );
            return;
        }
        self.initialized = true;

        let protocol_version = params
            .and_then(|p| serde_json::from_value::<InitializeRequestParams>(p).ok())
            .map(|p| p.protocol_version)
            .unwrap_or_else(|| MCP_SCHEMA_VERSION.to_string());

        let result = InitializeResult {
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
            },
            instructions: None,
            protocol_version,
            server_info: Implementation {
                name: "anneal-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        self.send_response(id, result);
    }

    fn handle_list_tools(&self, id: RequestId) {
        let result = ListToolsResult {
            tools: all_tools(),
            next_cursor: None,
        };
        self.send_response(id, result);
    }

    fn handle_call_tool(&self, id: RequestId, params: Option<serde_json::Value>) {
        let params = match params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| {
                serde_json::from_value::<CallToolRequestParams>(p).map_err(|e| e.to_string())
            }) {
            Ok(params) => params,
            Err(reason) => {
                self.send_error(
                    id,
                    INVALID_PARAMS_ERROR_CODE,
                    format!("invalid tools/call params: {reason}"),
                );
                return;
            }
        };

        info!("tools/call -> {}", params.name);
        let outgoing = self.outgoing.clone();
        let registry = self.registry.clone();
        let fs = self.fs.clone();
        task::spawn(async move {
            let result = handle_tool_call(registry, fs, params.name, params.arguments).await;
            let message = match serde_json::to_value(&result) {
                Ok(value) => JSONRPCMessage::Response(JSONRPCResponse {
                    jsonrpc: JSONRPC_VERSION.into(),
                    id,
                    result: value,
                }),
                Err(e) => JSONRPCMessage::Error(JSONRPCError {
                    jsonrpc: JSONRPC_VERSION.into(),
                    id,
                    error: JSONRPCErrorError {
                        code: INVALID_REQUEST_ERROR_CODE,
                        message: format!("failed to serialize tool result: {e}"),
                        data: None,
                    },
                }),
            };
            if let Err(e) = outgoing.send(message).await {
                warn!("failed to send tool result: {e}");
            }
        });
    }

    fn send_response<T: Serialize>(&self, id: RequestId, result: T) {
        let message = match serde_json::to_value(result) {
            Ok(value) => JSONRPCMessage::Response(JSONRPCResponse {
                jsonrpc: JSONRPC_VERSION.into(),
                id,
                result: value,
            }),
            Err(e) => {
                warn!("failed to serialize response: {e}");
                return;
            }
        };
        if let Err(e) = self.outgoing.try_send(message) {
            warn!("failed to send response: {e}");
        }
    }

    fn send_error(&self, id: RequestId, code: i64, message: String) {
        let error = JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            error: JSONRPCErrorError {
                code,
                message,
                data: None,
            },
        });
        if let Err(e) = self.outgoing.try_send(error) {
            warn!("failed to send error: {e}");
        }
    }
}
