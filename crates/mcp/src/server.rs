// MCP request router
//
// Turns a raw JSON-RPC body into exactly one response envelope (or none for
// an accepted notification). Methods are resolved through a table built once
// in `McpServer::new`; anything not in the table is MethodNotFound.

use crate::protocol::{
    CallToolResult, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, DEFAULT_PROTOCOL_VERSION,
    JSONRPC_VERSION,
};
use crate::tools::ToolRegistry;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

type HandlerResult = Result<Value, JsonRpcError>;
type Handler = for<'a> fn(&'a McpServer, Option<Value>) -> BoxFuture<'a, HandlerResult>;

pub struct McpServer {
    registry: ToolRegistry,
    info: ServerInfo,
    handlers: HashMap<&'static str, Handler>,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self::with_info(
            registry,
            ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        )
    }

    pub fn with_info(registry: ToolRegistry, info: ServerInfo) -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("initialize", handle_initialize);
        handlers.insert("ping", handle_ping);
        handlers.insert("tools/list", handle_tools_list);
        handlers.insert("tools/call", handle_tools_call);
        handlers.insert("resources/list", handle_resources_list);
        handlers.insert("prompts/list", handle_prompts_list);

        Self {
            registry,
            info,
            handlers,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// Supported method names, sorted
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.handlers.keys().copied().collect();
        methods.sort_unstable();
        methods
    }

    /// Parse and route a raw request body
    pub async fn dispatch(&self, body: &[u8]) -> Option<JsonRpcResponse> {
        match parse_request(body) {
            Ok(request) => self.handle(request).await,
            Err(response) => Some(response),
        }
    }

    /// Route an already-parsed request. Returns `None` only for accepted
    /// `notifications/*` messages, which carry no id and expect no reply.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() && request.method.starts_with("notifications/") {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }

        let id = request.response_id();
        let Some(handler) = self.handlers.get(request.method.as_str()) else {
            tracing::debug!(method = %request.method, "method not found");
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::method_not_found(&request.method),
            ));
        };

        let outcome = AssertUnwindSafe(handler(self, request.params))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(result)) => JsonRpcResponse::success(id, result),
            Ok(Err(error)) => {
                tracing::debug!(method = %request.method, code = error.code, "request failed");
                JsonRpcResponse::error(id, error)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(method = %request.method, panic = %detail, "handler panicked");
                JsonRpcResponse::error(id, JsonRpcError::internal_error())
            }
        };

        Some(response)
    }
}

/// Parse a request body, producing the error response to send back when the
/// envelope is malformed
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e.to_string()))
    })?;
    parse_request_value(value)
}

/// Validate the envelope shape of an already-decoded JSON value
pub fn parse_request_value(value: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let invalid = |id: Value, message: &str| {
        JsonRpcResponse::error(id, JsonRpcError::invalid_request(message))
    };

    let object = match &value {
        Value::Object(object) => object,
        Value::Array(_) => return Err(invalid(Value::Null, "Batch requests are not supported")),
        _ => return Err(invalid(Value::Null, "Request must be a JSON object")),
    };

    let id = match object.get("id") {
        None | Some(Value::Null) => Value::Null,
        Some(id @ (Value::String(_) | Value::Number(_))) => id.clone(),
        Some(_) => return Err(invalid(Value::Null, "id must be a string, number or null")),
    };

    match object.get("jsonrpc") {
        None => {}
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        Some(_) => return Err(invalid(id, "Unsupported jsonrpc version")),
    }

    match object.get("method") {
        Some(Value::String(method)) if !method.is_empty() => {}
        Some(Value::String(_)) => return Err(invalid(id, "Method must not be empty")),
        _ => return Err(invalid(id, "Missing method")),
    }

    match object.get("params") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => return Err(invalid(id, "params must be an object")),
    }

    serde_json::from_value(value).map_err(|e| invalid(id, &e.to_string()))
}

fn to_result<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize result");
        JsonRpcError::internal_error()
    })
}

fn handle_initialize(server: &McpServer, params: Option<Value>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let params: InitializeParams = match params {
            Some(params) => serde_json::from_value(params).map_err(|e| {
                JsonRpcError::invalid_params(format!("Invalid initialize params: {}", e))
            })?,
            None => InitializeParams::default(),
        };

        if let Some(client) = &params.client_info {
            tracing::info!(client = %client.name, version = %client.version, "client initializing");
        }

        to_result(&InitializeResult {
            protocol_version: params
                .protocol_version
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: ServerCapabilities::tools_only(),
            server_info: server.info.clone(),
        })
    }
    .boxed()
}

fn handle_ping(_server: &McpServer, _params: Option<Value>) -> BoxFuture<'_, HandlerResult> {
    futures::future::ready(Ok(json!({}))).boxed()
}

fn handle_tools_list(server: &McpServer, _params: Option<Value>) -> BoxFuture<'_, HandlerResult> {
    let result = to_result(&ListToolsResult {
        tools: server.registry.list_schemas(),
    });
    futures::future::ready(result).boxed()
}

fn handle_tools_call(server: &McpServer, params: Option<Value>) -> BoxFuture<'_, HandlerResult> {
    async move {
        let params = params.unwrap_or(Value::Null);

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("Missing required parameter: name"))?;

        if !server.registry.contains(name) {
            tracing::debug!(tool = name, "tool not found");
            return Err(JsonRpcError::tool_not_found(name));
        }

        let arguments = match params.get("arguments") {
            Some(arguments @ Value::Object(_)) => arguments.clone(),
            Some(_) => {
                return Err(JsonRpcError::invalid_params(
                    "Parameter 'arguments' must be an object",
                ))
            }
            None => {
                return Err(JsonRpcError::invalid_params(
                    "Missing required parameter: arguments",
                ))
            }
        };

        let result: CallToolResult = server.registry.call(name, arguments).await.map_err(|e| {
            tracing::debug!(tool = name, error = %e, "tool call failed");
            e.to_jsonrpc()
        })?;

        to_result(&result)
    }
    .boxed()
}

fn handle_resources_list(_server: &McpServer, _params: Option<Value>) -> BoxFuture<'_, HandlerResult> {
    futures::future::ready(Ok(json!({ "resources": [] }))).boxed()
}

fn handle_prompts_list(_server: &McpServer, _params: Option<Value>) -> BoxFuture<'_, HandlerResult> {
    futures::future::ready(Ok(json!({ "prompts": [] }))).boxed()
}
