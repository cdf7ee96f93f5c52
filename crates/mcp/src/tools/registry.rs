// Tool registry: ordered, immutable-after-startup mapping from tool name to tool

use crate::protocol::{CallToolResult, JsonRpcError, ToolSchema};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Errors surfaced by tool lookup, argument validation and execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArguments(String),

    #[error("Calculation error: {0}")]
    Calculation(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
}

impl ToolError {
    /// Map to the JSON-RPC error returned from `tools/call`
    pub fn to_jsonrpc(&self) -> JsonRpcError {
        match self {
            Self::NotFound(name) => JsonRpcError::tool_not_found(name),
            Self::InvalidArguments(message) => JsonRpcError::invalid_params(message.clone()),
            Self::Calculation(diagnostic) => JsonRpcError::calculation_error(diagnostic.clone()),
            Self::DuplicateTool(_) => JsonRpcError::internal_error(),
        }
    }
}

impl From<ToolError> for JsonRpcError {
    fn from(err: ToolError) -> Self {
        err.to_jsonrpc()
    }
}

/// Tool executor trait
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool schema for MCP
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with arguments already validated against `schema()`
    async fn execute(&self, arguments: Value) -> Result<CallToolResult, ToolError>;
}

struct RegisteredTool {
    schema: ToolSchema,
    tool: Arc<dyn Tool>,
}

/// Tool registry for managing available tools
///
/// Listing order is registration order. Schemas are captured once at
/// registration and never change afterwards.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool; names are unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let schema = tool.schema();
        if self.index.contains_key(&schema.name) {
            return Err(ToolError::DuplicateTool(schema.name));
        }
        self.index.insert(schema.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { schema, tool });
        Ok(())
    }

    /// List all tool schemas, in registration order
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `arguments` against the named tool's schema and invoke it
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, ToolError> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        validate_arguments(&entry.schema.input_schema, &arguments)?;
        entry.tool.execute(arguments).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural check of `arguments` against an object schema built with the
/// helpers below. Required keys must be present and declared property types
/// must match exactly; no coercion is attempted.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let args = arguments.as_object().ok_or_else(|| {
        ToolError::InvalidArguments("Arguments must be an object".to_string())
    })?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(ToolError::InvalidArguments(format!(
                    "Missing required argument: {}",
                    field
                )));
            }
        }
    }

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    for (field, value) in args {
        let Some(expected) = properties
            .get(field)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        if !matches_type(expected, value) {
            return Err(ToolError::InvalidArguments(format!(
                "Argument '{}' must be of type {}",
                field, expected
            )));
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> Value {
    serde_json::json!({
        "type": "number",
        "description": description
    })
}
