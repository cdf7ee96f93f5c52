pub mod math;
pub mod text;
pub mod time;
mod registry;

pub use math::{AddTool, CalculateTool};
pub use registry::{
    json_schema_number, json_schema_object, json_schema_string, validate_arguments, Tool,
    ToolError, ToolRegistry,
};
pub use text::EchoTool;
pub use time::CurrentTimeTool;

use crate::clock::Clock;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Registry with the built-in tools, in listing order
pub fn builtin_registry(clock: Arc<dyn Clock>) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool))?;
    registry.register(Arc::new(AddTool))?;
    registry.register(Arc::new(CalculateTool))?;
    registry.register(Arc::new(CurrentTimeTool::new(clock)))?;
    Ok(registry)
}

/// Deserialize tool arguments, reporting failures as invalid arguments
pub(crate) fn parse_arguments<T: DeserializeOwned>(
    tool: &str,
    arguments: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid arguments for {}: {}", tool, e)))
}
