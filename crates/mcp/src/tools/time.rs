// Time tools

use crate::clock::Clock;
use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, Tool, ToolError};
use chrono::SecondsFormat;
use std::sync::Arc;

/// Reports the current UTC time as RFC 3339
pub struct CurrentTimeTool {
    clock: Arc<dyn Clock>,
}

impl CurrentTimeTool {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait::async_trait]
impl Tool for CurrentTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "current_time".to_string(),
            description: "Get the current server time in UTC (RFC 3339)".to_string(),
            input_schema: json_schema_object(serde_json::json!({}), vec![]),
        }
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let now = self.clock.now();
        Ok(CallToolResult::text(
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
        ))
    }
}
