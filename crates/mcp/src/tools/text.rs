// Text tools

use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, json_schema_string, parse_arguments, Tool, ToolError};
use serde::Deserialize;

/// Echoes its input back as `Echo: <text>`
pub struct EchoTool;

#[derive(Debug, Deserialize)]
struct EchoArgs {
    text: String,
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "Echo back the provided text".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "text": json_schema_string("Text to echo back")
                }),
                vec!["text"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: EchoArgs = parse_arguments("echo", arguments)?;
        Ok(CallToolResult::text(format!("Echo: {}", args.text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolContent;

    #[tokio::test]
    async fn test_echo_format() {
        let result = EchoTool
            .execute(serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.content, vec![ToolContent::text("Echo: hi")]);
        assert!(result.is_error.is_none());
    }

    #[tokio::test]
    async fn test_echo_empty_text() {
        let result = EchoTool
            .execute(serde_json::json!({"text": ""}))
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), "Echo: ");
    }
}
