// Arithmetic tools

use crate::eval::{self, format_number};
use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{
    json_schema_number, json_schema_object, json_schema_string, parse_arguments, Tool, ToolError,
};
use serde::Deserialize;

/// Adds two numbers
pub struct AddTool;

#[derive(Debug, Deserialize)]
struct AddArgs {
    a: f64,
    b: f64,
}

#[async_trait::async_trait]
impl Tool for AddTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "add".to_string(),
            description: "Add two numbers together".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "a": json_schema_number("First number"),
                    "b": json_schema_number("Second number")
                }),
                vec!["a", "b"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: AddArgs = parse_arguments("add", arguments)?;
        let sum = args.a + args.b;
        if !sum.is_finite() {
            return Err(ToolError::Calculation("result is not a finite number".to_string()));
        }

        Ok(CallToolResult::text(format!(
            "{} + {} = {}",
            format_number(args.a),
            format_number(args.b),
            format_number(sum)
        )))
    }
}

/// Evaluates an arithmetic expression with the sandboxed evaluator
pub struct CalculateTool;

#[derive(Debug, Deserialize)]
struct CalculateArgs {
    expression: String,
}

#[async_trait::async_trait]
impl Tool for CalculateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".to_string(),
            description: "Evaluate an arithmetic expression using + - * / and parentheses"
                .to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "expression": json_schema_string("Arithmetic expression, e.g. (2 + 3) * 4")
                }),
                vec!["expression"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: CalculateArgs = parse_arguments("calculate", arguments)?;
        let value = eval::evaluate(&args.expression)
            .map_err(|e| ToolError::Calculation(e.to_string()))?;

        Ok(CallToolResult::text(format!(
            "{} = {}",
            args.expression.trim(),
            format_number(value)
        )))
    }
}
