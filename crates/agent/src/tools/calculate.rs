use async_trait::async_trait;
use serde_json::{json, Value};

use datasage_core::calculator;

use super::{Tool, ToolError, ToolOutput};

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &'static str {
        "Calculate"
    }

    fn description(&self) -> &'static str {
        "Evaluate an arithmetic expression using numbers, parentheses and + - * / ** operators."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression, e.g. (999.99 + 799.99) / 2"
                }
            },
            "required": ["expression"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let expression = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("`expression` must be a string".into()))?;

        let value = calculator::evaluate(expression)?;
        Ok(ToolOutput::text(format!("Result: {}", calculator::format_number(value))))
    }
}
