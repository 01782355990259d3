use crate::execution_context::ExecutionContext;
use crate::traits::Tool;
use async_trait::async_trait;
use serde_json::{json, Value};
use toolwright_core::{ToolError, ToolResult};

/// Returns its `message` unchanged. Never asks for confirmation; useful for
/// wiring checks from a front end.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the given message"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"}
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, ctx: ExecutionContext, params: Value) -> Result<ToolResult, ToolError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::validation("message must be a string"))?;
        ctx.report_progress("echoing", Some(1.0));
        Ok(ToolResult::ok(json!({ "message": message })))
    }
}
