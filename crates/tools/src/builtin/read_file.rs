use crate::execution_context::ExecutionContext;
use crate::path_guard::PathGuard;
use crate::traits::Tool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::fs;
use toolwright_core::{ToolError, ToolResult};

#[derive(Deserialize)]
struct ReadFileInput {
    path: String,
}

#[derive(Clone)]
pub struct ReadFileTool {
    guard: PathGuard,
}

impl ReadFileTool {
    pub fn new(workspace_root: &Path) -> Result<Self, ToolError> {
        Ok(Self {
            guard: PathGuard::new(workspace_root)?,
        })
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a UTF-8 file from the workspace"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"}
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _ctx: ExecutionContext,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let input: ReadFileInput =
            serde_json::from_value(input).map_err(|e| ToolError::validation(e.to_string()))?;

        let path = self.guard.resolve(&input.path)?;
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{}: {}", input.path, e)))?;

        Ok(ToolResult::ok(json!({"path": input.path, "content": content})))
    }
}
