use crate::execution_context::ExecutionContext;
use crate::path_guard::PathGuard;
use crate::traits::Tool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use toolwright_core::{ConfirmationKind, ToolConfirmationDetails, ToolError, ToolResult};

const PREVIEW_CHARS: usize = 400;

#[derive(Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
}

#[derive(Clone)]
pub struct WriteFileTool {
    guard: PathGuard,
}

impl WriteFileTool {
    pub fn new(workspace_root: &Path) -> Result<Self, ToolError> {
        Ok(Self {
            guard: PathGuard::new(workspace_root)?,
        })
    }

    fn parse(params: &Value) -> Result<WriteFileInput, ToolError> {
        serde_json::from_value(params.clone()).map_err(|e| ToolError::validation(e.to_string()))
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes content to a file in the workspace, creating parent directories"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace root"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    fn validate_params(&self, params: &Value) -> Result<(), String> {
        let input = Self::parse(params).map_err(|e| e.to_string())?;
        self.guard
            .resolve_new(&input.path)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn should_confirm_execute(&self, params: &Value) -> Option<ToolConfirmationDetails> {
        let input = Self::parse(params).ok()?;
        let is_new_file = self
            .guard
            .resolve_new(&input.path)
            .map(|p| !p.exists())
            .unwrap_or(true);
        let preview: String = input.content.chars().take(PREVIEW_CHARS).collect();

        Some(ToolConfirmationDetails::new(
            format!("Confirm write: {}", input.path),
            ConfirmationKind::Edit {
                file_path: input.path,
                is_new_file,
                preview,
            },
        ))
    }

    fn target_paths(&self, params: &Value) -> Vec<PathBuf> {
        params
            .get("path")
            .and_then(Value::as_str)
            .map(|p| vec![PathBuf::from(p)])
            .unwrap_or_default()
    }

    async fn execute(&self, _ctx: ExecutionContext, input: Value) -> Result<ToolResult, ToolError> {
        let input = Self::parse(&input)?;
        let path = self.guard.resolve_new(&input.path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        }

        // Write to a sibling temp file, then rename into place.
        let temp_path = path.with_extension("toolwright.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        file.write_all(input.content.as_bytes())
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolResult::ok(json!({
            "path": input.path,
            "bytes_written": input.content.len()
        })))
    }
}
