use crate::execution_context::ExecutionContext;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use toolwright_core::{ToolConfirmationDetails, ToolError, ToolResult};

/// A named capability the agent can invoke.
///
/// Implementations are immutable once registered. Parameter shape is checked
/// by the validation service against [`Tool::schema`] before any call reaches
/// [`Tool::execute`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;

    /// Extra semantic checks beyond the schema.
    fn validate_params(&self, _params: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Returns details when this call needs the user's approval.
    async fn should_confirm_execute(&self, _params: &Value) -> Option<ToolConfirmationDetails> {
        None
    }

    /// Files this call will modify, relative to the workspace root.
    fn target_paths(&self, _params: &Value) -> Vec<PathBuf> {
        Vec::new()
    }

    async fn execute(&self, ctx: ExecutionContext, params: Value) -> Result<ToolResult, ToolError>;
}
