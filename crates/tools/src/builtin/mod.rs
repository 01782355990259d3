pub mod echo;
pub mod read_file;
pub mod shell;
pub mod write_file;

pub use echo::EchoTool;
pub use read_file::ReadFileTool;
pub use shell::{is_dangerous_command, ShellTool};
pub use write_file::WriteFileTool;

use crate::registry::ToolRegistry;
use std::path::Path;
use std::sync::Arc;
use toolwright_core::ToolError;

/// Install the built-in tools into the default namespace.
pub fn register_builtin_tools(registry: &ToolRegistry, workspace_root: &Path) -> Result<(), ToolError> {
    registry
        .register(Arc::new(EchoTool))
        .register(Arc::new(ReadFileTool::new(workspace_root)?))
        .register(Arc::new(WriteFileTool::new(workspace_root)?))
        .register(Arc::new(ShellTool::new(workspace_root)?));
    Ok(())
}
