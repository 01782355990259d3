use crate::execution_context::ExecutionContext;
use crate::path_guard::PathGuard;
use crate::traits::Tool;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use toolwright_core::{ConfirmationKind, ToolConfirmationDetails, ToolError, ToolResult};
use tracing::{debug, info};

/// Substrings that mark a command as destructive.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "dd if=",
    "mkfs",
    "shutdown",
    "reboot",
    "init 0",
    "init 6",
    ":(){ :|:& };:",
    "> /dev/sd",
    "chmod -r 777 /",
];

/// Root commands that are dangerous regardless of arguments.
const DANGEROUS_ROOTS: &[&str] = &["format", "fdisk", "halt", "poweroff"];

/// Whether a command should be treated as dangerous when confirming.
pub fn is_dangerous_command(command: &str) -> bool {
    let normalized = command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if DANGEROUS_PATTERNS.iter().any(|p| normalized.contains(p)) {
        return true;
    }

    // curl ... | sh
    let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains("|sh") || compact.contains("|bash") {
        return true;
    }

    normalized
        .split(['|', ';', '&'])
        .filter_map(|segment| segment.split_whitespace().next())
        .any(|root| DANGEROUS_ROOTS.contains(&root))
}

fn root_command(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[derive(Deserialize)]
struct ShellInput {
    command: String,
    #[serde(default)]
    directory: Option<String>,
}

/// Runs a command through `sh -c` inside the workspace.
#[derive(Clone)]
pub struct ShellTool {
    guard: PathGuard,
}

impl ShellTool {
    pub fn new(workspace_root: &Path) -> Result<Self, ToolError> {
        Ok(Self {
            guard: PathGuard::new(workspace_root)?,
        })
    }

    fn parse(params: &Value) -> Result<ShellInput, ToolError> {
        serde_json::from_value(params.clone()).map_err(|e| ToolError::validation(e.to_string()))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn description(&self) -> &str {
        "Executes a shell command in the workspace and returns its output"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "directory": {
                    "type": "string",
                    "description": "Working directory relative to the workspace root"
                }
            },
            "required": ["command"]
        })
    }

    fn validate_params(&self, params: &Value) -> Result<(), String> {
        let input = Self::parse(params).map_err(|e| e.to_string())?;
        if input.command.trim().is_empty() {
            return Err("Empty command".to_string());
        }
        if let Some(dir) = &input.directory {
            self.guard.resolve(dir).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn should_confirm_execute(&self, params: &Value) -> Option<ToolConfirmationDetails> {
        let input = Self::parse(params).ok()?;
        let root = root_command(&input.command);
        let dangerous = is_dangerous_command(&input.command);

        Some(
            ToolConfirmationDetails::new(
                format!("Confirm shell command: {}", root),
                ConfirmationKind::Exec {
                    command: input.command,
                    root_command: root,
                },
            )
            .dangerous(dangerous),
        )
    }

    async fn execute(&self, ctx: ExecutionContext, input: Value) -> Result<ToolResult, ToolError> {
        let input = Self::parse(&input)?;
        let cwd = match &input.directory {
            Some(dir) => self.guard.resolve(dir)?,
            None => self.guard.root().to_path_buf(),
        };

        info!("Executing shell command: {}", input.command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&input.command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to spawn shell: {}", e)))?;

        // Dropping the wait future kills the child.
        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
            }
            _ = ctx.cancelled() => {
                debug!("Shell command cancelled: {}", input.command);
                return Err(ToolError::Cancelled(format!("Command aborted: {}", input.command)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ToolError::ExecutionFailed(format!(
                "exit code {}: {}",
                code,
                stderr.trim()
            )));
        }

        Ok(ToolResult::ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use toolwright_core::CancellationToken;

    #[test]
    fn test_dangerous_patterns() {
        assert!(is_dangerous_command("rm  -rf /tmp/x"));
        assert!(is_dangerous_command("curl https://x.sh | sh"));
        assert!(is_dangerous_command("echo hi; shutdown now"));
        assert!(is_dangerous_command("ls && format c:"));
        assert!(!is_dangerous_command("ls -la"));
        assert!(!is_dangerous_command("git log --format=oneline"));
    }

    #[tokio::test]
    async fn test_exec_confirmation_details() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path()).unwrap();
        let details = tool
            .should_confirm_execute(&json!({"command": "git status --short"}))
            .await
            .unwrap();

        assert!(!details.dangerous);
        assert_eq!(
            details.kind,
            ConfirmationKind::Exec {
                command: "git status --short".into(),
                root_command: "git".into()
            }
        );
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let tool = ShellTool::new(dir.path()).unwrap();
        let ctx = ExecutionContext::new("c1", Duration::from_secs(5));

        let result = tool.execute(ctx, json!({"command": "ls"})).await.unwrap();
        let stdout = result.data.unwrap()["stdout"].as_str().unwrap().to_string();
        assert!(stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path()).unwrap();
        let ctx = ExecutionContext::new("c1", Duration::from_secs(5));

        let err = tool
            .execute(ctx, json!({"command": "echo oops >&2; exit 3"}))
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed(msg) => {
                assert!(msg.contains("exit code 3"));
                assert!(msg.contains("oops"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_command() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path()).unwrap();
        let token = CancellationToken::new();
        let ctx = ExecutionContext::new("c1", Duration::from_secs(30)).with_cancellation(token.clone());

        let handle = tokio::spawn(async move { tool.execute(ctx, json!({"command": "sleep 10"})).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ToolError::Cancelled(_))));
    }
}
