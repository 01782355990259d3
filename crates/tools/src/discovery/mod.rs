//! Runtime discovery of tools from remote servers and project manifests.
//!
//! Every definition goes through [`ToolDefinition::validate`]; only complete
//! ones are installed. Rejections are logged and reported back to the caller
//! but never stop the rest of a discovery pass.

pub mod local;
pub mod protocol;
pub mod remote;

use crate::builtin::is_dangerous_command;
use crate::error::DiscoveryError;
use crate::execution_context::ExecutionContext;
use crate::registry::ToolRegistry;
use crate::traits::Tool;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use toolwright_core::{
    qualified_name, ConfirmationKind, EventBus, EventKind, ToolConfirmationDetails, ToolError,
    ToolResult,
};
use tracing::{debug, info, warn};

pub use local::ToolManifest;
pub use remote::{RemoteToolClient, ServerConfig};

pub const REMOTE_NAMESPACE: &str = "mcp";
pub const PROJECT_NAMESPACE: &str = "project";

/// How a discovered tool is carried out.
#[derive(Clone)]
pub enum ToolHandler {
    Remote {
        client: Arc<RemoteToolClient>,
        remote_name: String,
    },
    Command {
        program: String,
        args: Vec<String>,
        cwd: PathBuf,
        confirm: bool,
    },
}

/// A tool definition as found, before validation.
#[derive(Clone, Default)]
pub struct ToolDefinition {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<Value>,
    pub handler: Option<ToolHandler>,
}

pub enum DiscoveredTool {
    Valid(Arc<dyn Tool>),
    Rejected { name: String, reason: String },
}

impl DiscoveredTool {
    pub fn name(&self) -> &str {
        match self {
            Self::Valid(tool) => tool.name(),
            Self::Rejected { name, .. } => name,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

impl ToolDefinition {
    pub fn from_remote(spec: protocol::RemoteToolSpec, client: &Arc<RemoteToolClient>) -> Self {
        let handler = spec.name.clone().map(|remote_name| ToolHandler::Remote {
            client: Arc::clone(client),
            remote_name,
        });
        Self {
            name: spec.name,
            description: spec.description,
            parameters: spec.input_schema,
            handler,
        }
    }

    pub fn from_manifest(manifest: ToolManifest, cwd: &Path) -> Self {
        let mut argv = manifest.command.into_iter();
        let handler = argv.next().map(|program| ToolHandler::Command {
            program,
            args: argv.collect(),
            cwd: cwd.to_path_buf(),
            confirm: manifest.confirm,
        });
        Self {
            name: manifest.name,
            description: manifest.description,
            parameters: manifest.parameters,
            handler,
        }
    }

    /// Accept only definitions with a name, description, object schema and
    /// handler.
    pub fn validate(self, namespace: &str) -> DiscoveredTool {
        let name = self.name.unwrap_or_default().trim().to_string();
        let reject = |reason: &str| DiscoveredTool::Rejected {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return reject("missing name");
        }
        let description = match self.description {
            Some(d) if !d.trim().is_empty() => d,
            _ => return reject("missing description"),
        };
        let parameters = match self.parameters {
            Some(p) if p.get("type").and_then(Value::as_str) == Some("object") => p,
            Some(_) => return reject("parameter schema must be of type object"),
            None => return reject("missing parameter schema"),
        };
        let Some(handler) = self.handler else {
            return reject("missing handler");
        };

        DiscoveredTool::Valid(Arc::new(DefinedTool {
            name,
            description,
            parameters,
            namespace: namespace.to_string(),
            handler,
        }))
    }
}

struct DefinedTool {
    name: String,
    description: String,
    parameters: Value,
    namespace: String,
    handler: ToolHandler,
}

/// Tool output is JSON when it parses as such, a string otherwise.
fn output_value(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl Tool for DefinedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn should_confirm_execute(&self, _params: &Value) -> Option<ToolConfirmationDetails> {
        match &self.handler {
            ToolHandler::Remote { client, remote_name } => Some(
                ToolConfirmationDetails::new(
                    format!("Confirm remote tool: {}", qualified_name(&self.name, Some(&self.namespace))),
                    ConfirmationKind::Remote {
                        server: client.name().to_string(),
                        tool: remote_name.clone(),
                    },
                )
                .with_source(self.namespace.clone()),
            ),
            ToolHandler::Command { program, args, confirm, .. } if *confirm => {
                let command = std::iter::once(program.as_str())
                    .chain(args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(
                    ToolConfirmationDetails::new(
                        format!("Confirm project tool: {}", self.name),
                        ConfirmationKind::Exec {
                            root_command: program.clone(),
                            command: command.clone(),
                        },
                    )
                    .dangerous(is_dangerous_command(&command))
                    .with_source(self.namespace.clone()),
                )
            }
            ToolHandler::Command { .. } => None,
        }
    }

    async fn execute(&self, ctx: ExecutionContext, params: Value) -> Result<ToolResult, ToolError> {
        match &self.handler {
            ToolHandler::Remote { client, remote_name } => {
                let result = tokio::select! {
                    result = client.call_tool(remote_name, params) => result?,
                    _ = ctx.cancelled() => {
                        return Err(ToolError::Cancelled(format!("{} aborted", self.name)));
                    }
                };
                Ok(ToolResult::ok(output_value(&result.text())))
            }
            ToolHandler::Command { program, args, cwd, .. } => {
                run_command(&ctx, program, args, cwd, &params).await
            }
        }
    }
}

async fn run_command(
    ctx: &ExecutionContext,
    program: &str,
    args: &[String],
    cwd: &Path,
    params: &Value,
) -> Result<ToolResult, ToolError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to spawn {}: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = serde_json::to_vec(params).map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        // A command that ignores its input may close stdin early.
        if let Err(e) = stdin.write_all(&input).await {
            debug!("{} did not read its input: {}", program, e);
        }
    }

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?,
        _ = ctx.cancelled() => {
            return Err(ToolError::Cancelled(format!("{} aborted", program)));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::ExecutionFailed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(ToolResult::ok(output_value(&stdout)))
}

/// Installs discovered tools into the shared registry.
pub struct DiscoveryService {
    registry: Arc<ToolRegistry>,
    events: Option<EventBus>,
    workspace_root: PathBuf,
    clients: Mutex<Vec<Arc<RemoteToolClient>>>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<ToolRegistry>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            events: None,
            workspace_root: workspace_root.into(),
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawn a server, then discover its tools. The client is kept until
    /// [`DiscoveryService::shutdown`].
    pub async fn connect_server(
        &self,
        config: ServerConfig,
        namespace: &str,
    ) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        let client = Arc::new(RemoteToolClient::spawn(config).await?);
        self.clients.lock().push(Arc::clone(&client));
        self.discover_remote(client, namespace).await
    }

    /// List a server's tools and register the valid ones. Tools with the
    /// same name from an earlier pass are replaced.
    pub async fn discover_remote(
        &self,
        client: Arc<RemoteToolClient>,
        namespace: &str,
    ) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        if !client.is_initialized() {
            client.initialize().await?;
        }
        let specs = client.list_tools().await?;
        info!("Server {} advertised {} tools", client.name(), specs.len());

        let source = format!("server:{}", client.name());
        let discovered = specs
            .into_iter()
            .map(|spec| ToolDefinition::from_remote(spec, &client).validate(namespace))
            .collect();
        Ok(self.install(discovered, namespace, &source))
    }

    /// Load every manifest in `dir`, replacing what the namespace held.
    pub async fn discover_directory(
        &self,
        dir: &Path,
        namespace: &str,
    ) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        let removed = self.registry.clear_namespace(namespace);
        if removed > 0 {
            debug!("Cleared {} tools from namespace {}", removed, namespace);
        }

        let mut discovered = Vec::new();
        for path in local::manifest_paths(dir).await? {
            let tool = match local::load_manifest(&path).await {
                Ok(manifest) => ToolDefinition::from_manifest(manifest, &self.workspace_root).validate(namespace),
                Err(e) => DiscoveredTool::Rejected {
                    name: path.display().to_string(),
                    reason: e.to_string(),
                },
            };
            discovered.push(tool);
        }

        let source = format!("dir:{}", dir.display());
        Ok(self.install(discovered, namespace, &source))
    }

    pub async fn shutdown(&self) {
        let clients: Vec<_> = self.clients.lock().drain(..).collect();
        for client in clients {
            client.shutdown().await;
        }
    }

    fn install(&self, discovered: Vec<DiscoveredTool>, namespace: &str, source: &str) -> Vec<DiscoveredTool> {
        for tool in &discovered {
            match tool {
                DiscoveredTool::Valid(tool) => {
                    self.registry.register_in(Arc::clone(tool), namespace);
                    if let Some(events) = &self.events {
                        events.publish(EventKind::ToolDiscovered {
                            name: tool.name().to_string(),
                            namespace: namespace.to_string(),
                            source: source.to_string(),
                        });
                    }
                }
                DiscoveredTool::Rejected { name, reason } => {
                    warn!("Rejected tool {:?} from {}: {}", name, source, reason);
                }
            }
        }
        discovered
    }
}
