use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Namespace used when a tool is registered or requested without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Separator between namespace and tool name in qualified names.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Build the registry key for a tool: bare name in the default namespace,
/// `namespace::name` elsewhere.
pub fn qualified_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        None => name.to_string(),
        Some(ns) if ns == DEFAULT_NAMESPACE => name.to_string(),
        Some(ns) => format!("{ns}{NAMESPACE_SEPARATOR}{name}"),
    }
}

/// Split a flattened `namespace::name` into its parts.
pub fn split_qualified_name(qualified: &str) -> Option<(&str, &str)> {
    qualified
        .split_once(NAMESPACE_SEPARATOR)
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}

/// Progress report emitted by a running tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolProgress {
    pub call_id: String,
    pub message: String,
    /// Completion fraction in `0.0..=1.0`, when the tool can estimate it.
    pub fraction: Option<f32>,
}

pub type ProgressCallback = Arc<dyn Fn(ToolProgress) + Send + Sync>;

/// Per-call options supplied by the caller.
#[derive(Clone, Default)]
pub struct ToolCallOptions {
    pub timeout: Option<Duration>,
    pub skip_confirmation: bool,
    pub cancellation: Option<CancellationToken>,
    pub progress: Option<ProgressCallback>,
}

impl fmt::Debug for ToolCallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallOptions")
            .field("timeout", &self.timeout)
            .field("skip_confirmation", &self.skip_confirmation)
            .field("cancellation", &self.cancellation.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A single tool invocation as issued by the agent loop.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub params: Value,
    pub options: ToolCallOptions,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, params: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            namespace: None,
            params,
            options: ToolCallOptions::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn skip_confirmation(mut self) -> Self {
        self.options.skip_confirmation = true;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancellation = Some(token);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.options.progress = Some(callback);
        self
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(&self.name, self.namespace.as_deref())
    }
}

/// Lifecycle of a scheduled tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Validating,
    AwaitingApproval,
    Scheduled,
    Executing,
    Completed,
    Error,
}

impl ToolCallStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Validating => 0,
            Self::AwaitingApproval => 1,
            Self::Scheduled => 2,
            Self::Executing => 3,
            Self::Completed | Self::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Forward-only transitions. `Error` is reachable from every live state,
    /// `Completed` only from `Executing`.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Error => true,
            Self::Completed => self == Self::Executing,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool call. Exactly one of `data` and `error` is set on a
/// result attached to a terminal call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    /// Successful result. Tools may leave `call_id` empty; the execution
    /// service stamps it.
    pub fn ok(data: Value) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            data: Some(data),
            error: None,
            execution_time: None,
            metadata: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: &ToolError) -> Self {
        let mut metadata = json!({ "kind": error.kind() });
        if let Some(hint) = error.hint() {
            metadata["hint"] = json!(hint);
        }
        Self {
            call_id: call_id.into(),
            success: false,
            data: None,
            error: Some(error.to_string()),
            execution_time: None,
            metadata: Some(metadata),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time = Some(millis);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn hint(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("hint")?.as_str()
    }
}

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationKind {
    Edit {
        file_path: String,
        #[serde(default)]
        is_new_file: bool,
        #[serde(default)]
        preview: String,
    },
    Exec {
        command: String,
        root_command: String,
    },
    Remote {
        server: String,
        tool: String,
    },
    Info {
        prompt: String,
    },
}

/// Details a tool returns from `should_confirm_execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfirmationDetails {
    pub title: String,
    pub kind: ConfirmationKind,
    /// Dangerous calls fail closed when no front end can ask the user.
    #[serde(default)]
    pub dangerous: bool,
    /// Origin used for "trust everything from this source".
    #[serde(default)]
    pub source: Option<String>,
}

impl ToolConfirmationDetails {
    pub fn new(title: impl Into<String>, kind: ConfirmationKind) -> Self {
        Self {
            title: title.into(),
            kind,
            dangerous: false,
            source: None,
        }
    }

    pub fn dangerous(mut self, dangerous: bool) -> Self {
        self.dangerous = dangerous;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The user's decision on a pending call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    ProceedAlwaysForSource,
    ModifiedAndApproved { params: Value },
    Cancelled,
}

impl ConfirmationOutcome {
    pub fn is_approved(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProceedOnce => "proceed_once",
            Self::ProceedAlways => "proceed_always",
            Self::ProceedAlwaysForSource => "proceed_always_for_source",
            Self::ModifiedAndApproved { .. } => "modified_and_approved",
            Self::Cancelled => "cancelled",
        }
    }
}
