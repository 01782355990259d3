use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use toolwright_core::{ToolCallRequest, ToolCallStatus, ToolConfirmationDetails, ToolResult};
use toolwright_tools::Tool;

/// Scheduler-owned record of one request's progress.
#[derive(Clone)]
pub struct ToolCall {
    pub request: ToolCallRequest,
    /// `None` when the name did not resolve.
    pub tool: Option<Arc<dyn Tool>>,
    pub status: ToolCallStatus,
    pub confirmation_details: Option<ToolConfirmationDetails>,
    pub response: Option<ToolResult>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub batch_id: u64,
}

impl ToolCall {
    pub(crate) fn new(request: ToolCallRequest, tool: Option<Arc<dyn Tool>>, batch_id: u64) -> Self {
        Self {
            request,
            tool,
            status: ToolCallStatus::Validating,
            confirmation_details: None,
            response: None,
            start_time: Utc::now(),
            end_time: None,
            batch_id,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock time from acceptance to the terminal state.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

impl fmt::Debug for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCall")
            .field("call_id", &self.request.call_id)
            .field("name", &self.request.qualified_name())
            .field("status", &self.status)
            .field("response", &self.response)
            .field("batch_id", &self.batch_id)
            .finish()
    }
}
