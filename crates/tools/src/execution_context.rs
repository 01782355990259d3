use std::time::Duration;
use toolwright_core::{CancellationToken, ProgressCallback, ToolProgress};

/// Per-call context handed to [`crate::Tool::execute`].
#[derive(Clone)]
pub struct ExecutionContext {
    pub call_id: String,
    pub timeout: Duration,
    pub cancellation: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl ExecutionContext {
    pub fn new(call_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            timeout,
            cancellation: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the call is cancelled or has timed out.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn report_progress(&self, message: impl Into<String>, fraction: Option<f32>) {
        if let Some(progress) = &self.progress {
            progress(ToolProgress {
                call_id: self.call_id.clone(),
                message: message.into(),
                fraction: fraction.map(|f| f.clamp(0.0, 1.0)),
            });
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("call_id", &self.call_id)
            .field("timeout", &self.timeout)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
