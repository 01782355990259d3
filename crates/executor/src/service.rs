use crate::stats::ExecutionStats;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use toolwright_checkpoint::{CheckpointOptions, CheckpointService};
use toolwright_core::{CancellationToken, EventBus, EventKind, ProgressCallback, ToolError, ToolResult};
use toolwright_tools::{ExecutionContext, Tool, ValidationService};
use tracing::{debug, error, info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub call_id: String,
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressCallback>,
}

impl ExecuteOptions {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }
}

pub struct ExecutionService {
    validation: Arc<ValidationService>,
    checkpoints: Option<Arc<CheckpointService>>,
    stats: Mutex<ExecutionStats>,
    events: Option<EventBus>,
    default_timeout: Duration,
}

impl ExecutionService {
    pub fn new(validation: Arc<ValidationService>) -> Self {
        Self {
            validation,
            checkpoints: None,
            stats: Mutex::new(ExecutionStats::default()),
            events: None,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointService>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Validate, checkpoint, then run `tool` in its own task. Never fails:
    /// every problem is reported as a failed [`ToolResult`].
    pub async fn execute(
        &self,
        tool: Arc<dyn Tool>,
        params: Value,
        cancellation: CancellationToken,
        options: ExecuteOptions,
    ) -> ToolResult {
        let started = Instant::now();
        let name = tool.name().to_string();
        let call_id = options.call_id.clone();

        let validation = self.validation.validate_tool_params(tool.as_ref(), &params);
        if !validation.valid {
            debug!("Rejected {} ({}): invalid parameters", name, call_id);
            return self.finish(&name, &call_id, started, Err(ToolError::Validation(validation.errors)));
        }

        self.maybe_checkpoint(tool.as_ref(), &params).await;

        if let Some(events) = &self.events {
            events.publish(EventKind::ExecutionStarted {
                call_id: call_id.clone(),
                name: name.clone(),
            });
        }

        let limit = options.timeout.unwrap_or(self.default_timeout);
        let outcome = self
            .run_isolated(tool, params, &cancellation, limit, options)
            .await;
        self.finish(&name, &call_id, started, outcome)
    }

    async fn maybe_checkpoint(&self, tool: &dyn Tool, params: &Value) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        let paths = tool.target_paths(params);
        if !checkpoints.should_create_checkpoint(tool.name(), &paths) {
            return;
        }

        let options = CheckpointOptions::new(format!("Before {}", tool.name())).with_files(paths);
        match checkpoints.create_checkpoint(options).await {
            Ok(checkpoint) => debug!("Checkpoint {} taken before {}", checkpoint.id, tool.name()),
            Err(e) => warn!("Checkpoint before {} failed, continuing: {}", tool.name(), e),
        }
    }

    async fn run_isolated(
        &self,
        tool: Arc<dyn Tool>,
        params: Value,
        cancellation: &CancellationToken,
        limit: Duration,
        options: ExecuteOptions,
    ) -> Result<ToolResult, ToolError> {
        let token = cancellation.child_token();
        let ctx = ExecutionContext::new(options.call_id, limit)
            .with_cancellation(token.clone())
            .with_progress(options.progress);

        // Spawn task to isolate panics
        let handle = tokio::spawn(async move { tool.execute(ctx, params).await });
        let abort = handle.abort_handle();

        tokio::select! {
            joined = timeout(limit, handle) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) if join_err.is_panic() => {
                    error!("Tool execution panicked");
                    Err(ToolError::ExecutionFailed("Tool panicked during execution".to_string()))
                }
                Ok(Err(_)) => Err(ToolError::Cancelled("Tool task was aborted".to_string())),
                Err(_) => {
                    warn!("Tool execution timed out after {}ms", limit.as_millis());
                    token.cancel();
                    abort.abort();
                    Err(ToolError::Timeout(limit.as_millis() as u64))
                }
            },
            _ = cancellation.cancelled() => {
                token.cancel();
                abort.abort();
                Err(ToolError::Cancelled("Execution cancelled".to_string()))
            }
        }
    }

    fn finish(
        &self,
        name: &str,
        call_id: &str,
        started: Instant,
        outcome: Result<ToolResult, ToolError>,
    ) -> ToolResult {
        let elapsed = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(result) if result.success => result.with_call_id(call_id),
            Ok(result) => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Tool reported failure".to_string());
                ToolResult::failure(call_id, &ToolError::ExecutionFailed(message))
            }
            Err(e) => ToolResult::failure(call_id, &e),
        }
        .with_execution_time(elapsed);

        self.stats.lock().record(name, result.success, elapsed);

        if result.success {
            info!("Tool {} ({}) completed in {}ms", name, call_id, elapsed);
            if let Some(events) = &self.events {
                events.publish(EventKind::ExecutionCompleted {
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                    execution_time_ms: elapsed,
                });
            }
        } else {
            let error = result.error.clone().unwrap_or_default();
            info!("Tool {} ({}) failed in {}ms: {}", name, call_id, elapsed, error);
            if let Some(events) = &self.events {
                events.publish(EventKind::ExecutionFailed {
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                    error,
                });
            }
        }
        result
    }

    pub fn get_execution_stats(&self) -> ExecutionStats {
        self.stats.lock().clone()
    }

    pub fn clear_stats(&self) {
        *self.stats.lock() = ExecutionStats::default();
    }
}
