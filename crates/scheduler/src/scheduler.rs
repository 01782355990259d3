//! Tool call state machine.
//!
//! ```text
//! validating -> awaiting_approval -> scheduled -> executing -> completed
//!      \______________\_________________\______________\_____> error
//! ```
//!
//! `validating -> scheduled` is taken when no approval is needed. Every call
//! runs in its own task; a call waiting for approval never blocks the others.

use crate::call::ToolCall;
use crate::error::SchedulerError;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use toolwright_core::{
    split_qualified_name, CancellationToken, ConfirmationOutcome, EventBus, EventKind, ToolCallRequest, ToolCallStatus,
    ToolConfirmationDetails, ToolError, ToolResult,
};
use toolwright_executor::{ExecuteOptions, ExecutionService};
use toolwright_policy::ConfirmationService;
use toolwright_tools::{Tool, ToolRegistry, ValidationService};
use tracing::{debug, info, warn};

pub type CallsCallback = Arc<dyn Fn(&[ToolCall]) + Send + Sync>;

struct BatchState {
    call_ids: Vec<String>,
    done: Option<oneshot::Sender<Vec<ToolCall>>>,
}

#[derive(Default)]
struct SchedulerState {
    calls: Vec<ToolCall>,
    batches: HashMap<u64, BatchState>,
    tokens: HashMap<String, CancellationToken>,
}

impl SchedulerState {
    fn call_mut(&mut self, call_id: &str) -> Option<&mut ToolCall> {
        self.calls.iter_mut().find(|c| c.call_id() == call_id)
    }

    fn batch_calls(&self, call_ids: &[String]) -> Vec<ToolCall> {
        self.calls
            .iter()
            .filter(|c| call_ids.iter().any(|id| id == c.call_id()))
            .cloned()
            .collect()
    }

    /// Take the completion sender of `batch_id` once all its calls are
    /// terminal. Evicted calls count as terminal.
    fn take_finished_batch(&mut self, batch_id: u64) -> Option<(oneshot::Sender<Vec<ToolCall>>, Vec<ToolCall>)> {
        let batch = self.batches.get(&batch_id)?;
        let finished = batch.call_ids.iter().all(|id| {
            self.calls
                .iter()
                .find(|c| c.call_id() == id)
                .map(ToolCall::is_terminal)
                .unwrap_or(true)
        });
        if !finished {
            return None;
        }
        let mut batch = self.batches.remove(&batch_id)?;
        let calls = self.batch_calls(&batch.call_ids);
        batch.done.take().map(|sender| (sender, calls))
    }
}

/// Resolves when every call of a batch has reached a terminal state.
#[derive(Debug)]
pub struct BatchHandle {
    pub batch_id: u64,
    pub call_ids: Vec<String>,
    receiver: oneshot::Receiver<Vec<ToolCall>>,
}

impl BatchHandle {
    /// The batch's calls in their final state.
    pub async fn wait(self) -> Vec<ToolCall> {
        self.receiver.await.unwrap_or_default()
    }
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    validation: Arc<ValidationService>,
    confirmation: Arc<ConfirmationService>,
    executor: Arc<ExecutionService>,
    events: EventBus,
    state: Mutex<SchedulerState>,
    next_batch: AtomicU64,
    on_update: RwLock<Option<CallsCallback>>,
    on_complete: RwLock<Option<CallsCallback>>,
}

impl ToolScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        validation: Arc<ValidationService>,
        confirmation: Arc<ConfirmationService>,
        executor: Arc<ExecutionService>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            validation,
            confirmation,
            executor,
            events,
            state: Mutex::new(SchedulerState::default()),
            next_batch: AtomicU64::new(1),
            on_update: RwLock::new(None),
            on_complete: RwLock::new(None),
        }
    }

    /// Called with every tracked call after each transition.
    pub fn on_tool_calls_update<F>(&self, callback: F)
    where
        F: Fn(&[ToolCall]) + Send + Sync + 'static,
    {
        *self.on_update.write() = Some(Arc::new(callback));
    }

    /// Called once per batch with the batch's calls when all are terminal.
    pub fn on_all_tool_calls_complete<F>(&self, callback: F)
    where
        F: Fn(&[ToolCall]) + Send + Sync + 'static,
    {
        *self.on_complete.write() = Some(Arc::new(callback));
    }

    /// Accept a batch. Fails without side effects when a call id repeats
    /// within the batch or matches a tracked call.
    pub fn schedule(
        self: &Arc<Self>,
        requests: Vec<ToolCallRequest>,
        token: CancellationToken,
    ) -> Result<BatchHandle, SchedulerError> {
        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let call_ids: Vec<String> = requests.iter().map(|r| r.call_id.clone()).collect();

        let (runnable, missing) = {
            let mut state = self.state.lock();

            let mut seen = HashSet::new();
            for id in &call_ids {
                if !seen.insert(id.as_str()) || state.calls.iter().any(|c| c.call_id() == id) {
                    return Err(SchedulerError::DuplicateCallId(id.clone()));
                }
            }

            let mut runnable = Vec::new();
            let mut missing = Vec::new();
            for request in requests {
                let (name, namespace) = resolve_name(&request);
                let tool = self.registry.get(&name, namespace.as_deref());
                let mut call = ToolCall::new(request, tool, batch_id);

                if call.tool.is_none() {
                    let err = ToolError::NotFound(call.request.qualified_name());
                    call.status = ToolCallStatus::Error;
                    call.response = Some(ToolResult::failure(call.call_id(), &err));
                    call.end_time = Some(Utc::now());
                    missing.push((call.request.clone(), err));
                } else {
                    let call_token = match &call.request.options.cancellation {
                        Some(caller) => caller.child_token(),
                        None => token.child_token(),
                    };
                    state.tokens.insert(call.call_id().to_string(), call_token);
                    runnable.push(call.call_id().to_string());
                }
                state.calls.push(call);
            }

            state.batches.insert(
                batch_id,
                BatchState {
                    call_ids: call_ids.clone(),
                    done: Some(sender),
                },
            );
            (runnable, missing)
        };

        info!("Scheduled batch {} with {} calls", batch_id, call_ids.len());

        for call in self.snapshot_batch(&call_ids) {
            self.events.publish(EventKind::ExecutionRequested {
                call_id: call.call_id().to_string(),
                name: call.request.name.clone(),
                namespace: call.request.namespace.clone(),
            });
        }
        for (request, err) in &missing {
            warn!("Tool not found for call {}: {}", request.call_id, request.qualified_name());
            self.events.publish(EventKind::ExecutionFailed {
                call_id: request.call_id.clone(),
                name: request.name.clone(),
                error: err.to_string(),
            });
        }

        self.notify_update();
        // Covers empty batches and batches where nothing resolved.
        self.complete_batch_if_done(batch_id);

        for call_id in runnable {
            let scheduler = Arc::clone(self);
            let batch_token = token.clone();
            tokio::spawn(async move {
                scheduler.run_call(call_id, batch_token).await;
            });
        }

        Ok(BatchHandle {
            batch_id,
            call_ids,
            receiver,
        })
    }

    async fn run_call(self: Arc<Self>, call_id: String, batch_token: CancellationToken) {
        let Some((tool, request, token)) = self.call_parts(&call_id) else {
            return;
        };
        let _done = token.clone().drop_guard();
        if request.options.cancellation.is_some() {
            // Caller-owned tokens are not children of the batch token.
            let (call_token, batch) = (token.clone(), batch_token.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = batch.cancelled() => call_token.cancel(),
                    _ = call_token.cancelled() => {}
                }
            });
        }
        let (name, namespace) = resolve_name(&request);
        let mut params = request.params.clone();

        let validation = self.validation.validate_tool_params(tool.as_ref(), &params);
        if !validation.valid {
            self.fail(&call_id, ToolError::Validation(validation.errors));
            return;
        }

        let needs_approval = if request.options.skip_confirmation
            || self.confirmation.is_trusted(&name, namespace.as_deref())
        {
            None
        } else {
            tool.should_confirm_execute(&params).await
        };

        if let Some(details) = needs_approval {
            match self
                .await_approval(&call_id, &name, namespace.as_deref(), details, &token, &batch_token)
                .await
            {
                Some(Some(modified)) => {
                    let revalidated = self.validation.validate_tool_params(tool.as_ref(), &modified);
                    if !revalidated.valid {
                        self.fail(&call_id, ToolError::Validation(revalidated.errors));
                        return;
                    }
                    params = modified;
                }
                Some(None) => {}
                None => return,
            }
        }

        if token.is_cancelled() || batch_token.is_cancelled() {
            self.fail(&call_id, ToolError::Cancelled("Cancelled before execution".to_string()));
            return;
        }
        if self.transition(&call_id, ToolCallStatus::Scheduled, |_| {}).is_none() {
            return;
        }
        if self.transition(&call_id, ToolCallStatus::Executing, |_| {}).is_none() {
            return;
        }

        let mut options = ExecuteOptions::new(call_id.clone()).with_progress(request.options.progress.clone());
        options.timeout = request.options.timeout;
        let result = self.executor.execute(tool, params, token, options).await;

        let status = if result.success {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Error
        };
        self.transition(&call_id, status, |call| call.response = Some(result));
    }

    /// Returns `None` when the call ended while waiting, `Some(Some(params))`
    /// for modified parameters and `Some(None)` to proceed unchanged.
    async fn await_approval(
        &self,
        call_id: &str,
        name: &str,
        namespace: Option<&str>,
        details: ToolConfirmationDetails,
        token: &CancellationToken,
        batch_token: &CancellationToken,
    ) -> Option<Option<Value>> {
        let recorded = details.clone();
        self.transition(call_id, ToolCallStatus::AwaitingApproval, |call| {
            call.confirmation_details = Some(recorded);
        })?;
        self.events.publish(EventKind::ConfirmationRequested {
            call_id: call_id.to_string(),
            name: name.to_string(),
            details: details.clone(),
        });

        let outcome = tokio::select! {
            outcome = self.confirmation.request_confirmation(call_id, &details) => outcome,
            _ = token.cancelled() => {
                self.fail(call_id, ToolError::Cancelled("Cancelled while awaiting approval".to_string()));
                return None;
            }
            _ = batch_token.cancelled() => {
                self.fail(call_id, ToolError::Cancelled("Batch cancelled while awaiting approval".to_string()));
                return None;
            }
        };

        self.events.publish(EventKind::ConfirmationReceived {
            call_id: call_id.to_string(),
            name: name.to_string(),
            outcome: outcome.clone(),
        });
        self.confirmation.record_outcome(name, namespace, &details, &outcome);

        match outcome {
            ConfirmationOutcome::Cancelled => {
                debug!("User declined {} ({})", name, call_id);
                self.fail(call_id, ToolError::ConfirmationDeclined(format!("User declined {}", name)));
                None
            }
            ConfirmationOutcome::ModifiedAndApproved { params } => Some(Some(params)),
            _ => Some(None),
        }
    }

    fn call_parts(&self, call_id: &str) -> Option<(Arc<dyn Tool>, ToolCallRequest, CancellationToken)> {
        let state = self.state.lock();
        let call = state.calls.iter().find(|c| c.call_id() == call_id)?;
        let tool = call.tool.clone()?;
        let token = state.tokens.get(call_id)?.clone();
        Some((tool, call.request.clone(), token))
    }

    /// Move a call to `status` if the state machine allows it. Returns the
    /// previous status on success.
    fn transition<F>(&self, call_id: &str, status: ToolCallStatus, update: F) -> Option<ToolCallStatus>
    where
        F: FnOnce(&mut ToolCall),
    {
        let (previous, batch_id) = {
            let mut state = self.state.lock();
            let call = state.call_mut(call_id)?;
            if !call.status.can_transition_to(status) {
                debug!("Ignoring {} -> {} for {}", call.status, status, call_id);
                return None;
            }
            let previous = call.status;
            call.status = status;
            update(call);
            let batch_id = call.batch_id;
            if status.is_terminal() {
                call.end_time = Some(Utc::now());
                state.tokens.remove(call_id);
            }
            (previous, batch_id)
        };

        debug!("Call {}: {} -> {}", call_id, previous, status);
        self.notify_update();
        if status.is_terminal() {
            self.complete_batch_if_done(batch_id);
        }
        Some(previous)
    }

    /// Terminate a call that has not produced a result yet.
    fn fail(&self, call_id: &str, err: ToolError) -> bool {
        let response = ToolResult::failure(call_id, &err);
        let Some(previous) = self.transition(call_id, ToolCallStatus::Error, |call| {
            call.response = Some(response);
        }) else {
            return false;
        };

        // Executing calls report through the execution service.
        if previous != ToolCallStatus::Executing {
            if let Some(name) = self.get_tool_call(call_id).map(|c| c.request.name) {
                self.events.publish(EventKind::ExecutionFailed {
                    call_id: call_id.to_string(),
                    name,
                    error: err.to_string(),
                });
            }
        }
        true
    }

    fn notify_update(&self) {
        let callback = self.on_update.read().clone();
        if let Some(callback) = callback {
            let calls = self.get_tool_calls();
            callback(&calls);
        }
    }

    fn complete_batch_if_done(&self, batch_id: u64) {
        let finished = self.state.lock().take_finished_batch(batch_id);
        let Some((sender, calls)) = finished else {
            return;
        };

        info!("Batch {} complete", batch_id);
        let callback = self.on_complete.read().clone();
        if let Some(callback) = callback {
            callback(&calls);
        }
        let _ = sender.send(calls);
    }

    fn snapshot_batch(&self, call_ids: &[String]) -> Vec<ToolCall> {
        self.state.lock().batch_calls(call_ids)
    }

    /// Force a live call to `error` and cancel its token. Returns false if
    /// the call is unknown or already terminal.
    pub fn cancel_tool_call(&self, call_id: &str) -> bool {
        let token = self.state.lock().tokens.get(call_id).cloned();
        let cancelled = self.fail(call_id, ToolError::Cancelled("Cancelled by user".to_string()));
        if let Some(token) = token {
            token.cancel();
        }
        cancelled
    }

    pub fn get_active_tool_calls(&self) -> Vec<ToolCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| !c.is_terminal())
            .cloned()
            .collect()
    }

    pub fn get_tool_call(&self, call_id: &str) -> Option<ToolCall> {
        self.state
            .lock()
            .calls
            .iter()
            .find(|c| c.call_id() == call_id)
            .cloned()
    }

    /// Every tracked call in acceptance order.
    pub fn get_tool_calls(&self) -> Vec<ToolCall> {
        self.state.lock().calls.clone()
    }

    /// Forget a terminal call so its id can be reused.
    pub fn evict_tool_call(&self, call_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.calls.len();
        state.calls.retain(|c| !(c.call_id() == call_id && c.is_terminal()));
        state.calls.len() != before
    }

    /// Forget every terminal call. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.calls.len();
        state.calls.retain(|c| !c.is_terminal());
        before - state.calls.len()
    }
}

/// Bare name and namespace, accepting flattened `namespace::name` requests.
fn resolve_name(request: &ToolCallRequest) -> (String, Option<String>) {
    match (&request.namespace, split_qualified_name(&request.name)) {
        (None, Some((namespace, name))) => (name.to_string(), Some(namespace.to_string())),
        _ => (request.name.clone(), request.namespace.clone()),
    }
}
