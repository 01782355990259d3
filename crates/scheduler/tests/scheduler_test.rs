#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use toolwright_core::{
    CancellationToken, ConfirmationOutcome, EventBus, ToolCallRequest, ToolCallStatus, ToolError,
    ToolResult, WILDCARD,
};
use toolwright_executor::ExecutionService;
use toolwright_policy::{
    ChannelConfirmationHandler, ConfirmationService, MemoryTrustStore, PendingConfirmation,
};
use toolwright_scheduler::{SchedulerError, ToolScheduler};
use toolwright_tools::{register_builtin_tools, ExecutionContext, Tool, ToolRegistry, ValidationService};

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Sleeps until cancelled"
    }
    fn schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, ctx: ExecutionContext, _params: Value) -> Result<ToolResult, ToolError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(ToolResult::ok(json!("done"))),
            _ = ctx.cancelled() => Err(ToolError::Cancelled("slow tool stopped".into())),
        }
    }
}

struct Harness {
    scheduler: Arc<ToolScheduler>,
    confirmation: Arc<ConfirmationService>,
    prompts: UnboundedReceiver<PendingConfirmation>,
    bus: EventBus,
    _workspace: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let registry = Arc::new(ToolRegistry::with_events(bus.clone()));
        register_builtin_tools(&registry, workspace.path()).unwrap();
        registry.register(Arc::new(SlowTool));

        let validation = Arc::new(ValidationService::new().with_events(bus.clone()));
        let (handler, prompts) = ChannelConfirmationHandler::new();
        let confirmation = Arc::new(
            ConfirmationService::new(Arc::new(MemoryTrustStore::new())).with_handler(Arc::new(handler)),
        );
        let executor = Arc::new(
            ExecutionService::new(Arc::clone(&validation)).with_events(bus.clone()),
        );
        let scheduler = Arc::new(ToolScheduler::new(
            registry,
            validation,
            Arc::clone(&confirmation),
            executor,
            bus.clone(),
        ));

        Self {
            scheduler,
            confirmation,
            prompts,
            bus,
            _workspace: workspace,
        }
    }

    fn root(&self) -> &Path {
        self._workspace.path()
    }
}

async fn wait_for_status(scheduler: &ToolScheduler, call_id: &str, status: ToolCallStatus) {
    for _ in 0..200 {
        if scheduler.get_tool_call(call_id).map(|c| c.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("call {call_id} never reached {status}");
}

#[tokio::test]
async fn test_echo_completes_without_prompt() {
    let mut h = Harness::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("c1", "echo", json!({"message": "hi"}))],
            CancellationToken::new(),
        )
        .unwrap();

    let calls = handle.wait().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, ToolCallStatus::Completed);
    let response = calls[0].response.as_ref().unwrap();
    assert_eq!(response.call_id, "c1");
    assert_eq!(response.data, Some(json!({"message": "hi"})));
    assert!(calls[0].end_time.is_some());
    assert!(h.prompts.try_recv().is_err());
    assert!(h.scheduler.get_active_tool_calls().is_empty());
}

#[tokio::test]
async fn test_unknown_tool_errors_immediately() {
    let h = Harness::new();
    let (_sub, mut events) = h.bus.subscribe_channel(WILDCARD);

    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("c1", "missing", json!({}))],
            CancellationToken::new(),
        )
        .unwrap();
    let calls = handle.wait().await;

    assert_eq!(calls[0].status, ToolCallStatus::Error);
    let response = calls[0].response.as_ref().unwrap();
    assert_eq!(response.metadata.as_ref().unwrap()["kind"], "not_found");

    assert_eq!(events.recv().await.unwrap().event_type(), "tool.execution.requested");
    assert_eq!(events.recv().await.unwrap().event_type(), "tool.execution.failed");
}

#[tokio::test]
async fn test_duplicate_call_ids_reject_batch() {
    let h = Harness::new();
    let err = h
        .scheduler
        .schedule(
            vec![
                ToolCallRequest::new("dup", "echo", json!({"message": "a"})),
                ToolCallRequest::new("dup", "echo", json!({"message": "b"})),
            ],
            CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(err, SchedulerError::DuplicateCallId("dup".into()));
    assert!(h.scheduler.get_tool_calls().is_empty());

    h.scheduler
        .schedule(
            vec![ToolCallRequest::new("c1", "echo", json!({"message": "a"}))],
            CancellationToken::new(),
        )
        .unwrap()
        .wait()
        .await;
    let again = h.scheduler.schedule(
        vec![ToolCallRequest::new("c1", "echo", json!({"message": "a"}))],
        CancellationToken::new(),
    );
    assert!(again.is_err());

    assert!(h.scheduler.evict_tool_call("c1"));
    assert!(h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("c1", "echo", json!({"message": "a"}))],
            CancellationToken::new(),
        )
        .is_ok());
}

#[tokio::test]
async fn test_empty_batch_completes() {
    let h = Harness::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    h.scheduler.on_all_tool_calls_complete(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let calls = h
        .scheduler
        .schedule(Vec::new(), CancellationToken::new())
        .unwrap()
        .wait()
        .await;
    assert!(calls.is_empty());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_params_error_before_execution() {
    let h = Harness::new();
    let calls = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("c1", "echo", json!({}))],
            CancellationToken::new(),
        )
        .unwrap()
        .wait()
        .await;
    let response = calls[0].response.as_ref().unwrap();
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert_eq!(response.metadata.as_ref().unwrap()["kind"], "validation");
    assert!(response.data.is_none());
}

#[tokio::test]
async fn test_write_file_proceed_always_then_trusted() {
    let mut h = Harness::new();
    let (_sub, mut events) = h.bus.subscribe_channel(WILDCARD);

    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w1", "write_file", json!({"path": "out.txt", "content": "one"}))],
            CancellationToken::new(),
        )
        .unwrap();

    let pending = h.prompts.recv().await.unwrap();
    assert_eq!(pending.call_id, "w1");
    let waiting = h.scheduler.get_tool_call("w1").unwrap();
    assert_eq!(waiting.status, ToolCallStatus::AwaitingApproval);
    assert!(waiting.confirmation_details.is_some());
    pending.respond(ConfirmationOutcome::ProceedAlways);

    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Completed);
    assert_eq!(std::fs::read_to_string(h.root().join("out.txt")).unwrap(), "one");
    assert!(h.confirmation.is_trusted("write_file", None));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    let order: Vec<_> = seen
        .into_iter()
        .filter(|t| t.starts_with("tool."))
        .collect();
    assert_eq!(
        order,
        vec![
            "tool.execution.requested",
            "tool.confirmation.requested",
            "tool.confirmation.received",
            "tool.execution.started",
            "tool.execution.completed",
        ]
    );

    let calls = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w2", "write_file", json!({"path": "out.txt", "content": "two"}))],
            CancellationToken::new(),
        )
        .unwrap()
        .wait()
        .await;
    assert_eq!(calls[0].status, ToolCallStatus::Completed);
    assert!(h.prompts.try_recv().is_err());
    assert_eq!(std::fs::read_to_string(h.root().join("out.txt")).unwrap(), "two");
}

#[tokio::test]
async fn test_declined_confirmation() {
    let mut h = Harness::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w1", "write_file", json!({"path": "no.txt", "content": "x"}))],
            CancellationToken::new(),
        )
        .unwrap();
    h.prompts.recv().await.unwrap().respond(ConfirmationOutcome::Cancelled);

    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    let response = calls[0].response.as_ref().unwrap();
    assert_eq!(response.metadata.as_ref().unwrap()["kind"], "confirmation_declined");
    assert!(!h.root().join("no.txt").exists());
    assert!(!h.confirmation.is_trusted("write_file", None));
}

#[tokio::test]
async fn test_modified_params_are_revalidated_and_used() {
    let mut h = Harness::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w1", "write_file", json!({"path": "a.txt", "content": "x"}))],
            CancellationToken::new(),
        )
        .unwrap();
    h.prompts.recv().await.unwrap().respond(ConfirmationOutcome::ModifiedAndApproved {
        params: json!({"path": "b.txt", "content": "edited"}),
    });
    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Completed);
    assert!(!h.root().join("a.txt").exists());
    assert_eq!(std::fs::read_to_string(h.root().join("b.txt")).unwrap(), "edited");

    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w2", "write_file", json!({"path": "c.txt", "content": "x"}))],
            CancellationToken::new(),
        )
        .unwrap();
    h.prompts.recv().await.unwrap().respond(ConfirmationOutcome::ModifiedAndApproved {
        params: json!({"path": "c.txt"}),
    });
    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert!(!h.root().join("c.txt").exists());
}

#[tokio::test]
async fn test_batch_cancellation_while_awaiting_approval() {
    let mut h = Harness::new();
    let token = CancellationToken::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w1", "write_file", json!({"path": "a.txt", "content": "x"}))],
            token.clone(),
        )
        .unwrap();

    let _pending = h.prompts.recv().await.unwrap();
    token.cancel();

    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert_eq!(calls[0].response.as_ref().unwrap().metadata.as_ref().unwrap()["kind"], "cancelled");
}

#[tokio::test]
async fn test_skip_confirmation() {
    let mut h = Harness::new();
    let calls = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w1", "write_file", json!({"path": "s.txt", "content": "x"})).skip_confirmation()],
            CancellationToken::new(),
        )
        .unwrap()
        .wait()
        .await;
    assert_eq!(calls[0].status, ToolCallStatus::Completed);
    assert!(h.prompts.try_recv().is_err());
}

#[tokio::test]
async fn test_cancel_tool_call_while_executing() {
    let h = Harness::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("s1", "slow", json!({}))],
            CancellationToken::new(),
        )
        .unwrap();

    wait_for_status(&h.scheduler, "s1", ToolCallStatus::Executing).await;
    assert_eq!(h.scheduler.get_active_tool_calls().len(), 1);
    assert!(h.scheduler.cancel_tool_call("s1"));
    assert!(!h.scheduler.cancel_tool_call("s1"));

    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert_eq!(calls[0].response.as_ref().unwrap().metadata.as_ref().unwrap()["kind"], "cancelled");
}

#[tokio::test]
async fn test_per_call_timeout() {
    let h = Harness::new();
    let calls = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("s1", "slow", json!({})).with_timeout(Duration::from_millis(50))],
            CancellationToken::new(),
        )
        .unwrap()
        .wait()
        .await;
    let response = calls[0].response.as_ref().unwrap();
    assert_eq!(response.metadata.as_ref().unwrap()["kind"], "timeout");
    assert!(response.execution_time.is_some());
}

#[tokio::test]
async fn test_statuses_never_regress_and_batch_completes_once() {
    let h = Harness::new();
    let history: Arc<Mutex<HashMap<String, Vec<ToolCallStatus>>>> = Arc::default();
    let completions = Arc::new(AtomicUsize::new(0));

    let hist = Arc::clone(&history);
    h.scheduler.on_tool_calls_update(move |calls| {
        let mut hist = hist.lock();
        for call in calls {
            let entry = hist.entry(call.call_id().to_string()).or_default();
            if entry.last() != Some(&call.status) {
                entry.push(call.status);
            }
        }
    });
    let c = Arc::clone(&completions);
    h.scheduler.on_all_tool_calls_complete(move |calls| {
        assert!(calls.iter().all(|call| call.is_terminal()));
        c.fetch_add(1, Ordering::SeqCst);
    });

    let requests = (0..3)
        .map(|i| ToolCallRequest::new(format!("e{i}"), "echo", json!({"message": i.to_string()})))
        .collect();
    let calls = h
        .scheduler
        .schedule(requests, CancellationToken::new())
        .unwrap()
        .wait()
        .await;
    assert!(calls.iter().all(|c| c.status == ToolCallStatus::Completed));
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    for (call_id, statuses) in history.lock().iter() {
        for pair in statuses.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{call_id}: {:?}", statuses);
        }
        assert_eq!(statuses.last(), Some(&ToolCallStatus::Completed));
    }

    assert_eq!(h.scheduler.clear_completed(), 3);
    assert!(h.scheduler.get_tool_calls().is_empty());
}

#[tokio::test]
async fn test_sibling_runs_while_another_awaits_approval() {
    let mut h = Harness::new();
    let handle = h
        .scheduler
        .schedule(
            vec![
                ToolCallRequest::new("w1", "write_file", json!({"path": "late.txt", "content": "x"})),
                ToolCallRequest::new("e1", "echo", json!({"message": "early"})),
            ],
            CancellationToken::new(),
        )
        .unwrap();

    let pending = h.prompts.recv().await.unwrap();
    wait_for_status(&h.scheduler, "e1", ToolCallStatus::Completed).await;
    assert_eq!(
        h.scheduler.get_tool_call("w1").unwrap().status,
        ToolCallStatus::AwaitingApproval
    );

    pending.respond(ConfirmationOutcome::ProceedOnce);
    let calls = handle.wait().await;
    assert!(calls.iter().all(|c| c.status == ToolCallStatus::Completed));
}

#[tokio::test]
async fn test_cancel_one_call_leaves_shared_caller_token_alone() {
    let mut h = Harness::new();
    let shared = CancellationToken::new();
    let handle = h
        .scheduler
        .schedule(
            vec![
                ToolCallRequest::new("s1", "slow", json!({})).with_cancellation(shared.clone()),
                ToolCallRequest::new("w1", "write_file", json!({"path": "kept.txt", "content": "x"}))
                    .with_cancellation(shared.clone()),
            ],
            CancellationToken::new(),
        )
        .unwrap();

    let pending = h.prompts.recv().await.unwrap();
    wait_for_status(&h.scheduler, "s1", ToolCallStatus::Executing).await;
    assert!(h.scheduler.cancel_tool_call("s1"));
    assert!(!shared.is_cancelled());

    pending.respond(ConfirmationOutcome::ProceedOnce);
    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert_eq!(calls[1].status, ToolCallStatus::Completed);
    assert!(h.root().join("kept.txt").exists());
}

#[tokio::test]
async fn test_batch_cancel_reaches_call_with_own_token_after_approval() {
    let mut h = Harness::new();
    let own = CancellationToken::new();
    let batch = CancellationToken::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("w1", "write_file", json!({"path": "never.txt", "content": "x"}))
                .with_cancellation(own.clone())],
            batch.clone(),
        )
        .unwrap();

    let pending = h.prompts.recv().await.unwrap();
    batch.cancel();
    pending.respond(ConfirmationOutcome::ProceedOnce);

    let calls = handle.wait().await;
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert_eq!(calls[0].response.as_ref().unwrap().metadata.as_ref().unwrap()["kind"], "cancelled");
    assert!(!h.root().join("never.txt").exists());
    assert!(!own.is_cancelled());
}

#[tokio::test]
async fn test_batch_cancel_reaches_executing_call_with_own_token() {
    let h = Harness::new();
    let batch = CancellationToken::new();
    let handle = h
        .scheduler
        .schedule(
            vec![ToolCallRequest::new("s1", "slow", json!({})).with_cancellation(CancellationToken::new())],
            batch.clone(),
        )
        .unwrap();

    wait_for_status(&h.scheduler, "s1", ToolCallStatus::Executing).await;
    batch.cancel();

    let calls = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
    assert_eq!(calls[0].status, ToolCallStatus::Error);
    assert_eq!(calls[0].response.as_ref().unwrap().metadata.as_ref().unwrap()["kind"], "cancelled");
}
