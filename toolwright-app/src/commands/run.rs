use crate::bootstrap::Runtime;
use anyhow::{Context, Result};
use serde_json::Value;
use toolwright_core::{split_qualified_name, CancellationToken, ToolCallRequest, ToolCallStatus};
use tracing::info;

/// Runs a single tool call through the scheduler and prints its result.
/// Ctrl-C cancels the call.
pub async fn run(runtime: &Runtime, tool: &str, params: Option<&str>) -> Result<()> {
    let params: Value = match params {
        Some(raw) => serde_json::from_str(raw).context("Tool parameters must be a JSON object")?,
        None => Value::Object(Default::default()),
    };

    let call_id = format!("cli-{}", std::process::id());
    let request = match split_qualified_name(tool) {
        Some((namespace, name)) => ToolCallRequest::new(&call_id, name, params).with_namespace(namespace),
        None => ToolCallRequest::new(&call_id, tool, params),
    };

    let token = CancellationToken::new();
    let ctrl_c = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                token.cancel();
            }
        })
    };

    let handle = runtime.scheduler.schedule(vec![request], token)?;
    let calls = handle.wait().await;
    ctrl_c.abort();

    let call = calls.into_iter().next().context("Scheduler returned no calls")?;
    let response = call.response.context("Call finished without a response")?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if call.status == ToolCallStatus::Completed {
        Ok(())
    } else {
        anyhow::bail!(
            "{} failed: {}",
            tool,
            response.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
