//! Client side of a remote tool server.

use super::protocol::{
    CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    RemoteToolSpec, PROTOCOL_VERSION,
};
use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Responses larger than this are treated as protocol errors.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How to launch a remote tool server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
}

/// One JSON-RPC session. Requests are serialized over the connection.
pub struct RemoteToolClient {
    name: String,
    connection: Mutex<Connection>,
    child: Mutex<Option<Child>>,
    next_id: AtomicI64,
    initialized: AtomicBool,
    request_timeout: Duration,
}

impl RemoteToolClient {
    /// Launch a server process and talk to it over its stdio.
    pub async fn spawn(config: ServerConfig) -> Result<Self, DiscoveryError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DiscoveryError::Io(std::io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DiscoveryError::Io(std::io::Error::other("failed to capture stdout")))?;

        info!("Spawned tool server {} ({})", config.name, config.command);
        let client = Self::connect_stream(config.name, stdout, stdin);
        *client.child.lock().await = Some(child);
        Ok(client)
    }

    /// Use an existing byte stream pair as the transport.
    pub fn connect_stream<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            connection: Mutex::new(Connection {
                reader: BufReader::new(Box::new(reader) as BoxedReader),
                writer: Box::new(writer),
            }),
            child: Mutex::new(None),
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Handshake: `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, DiscoveryError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "toolwright", "version": env!("CARGO_PKG_VERSION")}
        });
        let result: InitializeResult = self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized").await?;
        self.initialized.store(true, Ordering::SeqCst);

        debug!(
            "Tool server {} initialized ({} {})",
            self.name, result.server_info.name, result.protocol_version
        );
        Ok(result)
    }

    /// All advertised tools, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, DiscoveryError> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({"cursor": c}));
            let page: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, DiscoveryError> {
        self.ensure_initialized()?;
        let params = json!({"name": name, "arguments": arguments});
        let result: CallToolResult = self.request("tools/call", Some(params)).await?;
        if result.is_error {
            return Err(DiscoveryError::ToolCallFailed(result.text()));
        }
        Ok(result)
    }

    /// Close the session and stop the server process, if any.
    pub async fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        {
            let mut conn = self.connection.lock().await;
            let _ = conn.writer.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop tool server {}: {}", self.name, e);
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), DiscoveryError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DiscoveryError::NotInitialized(self.name.clone()))
        }
    }

    async fn request<R>(&self, method: &str, params: Option<Value>) -> Result<R, DiscoveryError>
    where
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let mut conn = self.connection.lock().await;
        let exchange = async {
            write_line(&mut conn.writer, &line).await?;
            read_response(&mut conn.reader, id, &self.name).await
        };
        let response = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| DiscoveryError::Timeout(method.to_string()))??;

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    async fn notify(&self, method: &str) -> Result<(), DiscoveryError> {
        let line = serde_json::to_string(&JsonRpcRequest::notification(method))?;
        let mut conn = self.connection.lock().await;
        write_line(&mut conn.writer, &line).await
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> Result<(), DiscoveryError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read until the response for `id`, skipping server-initiated messages.
async fn read_response(
    reader: &mut BufReader<BoxedReader>,
    id: i64,
    server: &str,
) -> Result<JsonRpcResponse, DiscoveryError> {
    loop {
        let mut line = String::new();
        let limit = MAX_MESSAGE_SIZE as u64 + 1;
        if (&mut *reader).take(limit).read_line(&mut line).await? == 0 {
            return Err(DiscoveryError::ServerExited(server.to_string()));
        }
        if line.trim_end_matches('\n').len() > MAX_MESSAGE_SIZE {
            return Err(DiscoveryError::InvalidResponse(format!(
                "message exceeds {} bytes",
                MAX_MESSAGE_SIZE
            )));
        }
        if line.trim().is_empty() {
            continue;
        }

        let response: JsonRpcResponse = serde_json::from_str(&line)?;
        if response.is_server_message() {
            debug!("Ignoring message from {}: {:?}", server, response.method);
            continue;
        }
        // Late answer to a request that already timed out.
        if response.numeric_id().is_some_and(|seen| seen < id) {
            debug!("Discarding stale response {:?} from {}", response.id, server);
            continue;
        }
        if !response.matches(id) {
            return Err(DiscoveryError::InvalidResponse(format!(
                "expected id {}, got {:?}",
                id, response.id
            )));
        }
        return Ok(response);
    }
}
