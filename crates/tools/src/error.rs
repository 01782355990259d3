use crate::discovery::protocol::JsonRpcError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Server {0} is not initialized")]
    NotInitialized(String),

    #[error("Server {0} exited unexpectedly")]
    ServerExited(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    Rpc(#[from] JsonRpcError),

    #[error("Remote tool call failed: {0}")]
    ToolCallFailed(String),
}

impl From<DiscoveryError> for toolwright_core::ToolError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::ToolCallFailed(msg) => Self::ExecutionFailed(msg),
            DiscoveryError::Rpc(e) => Self::ExecutionFailed(e.to_string()),
            other => Self::Infrastructure(other.to_string()),
        }
    }
}
