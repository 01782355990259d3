use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoints are disabled")]
    Disabled,

    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("`{command}` failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Restore failed, checkpoint kept on branch {branch}: {reason}")]
    RestoreFailed { branch: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
