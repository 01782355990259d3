//! Runs one validated tool call under a timeout, with optional
//! checkpointing and running statistics.

pub mod service;
pub mod stats;

pub use service::{ExecuteOptions, ExecutionService, DEFAULT_TIMEOUT};
pub use stats::{ExecutionStats, ToolStats};
