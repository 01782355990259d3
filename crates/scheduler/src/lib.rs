//! Drives batches of tool calls through validation, approval and execution.

pub mod call;
pub mod error;
pub mod scheduler;

pub use call::ToolCall;
pub use error::SchedulerError;
pub use scheduler::{BatchHandle, CallsCallback, ToolScheduler};
