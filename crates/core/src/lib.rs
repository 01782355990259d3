//! Shared data model, error taxonomy and event bus for the toolwright
//! tool-execution core.

pub mod error;
pub mod events;
pub mod types;

pub use error::ToolError;
pub use events::{Event, EventBus, EventHandler, EventKind, Subscription, WILDCARD};
pub use types::*;

pub use tokio_util::sync::CancellationToken;
