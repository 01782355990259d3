//! In-process event bus.
//!
//! Every service reports through an [`EventBus`]. Delivery is synchronous and
//! at-most-once per publish: handlers registered for the exact event type and
//! handlers registered for [`WILDCARD`] each see the event once. Nothing is
//! persisted or replayed.

use crate::types::{ConfirmationOutcome, ToolConfirmationDetails};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::warn;

/// Subscribe to this type to receive every event.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "tool.registered")]
    ToolRegistered { name: String, namespace: String },

    #[serde(rename = "tool.execution.requested")]
    ExecutionRequested {
        call_id: String,
        name: String,
        namespace: Option<String>,
    },

    #[serde(rename = "tool.execution.started")]
    ExecutionStarted { call_id: String, name: String },

    #[serde(rename = "tool.execution.completed")]
    ExecutionCompleted {
        call_id: String,
        name: String,
        execution_time_ms: u64,
    },

    #[serde(rename = "tool.execution.failed")]
    ExecutionFailed {
        call_id: String,
        name: String,
        error: String,
    },

    #[serde(rename = "tool.confirmation.requested")]
    ConfirmationRequested {
        call_id: String,
        name: String,
        details: ToolConfirmationDetails,
    },

    #[serde(rename = "tool.confirmation.received")]
    ConfirmationReceived {
        call_id: String,
        name: String,
        outcome: ConfirmationOutcome,
    },

    #[serde(rename = "checkpoint.created")]
    CheckpointCreated {
        id: String,
        description: String,
        files: Vec<String>,
    },

    #[serde(rename = "checkpoint.restored")]
    CheckpointRestored { id: String },

    #[serde(rename = "tool.discovered")]
    ToolDiscovered {
        name: String,
        namespace: String,
        source: String,
    },

    #[serde(rename = "validation.failed")]
    ValidationFailed { tool: String, errors: Vec<String> },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolRegistered { .. } => "tool.registered",
            Self::ExecutionRequested { .. } => "tool.execution.requested",
            Self::ExecutionStarted { .. } => "tool.execution.started",
            Self::ExecutionCompleted { .. } => "tool.execution.completed",
            Self::ExecutionFailed { .. } => "tool.execution.failed",
            Self::ConfirmationRequested { .. } => "tool.confirmation.requested",
            Self::ConfirmationReceived { .. } => "tool.confirmation.received",
            Self::CheckpointCreated { .. } => "checkpoint.created",
            Self::CheckpointRestored { .. } => "checkpoint.restored",
            Self::ToolDiscovered { .. } => "tool.discovered",
            Self::ValidationFailed { .. } => "validation.failed",
        }
    }

    /// Call id for per-call events.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionRequested { call_id, .. }
            | Self::ExecutionStarted { call_id, .. }
            | Self::ExecutionCompleted { call_id, .. }
            | Self::ExecutionFailed { call_id, .. }
            | Self::ConfirmationRequested { call_id, .. }
            | Self::ConfirmationReceived { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

impl From<EventKind> for Event {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, event_type: &str, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                handlers.remove(event_type);
            }
        }
    }
}

/// Cheap-to-clone handle onto a shared subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: impl Into<Event>) {
        let event = event.into();
        let event_type = event.event_type();

        // Snapshot so handlers may subscribe or publish re-entrantly.
        let targets: Vec<EventHandler> = {
            let handlers = self.inner.handlers.read();
            [event_type, WILDCARD]
                .iter()
                .filter_map(|key| handlers.get(*key))
                .flat_map(|list| list.iter().map(|(_, h)| Arc::clone(h)))
                .collect()
        };

        for handler in targets {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!("Event handler panicked while handling {}", event_type);
            }
        }
    }

    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.register(event_type, id, Arc::new(handler))
    }

    /// Forward matching events into an unbounded channel. The handler
    /// unregisters itself once the receiver is gone.
    pub fn subscribe_channel(&self, event_type: &str) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let bus = Arc::downgrade(&self.inner);
        let key = event_type.to_string();
        let forward = move |event: &Event| {
            if tx.send(event.clone()).is_err() {
                if let Some(bus) = bus.upgrade() {
                    bus.remove(&key, id);
                }
            }
        };
        let subscription = self.register(event_type, id, Arc::new(forward));
        (subscription, rx)
    }

    fn register(&self, event_type: &str, id: u64, handler: EventHandler) -> Subscription {
        self.inner
            .handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            event_type: event_type.to_string(),
            id,
        }
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Registration handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    bus: Weak<BusInner>,
    event_type: String,
    id: u64,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.event_type, self.id);
        }
    }
}
