//! Approval flow for tool calls that ask for it.
//!
//! The service owns the trust set (tools and sources the user approved
//! permanently) and delegates the actual prompt to a [`ConfirmationHandler`]
//! supplied by whichever front end is attached.

use crate::trust::{TrustSnapshot, TrustStore};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use toolwright_core::{qualified_name, ConfirmationOutcome, ToolConfirmationDetails};
use tracing::{debug, info, warn};

#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, call_id: &str, details: &ToolConfirmationDetails) -> ConfirmationOutcome;
}

/// A prompt waiting for an answer from the front end.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub call_id: String,
    pub details: ToolConfirmationDetails,
    responder: oneshot::Sender<ConfirmationOutcome>,
}

impl PendingConfirmation {
    pub fn respond(self, outcome: ConfirmationOutcome) {
        if self.responder.send(outcome).is_err() {
            debug!("Confirmation for {} arrived after the prompt closed", self.call_id);
        }
    }
}

/// Forwards prompts over a channel. Dropping a [`PendingConfirmation`]
/// without responding cancels the call.
#[derive(Clone)]
pub struct ChannelConfirmationHandler {
    sender: mpsc::UnboundedSender<PendingConfirmation>,
}

impl ChannelConfirmationHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConfirmation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ConfirmationHandler for ChannelConfirmationHandler {
    async fn confirm(&self, call_id: &str, details: &ToolConfirmationDetails) -> ConfirmationOutcome {
        let (responder, answer) = oneshot::channel();
        let pending = PendingConfirmation {
            call_id: call_id.to_string(),
            details: details.clone(),
            responder,
        };
        if self.sender.send(pending).is_err() {
            warn!("No front end is listening for confirmations");
            return ConfirmationOutcome::Cancelled;
        }
        answer.await.unwrap_or(ConfirmationOutcome::Cancelled)
    }
}

pub struct ConfirmationService {
    trusted_tools: RwLock<HashSet<String>>,
    trusted_sources: RwLock<HashSet<String>>,
    store: Arc<dyn TrustStore>,
    /// Held from snapshot to save so writes land in mutation order.
    persist_lock: Mutex<()>,
    handler: RwLock<Option<Arc<dyn ConfirmationHandler>>>,
    allow_unconfirmed_dangerous: bool,
    prompt_timeout: Option<Duration>,
}

impl ConfirmationService {
    /// Loads the persisted trust set. A store that cannot be read starts
    /// the service empty.
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to load trusted tools: {}", e);
                TrustSnapshot::default()
            }
        };
        debug!(
            "Loaded {} trusted tools and {} trusted sources",
            snapshot.tools.len(),
            snapshot.sources.len()
        );

        Self {
            trusted_tools: RwLock::new(snapshot.tools.into_iter().collect()),
            trusted_sources: RwLock::new(snapshot.sources.into_iter().collect()),
            store,
            persist_lock: Mutex::new(()),
            handler: RwLock::new(None),
            allow_unconfirmed_dangerous: false,
            prompt_timeout: None,
        }
    }

    pub fn with_handler(self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        *self.handler.write() = Some(handler);
        self
    }

    pub fn allow_unconfirmed_dangerous(mut self, allow: bool) -> Self {
        self.allow_unconfirmed_dangerous = allow;
        self
    }

    pub fn with_prompt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    /// Attach or detach the interactive front end.
    pub fn set_handler(&self, handler: Option<Arc<dyn ConfirmationHandler>>) {
        *self.handler.write() = handler;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    pub async fn request_confirmation(
        &self,
        call_id: &str,
        details: &ToolConfirmationDetails,
    ) -> ConfirmationOutcome {
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            if details.dangerous && !self.allow_unconfirmed_dangerous {
                info!("Refusing dangerous call {} without a confirmation handler", call_id);
                return ConfirmationOutcome::Cancelled;
            }
            return ConfirmationOutcome::ProceedOnce;
        };

        match self.prompt_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.confirm(call_id, details)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    info!("Confirmation for {} timed out after {:?}", call_id, limit);
                    ConfirmationOutcome::Cancelled
                }
            },
            None => handler.confirm(call_id, details).await,
        }
    }

    /// Persist what a "proceed always" answer grants.
    pub fn record_outcome(
        &self,
        name: &str,
        namespace: Option<&str>,
        details: &ToolConfirmationDetails,
        outcome: &ConfirmationOutcome,
    ) {
        match outcome {
            ConfirmationOutcome::ProceedAlways => self.mark_as_trusted(name, namespace),
            ConfirmationOutcome::ProceedAlwaysForSource => {
                match details.source.as_deref().or(namespace) {
                    Some(source) => self.mark_source_trusted(source),
                    None => self.mark_as_trusted(name, namespace),
                }
            }
            _ => {}
        }
    }

    pub fn is_trusted(&self, name: &str, namespace: Option<&str>) -> bool {
        {
            let tools = self.trusted_tools.read();
            if tools.contains(name) || tools.contains(&qualified_name(name, namespace)) {
                return true;
            }
        }
        namespace
            .map(|ns| self.trusted_sources.read().contains(ns))
            .unwrap_or(false)
    }

    pub fn is_source_trusted(&self, source: &str) -> bool {
        self.trusted_sources.read().contains(source)
    }

    pub fn mark_as_trusted(&self, name: &str, namespace: Option<&str>) {
        let key = qualified_name(name, namespace);
        if self.trusted_tools.write().insert(key.clone()) {
            info!("Trusted tool {}", key);
            self.persist();
        }
    }

    pub fn mark_source_trusted(&self, source: &str) {
        if self.trusted_sources.write().insert(source.to_string()) {
            info!("Trusted source {}", source);
            self.persist();
        }
    }

    pub fn remove_trusted(&self, name: &str, namespace: Option<&str>) -> bool {
        let key = qualified_name(name, namespace);
        let removed = self.trusted_tools.write().remove(&key);
        if removed {
            self.persist();
        }
        removed
    }

    pub fn remove_trusted_source(&self, source: &str) -> bool {
        let removed = self.trusted_sources.write().remove(source);
        if removed {
            self.persist();
        }
        removed
    }

    /// Forget every trusted tool and source.
    pub fn clear_trusted_tools(&self) {
        self.trusted_tools.write().clear();
        self.trusted_sources.write().clear();
        self.persist();
    }

    pub fn trusted_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.trusted_tools.read().iter().cloned().collect();
        tools.sort();
        tools
    }

    pub fn trusted_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.trusted_sources.read().iter().cloned().collect();
        sources.sort();
        sources
    }

    // The in-memory set stays authoritative when saving fails.
    fn persist(&self) {
        let _guard = self.persist_lock.lock();
        let snapshot = TrustSnapshot {
            tools: self.trusted_tools(),
            sources: self.trusted_sources(),
        };
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Failed to persist trusted tools: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{JsonTrustStore, MemoryTrustStore, TrustStoreError};
    use serde_json::json;
    use toolwright_core::ConfirmationKind;

    fn edit_details() -> ToolConfirmationDetails {
        ToolConfirmationDetails::new(
            "Confirm write",
            ConfirmationKind::Edit {
                file_path: "a.txt".into(),
                is_new_file: true,
                preview: String::new(),
            },
        )
    }

    fn service() -> ConfirmationService {
        ConfirmationService::new(Arc::new(MemoryTrustStore::new()))
    }

    struct FixedHandler(ConfirmationOutcome);

    #[async_trait]
    impl ConfirmationHandler for FixedHandler {
        async fn confirm(&self, _call_id: &str, _details: &ToolConfirmationDetails) -> ConfirmationOutcome {
            self.0.clone()
        }
    }

    struct NeverAnswers;

    #[async_trait]
    impl ConfirmationHandler for NeverAnswers {
        async fn confirm(&self, _call_id: &str, _details: &ToolConfirmationDetails) -> ConfirmationOutcome {
            std::future::pending().await
        }
    }

    struct FailingStore;

    impl TrustStore for FailingStore {
        fn load(&self) -> Result<TrustSnapshot, TrustStoreError> {
            Err(TrustStoreError::Io(std::io::Error::other("unreadable")))
        }
        fn save(&self, _snapshot: &TrustSnapshot) -> Result<(), TrustStoreError> {
            Err(TrustStoreError::Io(std::io::Error::other("read-only")))
        }
    }

    #[tokio::test]
    async fn test_no_handler_fails_closed_for_dangerous() {
        let service = service();
        let outcome = service
            .request_confirmation("c1", &edit_details().dangerous(true))
            .await;
        assert_eq!(outcome, ConfirmationOutcome::Cancelled);

        let outcome = service.request_confirmation("c2", &edit_details()).await;
        assert_eq!(outcome, ConfirmationOutcome::ProceedOnce);
    }

    #[tokio::test]
    async fn test_no_handler_dangerous_allowed_when_opted_in() {
        let service = service().allow_unconfirmed_dangerous(true);
        let outcome = service
            .request_confirmation("c1", &edit_details().dangerous(true))
            .await;
        assert_eq!(outcome, ConfirmationOutcome::ProceedOnce);
    }

    #[tokio::test]
    async fn test_handler_outcome_is_returned() {
        let modified = ConfirmationOutcome::ModifiedAndApproved {
            params: json!({"path": "b.txt"}),
        };
        let service = service().with_handler(Arc::new(FixedHandler(modified.clone())));
        assert_eq!(service.request_confirmation("c1", &edit_details()).await, modified);
    }

    #[tokio::test]
    async fn test_prompt_timeout_cancels() {
        let service = service()
            .with_handler(Arc::new(NeverAnswers))
            .with_prompt_timeout(Some(Duration::from_millis(20)));
        let outcome = service.request_confirmation("c1", &edit_details()).await;
        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_channel_handler_round_trip_and_drop() {
        let (handler, mut prompts) = ChannelConfirmationHandler::new();
        let service = Arc::new(service().with_handler(Arc::new(handler)));

        let s = Arc::clone(&service);
        let answered = tokio::spawn(async move { s.request_confirmation("c1", &edit_details()).await });
        let pending = prompts.recv().await.unwrap();
        assert_eq!(pending.call_id, "c1");
        pending.respond(ConfirmationOutcome::ProceedAlways);
        assert_eq!(answered.await.unwrap(), ConfirmationOutcome::ProceedAlways);

        let s = Arc::clone(&service);
        let dropped = tokio::spawn(async move { s.request_confirmation("c2", &edit_details()).await });
        drop(prompts.recv().await.unwrap());
        assert_eq!(dropped.await.unwrap(), ConfirmationOutcome::Cancelled);
    }

    #[test]
    fn test_trust_lookup_rules() {
        let service = service();
        service.mark_as_trusted("write_file", None);
        assert!(service.is_trusted("write_file", None));
        assert!(service.is_trusted("write_file", Some("default")));

        service.mark_as_trusted("search", Some("mcp"));
        assert!(service.is_trusted("search", Some("mcp")));
        assert!(!service.is_trusted("search", None));

        service.mark_source_trusted("project");
        assert!(service.is_trusted("anything", Some("project")));

        assert!(service.remove_trusted("search", Some("mcp")));
        assert!(!service.is_trusted("search", Some("mcp")));

        service.clear_trusted_tools();
        assert!(!service.is_trusted("write_file", None));
        assert!(!service.is_trusted("anything", Some("project")));
    }

    #[test]
    fn test_record_outcome() {
        let service = service();
        let details = edit_details().with_source("mcp");
        service.record_outcome("search", Some("mcp"), &details, &ConfirmationOutcome::ProceedOnce);
        assert!(!service.is_trusted("search", Some("mcp")));

        service.record_outcome("search", Some("mcp"), &details, &ConfirmationOutcome::ProceedAlwaysForSource);
        assert!(service.is_source_trusted("mcp"));
        assert!(service.is_trusted("other", Some("mcp")));
    }

    #[test]
    fn test_trust_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");

        let first = ConfirmationService::new(Arc::new(JsonTrustStore::new(&path)));
        first.mark_as_trusted("write_file", None);
        first.mark_source_trusted("mcp");

        let second = ConfirmationService::new(Arc::new(JsonTrustStore::new(&path)));
        assert!(second.is_trusted("write_file", None));
        assert!(second.is_source_trusted("mcp"));
    }

    #[test]
    fn test_persistence_failure_keeps_memory_state() {
        let service = ConfirmationService::new(Arc::new(FailingStore));
        service.mark_as_trusted("write_file", None);
        assert!(service.is_trusted("write_file", None));
    }

    #[test]
    fn test_concurrent_trust_updates_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        let service = Arc::new(ConfirmationService::new(Arc::new(JsonTrustStore::new(&path))));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    service.mark_as_trusted(&format!("tool_{i}"), None);
                    service.mark_source_trusted(&format!("source_{i}"));
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let reloaded = ConfirmationService::new(Arc::new(JsonTrustStore::new(&path)));
        assert_eq!(reloaded.trusted_tools().len(), 8);
        assert_eq!(reloaded.trusted_sources().len(), 8);
    }
}
