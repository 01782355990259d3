use crate::traits::Tool;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use toolwright_core::{
    qualified_name, split_qualified_name, EventBus, EventKind, DEFAULT_NAMESPACE,
};
use tracing::{debug, warn};

struct RegisteredTool {
    namespace: String,
    tool: Arc<dyn Tool>,
}

/// Namespaced lookup of installed tools.
///
/// Tools in the default namespace are keyed by their bare name, all others by
/// `namespace::name`. The map is shared between discovery (writer) and the
/// scheduler (reader), so every method takes `&self`.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    events: Option<EventBus>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_events(events: EventBus) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            events: Some(events),
        }
    }

    /// Register in the default namespace.
    pub fn register(&self, tool: Arc<dyn Tool>) -> &Self {
        self.register_in(tool, DEFAULT_NAMESPACE)
    }

    pub fn register_in(&self, tool: Arc<dyn Tool>, namespace: &str) -> &Self {
        let name = tool.name().to_string();
        let key = qualified_name(&name, Some(namespace));

        let previous = self.tools.write().insert(
            key.clone(),
            RegisteredTool {
                namespace: namespace.to_string(),
                tool,
            },
        );
        if previous.is_some() {
            warn!("Tool {} was already registered; overwriting", key);
        } else {
            debug!("Registered tool {}", key);
        }

        if let Some(events) = &self.events {
            events.publish(EventKind::ToolRegistered {
                name,
                namespace: namespace.to_string(),
            });
        }
        self
    }

    /// Resolve a tool. A name that already carries a namespace prefix is
    /// parsed directly when no namespace argument is given.
    pub fn get(&self, name: &str, namespace: Option<&str>) -> Option<Arc<dyn Tool>> {
        let key = Self::lookup_key(name, namespace);
        self.tools.read().get(&key).map(|entry| Arc::clone(&entry.tool))
    }

    pub fn contains(&self, name: &str, namespace: Option<&str>) -> bool {
        let key = Self::lookup_key(name, namespace);
        self.tools.read().contains_key(&key)
    }

    fn lookup_key(name: &str, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => qualified_name(name, Some(ns)),
            None => match split_qualified_name(name) {
                Some((ns, bare)) => qualified_name(bare, Some(ns)),
                None => name.to_string(),
            },
        }
    }

    pub fn unregister(&self, name: &str, namespace: Option<&str>) -> bool {
        let key = Self::lookup_key(name, namespace);
        self.tools.write().remove(&key).is_some()
    }

    /// Drop every tool of a namespace, returning how many were removed.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let mut tools = self.tools.write();
        let before = tools.len();
        tools.retain(|_, entry| entry.namespace != namespace);
        before - tools.len()
    }

    pub fn get_all_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.tool))
            .collect()
    }

    pub fn get_tools_by_namespace(&self, namespace: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .read()
            .values()
            .filter(|entry| entry.namespace == namespace)
            .map(|entry| Arc::clone(&entry.tool))
            .collect()
    }

    /// Sorted, de-duplicated namespace names.
    pub fn get_namespaces(&self) -> Vec<String> {
        self.tools
            .read()
            .values()
            .map(|entry| entry.namespace.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorted qualified names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.tools.read().len()
    }

    /// Function-calling schemas keyed by qualified name.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        let tools = self.tools.read();
        let mut keys: Vec<&String> = tools.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let tool = &tools[key].tool;
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": key,
                        "description": tool.description(),
                        "parameters": tool.schema()
                    }
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
