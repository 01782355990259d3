//! Builds every service once and wires them together.

use crate::config::Config;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use toolwright_checkpoint::CheckpointService;
use toolwright_core::EventBus;
use toolwright_executor::ExecutionService;
use toolwright_policy::{ConfirmationHandler, ConfirmationService, JsonTrustStore};
use toolwright_scheduler::ToolScheduler;
use toolwright_tools::discovery::{PROJECT_NAMESPACE, REMOTE_NAMESPACE};
use toolwright_tools::{register_builtin_tools, DiscoveryService, ToolRegistry, ValidationService};
use tracing::{info, warn};

pub struct Runtime {
    pub config: Config,
    pub events: EventBus,
    pub registry: Arc<ToolRegistry>,
    pub validation: Arc<ValidationService>,
    pub confirmation: Arc<ConfirmationService>,
    pub checkpoints: Arc<CheckpointService>,
    pub executor: Arc<ExecutionService>,
    pub discovery: Arc<DiscoveryService>,
    pub scheduler: Arc<ToolScheduler>,
    sweeper: Option<JoinHandle<()>>,
}

impl Runtime {
    pub async fn start(config: Config, handler: Option<Arc<dyn ConfirmationHandler>>) -> Result<Self> {
        config.validate()?;
        let root = config.workspace_root.clone();

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;

        let events = EventBus::new();

        let registry = Arc::new(ToolRegistry::with_events(events.clone()));
        register_builtin_tools(&registry, &root).context("Failed to register builtin tools")?;

        let validation = Arc::new(ValidationService::new().with_events(events.clone()));

        let trust_store = Arc::new(JsonTrustStore::new(config.trust_file()));
        let confirmation = ConfirmationService::new(trust_store)
            .allow_unconfirmed_dangerous(config.confirmation.allow_unconfirmed_dangerous)
            .with_prompt_timeout(config.prompt_timeout());
        let confirmation = Arc::new(match handler {
            Some(handler) => confirmation.with_handler(handler),
            None => confirmation,
        });

        let checkpoints = Arc::new(
            CheckpointService::init(config.checkpoints.checkpoint.clone(), &root, Some(events.clone())).await,
        );
        let sweeper = checkpoints.is_enabled().then(|| {
            checkpoints.spawn_expiry_sweeper(Duration::from_secs(config.checkpoints.sweep_interval_secs.max(1)))
        });

        let executor = Arc::new(
            ExecutionService::new(Arc::clone(&validation))
                .with_checkpoints(Arc::clone(&checkpoints))
                .with_events(events.clone())
                .with_default_timeout(config.default_timeout()),
        );

        let discovery = Arc::new(DiscoveryService::new(Arc::clone(&registry), &root).with_events(events.clone()));
        for (i, dir) in config.project_dirs().iter().enumerate() {
            let namespace = if i == 0 {
                PROJECT_NAMESPACE.to_string()
            } else {
                format!("{PROJECT_NAMESPACE}-{i}")
            };
            match discovery.discover_directory(dir, &namespace).await {
                Ok(found) => info!("Discovered {} tools in {}", found.len(), dir.display()),
                Err(e) => warn!("Skipping tool directory {}: {}", dir.display(), e),
            }
        }
        for server in &config.discovery.servers {
            match discovery.connect_server(server.clone(), REMOTE_NAMESPACE).await {
                Ok(found) => info!("Discovered {} tools from server {}", found.len(), server.name),
                Err(e) => warn!("Skipping tool server {}: {}", server.name, e),
            }
        }

        let scheduler = Arc::new(ToolScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&validation),
            Arc::clone(&confirmation),
            Arc::clone(&executor),
            events.clone(),
        ));

        info!(
            "Runtime ready: {} tools, checkpoints {}",
            registry.count(),
            if checkpoints.is_enabled() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            events,
            registry,
            validation,
            confirmation,
            checkpoints,
            executor,
            discovery,
            scheduler,
            sweeper,
        })
    }

    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        self.discovery.shutdown().await;
        info!("Runtime stopped");
    }
}
