use crate::error::CheckpointError;
use crate::git::GitRepo;
use crate::store::CheckpointStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use toolwright_core::{EventBus, EventKind};
use tracing::{debug, info, warn};
use uuid::Uuid;

const BRANCH_PREFIX: &str = "toolwright/checkpoint-";
const STASH_PREFIX: &str = "toolwright-checkpoint-";
const AUTOSTASH_PREFIX: &str = "toolwright-autostash-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// Where metadata is kept. Defaults to a directory inside `.git`.
    pub directory: Option<PathBuf>,
    pub max_checkpoints: usize,
    pub expires_in_secs: u64,
    /// Tools that always get a checkpoint.
    pub shell_tools: Vec<String>,
    /// Tools that get a checkpoint when they name their target files.
    pub file_tools: Vec<String>,
    /// Keep the branch and metadata when a restore fails.
    pub retain_on_failure: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            max_checkpoints: 20,
            expires_in_secs: 3600,
            shell_tools: vec!["run_shell_command".to_string()],
            file_tools: vec!["write_file".to_string()],
            retain_on_failure: true,
        }
    }
}

impl CheckpointConfig {
    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub id: String,
    pub description: String,
    pub branch: String,
    /// Commit the checkpoint was taken on; restores diff against it.
    pub base_commit: String,
    pub original_branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub files: Vec<String>,
    /// Untracked files were captured in the stash's third parent.
    pub has_untracked: bool,
}

impl CheckpointMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointOptions {
    pub description: String,
    /// Limit the snapshot to these paths; empty means every change.
    pub files: Vec<PathBuf>,
}

impl CheckpointOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }
}

pub struct CheckpointService {
    config: CheckpointConfig,
    repo: Option<GitRepo>,
    /// Workspace location inside the repository, empty at the top level.
    workspace_prefix: PathBuf,
    store: Option<CheckpointStore>,
    checkpoints: Mutex<Vec<CheckpointMetadata>>,
    git_lock: Arc<AsyncMutex<()>>,
    events: Option<EventBus>,
}

impl CheckpointService {
    /// A service that never creates checkpoints.
    pub fn disabled(config: CheckpointConfig) -> Self {
        Self {
            config,
            repo: None,
            workspace_prefix: PathBuf::new(),
            store: None,
            checkpoints: Mutex::new(Vec::new()),
            git_lock: Arc::new(AsyncMutex::new(())),
            events: None,
        }
    }

    /// Detect the repository around `workspace_root` and load persisted
    /// checkpoints. Any missing piece leaves the service disabled.
    pub async fn init(config: CheckpointConfig, workspace_root: &Path, events: Option<EventBus>) -> Self {
        if !config.enabled {
            debug!("Checkpoints disabled by configuration");
            return Self::disabled(config);
        }
        if config.max_checkpoints == 0 {
            warn!("max_checkpoints must be greater than zero; checkpoints disabled");
            return Self::disabled(config);
        }

        let Some(repo) = GitRepo::detect(workspace_root).await else {
            info!("No git repository at {}; checkpoints disabled", workspace_root.display());
            return Self::disabled(config);
        };

        let workspace_prefix = workspace_prefix(repo.root(), workspace_root);

        let directory = match &config.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => repo.root().join(dir),
            None => match repo.git_dir().await {
                Ok(git_dir) => git_dir.join("toolwright-checkpoints"),
                Err(e) => {
                    warn!("Cannot locate git directory; checkpoints disabled: {}", e);
                    return Self::disabled(config);
                }
            },
        };
        let store = match CheckpointStore::new(&directory) {
            Ok(store) => store,
            Err(e) => {
                warn!("Cannot open checkpoint store at {}; checkpoints disabled: {}", directory.display(), e);
                return Self::disabled(config);
            }
        };
        let checkpoints = store.load().unwrap_or_else(|e| {
            warn!("Failed to load checkpoint metadata: {}", e);
            Vec::new()
        });

        let service = Self {
            config,
            repo: Some(repo),
            workspace_prefix,
            store: Some(store),
            checkpoints: Mutex::new(checkpoints),
            git_lock: Arc::new(AsyncMutex::new(())),
            events,
        };
        let expired = service.cleanup_expired().await;
        info!(
            "Checkpoints enabled ({} tracked, {} expired removed)",
            service.checkpoints.lock().len(),
            expired
        );
        service
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.repo.is_some()
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn should_create_checkpoint(&self, tool_name: &str, file_paths: &[PathBuf]) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.config.shell_tools.iter().any(|t| t == tool_name) {
            return true;
        }
        self.config.file_tools.iter().any(|t| t == tool_name) && !file_paths.is_empty()
    }

    pub async fn create_checkpoint(&self, options: CheckpointOptions) -> Result<CheckpointMetadata, CheckpointError> {
        let repo = self.repo.as_ref().ok_or(CheckpointError::Disabled)?;
        let _guard = self.git_lock.lock().await;

        let id = Uuid::new_v4().simple().to_string();
        let branch = format!("{BRANCH_PREFIX}{id}");
        let message = format!("{STASH_PREFIX}{id}");

        let base_commit = repo.head().await?;
        let original_branch = repo.current_branch().await?;
        let subset = !options.files.is_empty();
        let files: Vec<String> = if subset {
            options.files.iter().map(|p| self.repo_path(repo, p)).collect()
        } else {
            repo.changed_paths().await?
        };
        // Paths that do not exist yet have nothing to snapshot, and git
        // rejects them as pathspecs.
        let pathspecs: Vec<String> = files
            .iter()
            .filter(|p| !subset || repo.root().join(p).symlink_metadata().is_ok())
            .cloned()
            .collect();

        let stashed = if subset && pathspecs.is_empty() {
            None
        } else if subset {
            repo.stash_push(&message, &pathspecs).await?
        } else {
            repo.stash_push(&message, &[]).await?
        };

        let has_untracked = match stashed {
            Some(stash) => {
                let branched = repo.create_branch(&branch, &stash).await;
                let untracked = repo.resolve(&format!("{stash}^3")).await.is_some();
                // Put the caller's tree back before reporting anything.
                repo.stash_pop().await?;
                branched?;
                untracked
            }
            None => {
                repo.create_branch(&branch, &base_commit).await?;
                false
            }
        };

        let now = Utc::now();
        let expires_in = chrono::Duration::from_std(self.config.expires_in())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let metadata = CheckpointMetadata {
            id,
            description: options.description,
            branch,
            base_commit,
            original_branch,
            created_at: now,
            expires_at: now + expires_in,
            files,
            has_untracked,
        };

        let evicted: Vec<CheckpointMetadata> = {
            let mut checkpoints = self.checkpoints.lock();
            checkpoints.push(metadata.clone());
            let excess = checkpoints.len().saturating_sub(self.config.max_checkpoints);
            checkpoints.drain(..excess).collect()
        };
        self.persist();
        for old in evicted {
            debug!("Evicting checkpoint {}", old.id);
            self.spawn_branch_deletion(repo.clone(), old.branch);
        }

        info!("Created checkpoint {} on {}", metadata.id, metadata.branch);
        if let Some(events) = &self.events {
            events.publish(EventKind::CheckpointCreated {
                id: metadata.id.clone(),
                description: metadata.description.clone(),
                files: metadata.files.clone(),
            });
        }
        Ok(metadata)
    }

    pub async fn restore_checkpoint(&self, id: &str) -> Result<CheckpointMetadata, CheckpointError> {
        let repo = self.repo.as_ref().ok_or(CheckpointError::Disabled)?;
        let metadata = self
            .get_checkpoint(id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        let _guard = self.git_lock.lock().await;

        match Self::apply_checkpoint(repo, &metadata).await {
            Ok(()) => {
                self.forget(repo, &metadata).await;
                info!("Restored checkpoint {}", metadata.id);
                if let Some(events) = &self.events {
                    events.publish(EventKind::CheckpointRestored {
                        id: metadata.id.clone(),
                    });
                }
                Ok(metadata)
            }
            Err(e) if self.config.retain_on_failure => {
                warn!("Restore of {} failed; keeping {}: {}", metadata.id, metadata.branch, e);
                Err(CheckpointError::RestoreFailed {
                    branch: metadata.branch,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                self.forget(repo, &metadata).await;
                Err(e)
            }
        }
    }

    async fn apply_checkpoint(repo: &GitRepo, metadata: &CheckpointMetadata) -> Result<(), CheckpointError> {
        if repo.is_dirty().await? {
            let message = format!("{AUTOSTASH_PREFIX}{}", metadata.id);
            repo.stash_push(&message, &[]).await?;
            info!("Stashed uncommitted changes as {:?} before restoring", message);
        }

        let patch = repo.diff(&metadata.base_commit, &metadata.branch).await?;

        if let Some(original) = &metadata.original_branch {
            if repo.current_branch().await?.as_ref() != Some(original) {
                repo.checkout(original).await?;
            }
        }

        if !patch.trim().is_empty() {
            let mut file = tempfile::NamedTempFile::new()?;
            file.write_all(patch.as_bytes())?;
            file.flush()?;
            // The temp file is removed on drop whatever the outcome.
            repo.apply_three_way(file.path()).await?;
        }

        if metadata.has_untracked {
            repo.checkout_tree(&format!("{}^3", metadata.branch)).await?;
        }
        repo.reset_index().await
    }

    async fn forget(&self, repo: &GitRepo, metadata: &CheckpointMetadata) {
        if let Err(e) = repo.delete_branch(&metadata.branch).await {
            warn!("Failed to delete checkpoint branch {}: {}", metadata.branch, e);
        }
        self.checkpoints.lock().retain(|c| c.id != metadata.id);
        self.persist();
    }

    /// Non-expired checkpoints, oldest first.
    pub fn get_checkpoints(&self) -> Vec<CheckpointMetadata> {
        let now = Utc::now();
        self.checkpoints
            .lock()
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn get_checkpoint(&self, id: &str) -> Option<CheckpointMetadata> {
        self.checkpoints.lock().iter().find(|c| c.id == id).cloned()
    }

    /// Drop expired checkpoints and their branches. Returns how many were
    /// removed.
    pub async fn cleanup_expired(&self) -> usize {
        let Some(repo) = &self.repo else {
            return 0;
        };
        let _guard = self.git_lock.lock().await;

        let now = Utc::now();
        let expired: Vec<CheckpointMetadata> = {
            let mut checkpoints = self.checkpoints.lock();
            let (expired, live): (Vec<_>, Vec<_>) = checkpoints.drain(..).partition(|c| c.is_expired(now));
            *checkpoints = live;
            expired
        };
        if expired.is_empty() {
            return 0;
        }

        self.persist();
        for checkpoint in &expired {
            if let Err(e) = repo.delete_branch(&checkpoint.branch).await {
                debug!("Expired branch {} not deleted: {}", checkpoint.branch, e);
            }
        }
        expired.len()
    }

    /// Run [`CheckpointService::cleanup_expired`] every `interval` until the
    /// service is dropped or the handle aborted.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                let removed = service.cleanup_expired().await;
                if removed > 0 {
                    info!("Swept {} expired checkpoints", removed);
                }
            }
        })
    }

    fn spawn_branch_deletion(&self, repo: GitRepo, branch: String) {
        let lock = Arc::clone(&self.git_lock);
        tokio::spawn(async move {
            let _guard = lock.lock().await;
            if let Err(e) = repo.delete_branch(&branch).await {
                warn!("Failed to delete evicted checkpoint branch {}: {}", branch, e);
            }
        });
    }

    /// Repository-relative form of a workspace path.
    fn repo_path(&self, repo: &GitRepo, path: &Path) -> String {
        let relative = if path.is_absolute() {
            path.strip_prefix(repo.root())
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf())
        } else {
            self.workspace_prefix.join(path)
        };
        relative.to_string_lossy().replace('\\', "/")
    }

    // In-memory tracking stays authoritative when saving fails.
    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.checkpoints.lock().clone();
        if let Err(e) = store.save(&snapshot) {
            warn!("Failed to persist checkpoint metadata: {}", e);
        }
    }
}

/// Where `workspace` sits below `repo_root`. Both sides are canonicalized
/// since git reports the resolved toplevel.
fn workspace_prefix(repo_root: &Path, workspace: &Path) -> PathBuf {
    let root = std::fs::canonicalize(repo_root).unwrap_or_else(|_| repo_root.to_path_buf());
    let workspace = std::fs::canonicalize(workspace).unwrap_or_else(|_| workspace.to_path_buf());
    workspace
        .strip_prefix(&root)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
