//! Tool manifests stored in project directories.
//!
//! A manifest is a JSON or YAML document:
//!
//! ```yaml
//! name: lint
//! description: Run the project linter
//! parameters:
//!   type: object
//!   properties:
//!     fix: {type: boolean}
//! command: ["./scripts/lint.sh"]
//! confirm: true
//! ```

use crate::error::DiscoveryError;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const MANIFEST_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub confirm: bool,
}

impl ToolManifest {
    pub fn parse(path: &Path, text: &str) -> Result<Self, DiscoveryError> {
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let parsed = if is_json {
            serde_json::from_str(text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(text).map_err(|e| e.to_string())
        };
        parsed.map_err(|reason| DiscoveryError::Manifest {
            path: path.to_path_buf(),
            reason,
        })
    }
}

/// Manifest files in `dir`, sorted by path. A missing directory is empty.
pub async fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !fs::try_exists(dir).await? {
        debug!("Tool directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_manifest = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| MANIFEST_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if is_manifest && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub async fn load_manifest(path: &Path) -> Result<ToolManifest, DiscoveryError> {
    let text = fs::read_to_string(path).await?;
    ToolManifest::parse(path, &text)
}
