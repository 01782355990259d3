use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toolwright_checkpoint::CheckpointConfig;
use toolwright_tools::discovery::ServerConfig;

pub const CONFIG_ENV: &str = "TOOLWRIGHT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "toolwright.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workspace_root: PathBuf,
    pub data_dir: PathBuf,
    pub execution: ExecutionSection,
    pub confirmation: ConfirmationSection,
    pub checkpoints: CheckpointSection,
    pub discovery: DiscoverySection,
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            data_dir: PathBuf::from("./data"),
            execution: ExecutionSection::default(),
            confirmation: ConfirmationSection::default(),
            checkpoints: CheckpointSection::default(),
            discovery: DiscoverySection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    pub default_timeout_ms: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationSection {
    /// Let dangerous calls through when no front end is attached to ask.
    pub allow_unconfirmed_dangerous: bool,
    pub prompt_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    #[serde(flatten)]
    pub checkpoint: CheckpointConfig,
    pub sweep_interval_secs: u64,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointConfig::default(),
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Directories of tool manifests, relative to the workspace root.
    pub project_dirs: Vec<PathBuf>,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads from `TOOLWRIGHT_CONFIG`, falling back to `toolwright.yaml`.
    /// A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("TOOLWRIGHT_WORKSPACE") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(value) = lookup("TOOLWRIGHT_DEFAULT_TIMEOUT_MS") {
            self.execution.default_timeout_ms =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: "TOOLWRIGHT_DEFAULT_TIMEOUT_MS",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("TOOLWRIGHT_CHECKPOINTS_ENABLED") {
            self.checkpoints.checkpoint.enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "TOOLWRIGHT_CHECKPOINTS_ENABLED",
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "execution.default_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.checkpoints.checkpoint.max_checkpoints == 0 {
            return Err(ConfigError::Invalid(
                "checkpoints.max_checkpoints must be greater than zero".into(),
            ));
        }
        if self.confirmation.prompt_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "confirmation.prompt_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(server) = self.discovery.servers.iter().find(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "discovery server '{}' has no name",
                server.command
            )));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.execution.default_timeout_ms)
    }

    pub fn prompt_timeout(&self) -> Option<Duration> {
        self.confirmation.prompt_timeout_ms.map(Duration::from_millis)
    }

    pub fn trust_file(&self) -> PathBuf {
        self.data_dir.join("trusted_tools.json")
    }

    pub fn project_dirs(&self) -> Vec<PathBuf> {
        self.discovery
            .project_dirs
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    self.workspace_root.join(dir)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.execution.default_timeout_ms, 30_000);
        assert!(config.checkpoints.checkpoint.enabled);
        assert_eq!(config.checkpoints.checkpoint.max_checkpoints, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::from_yaml(
            r#"
workspace_root: /srv/project
checkpoints:
  max_checkpoints: 5
  retain_on_failure: false
  sweep_interval_secs: 60
discovery:
  project_dirs: [.toolwright/tools]
  servers:
    - name: search
      command: search-server
      args: ["--stdio"]
logging:
  filter: debug
"#,
        )
        .unwrap();

        assert_eq!(config.checkpoints.checkpoint.max_checkpoints, 5);
        assert!(!config.checkpoints.checkpoint.retain_on_failure);
        assert_eq!(config.checkpoints.sweep_interval_secs, 60);
        assert_eq!(config.discovery.servers[0].args, vec!["--stdio".to_string()]);
        assert_eq!(
            config.project_dirs(),
            vec![PathBuf::from("/srv/project/.toolwright/tools")]
        );
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TOOLWRIGHT_WORKSPACE", "/tmp/ws"),
            ("TOOLWRIGHT_DEFAULT_TIMEOUT_MS", "500"),
            ("TOOLWRIGHT_CHECKPOINTS_ENABLED", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.workspace_root, PathBuf::from("/tmp/ws"));
        assert_eq!(config.default_timeout(), Duration::from_millis(500));
        assert!(!config.checkpoints.checkpoint.enabled);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "TOOLWRIGHT_DEFAULT_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let mut config = Config::default();
        config.execution.default_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.checkpoints.checkpoint.max_checkpoints = 0;
        assert!(config.validate().is_err());
    }
}
