use crate::error::CheckpointError;
use crate::service::CheckpointMetadata;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "checkpoints.json";

/// Checkpoint metadata persisted as one JSON document.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, CheckpointError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        Ok(Self {
            path: directory.join(INDEX_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, checkpoints: &[CheckpointMetadata]) -> Result<(), CheckpointError> {
        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            let json = serde_json::to_string_pretty(checkpoints)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
