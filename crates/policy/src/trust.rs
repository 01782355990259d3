use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrustStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted form of the trust set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

pub trait TrustStore: Send + Sync {
    fn load(&self) -> Result<TrustSnapshot, TrustStoreError>;
    fn save(&self, snapshot: &TrustSnapshot) -> Result<(), TrustStoreError>;
}

/// Trust set stored as a single JSON document.
pub struct JsonTrustStore {
    path: PathBuf,
}

impl JsonTrustStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrustStore for JsonTrustStore {
    fn load(&self) -> Result<TrustSnapshot, TrustStoreError> {
        if !self.path.exists() {
            return Ok(TrustSnapshot::default());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(TrustSnapshot::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, snapshot: &TrustSnapshot) -> Result<(), TrustStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        let json = serde_json::to_string_pretty(snapshot)?;
        file.write_all(json.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTrustStore {
    snapshot: Mutex<TrustSnapshot>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for MemoryTrustStore {
    fn load(&self) -> Result<TrustSnapshot, TrustStoreError> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, snapshot: &TrustSnapshot) -> Result<(), TrustStoreError> {
        *self.snapshot.lock() = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrustStore::new(dir.path().join("trust.json"));
        assert_eq!(store.load().unwrap(), TrustSnapshot::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTrustStore::new(dir.path().join("nested/trust.json"));
        let snapshot = TrustSnapshot {
            tools: vec!["write_file".into()],
            sources: vec!["mcp".into()],
        };
        store.save(&snapshot).unwrap();

        let reopened = JsonTrustStore::new(store.path());
        assert_eq!(reopened.load().unwrap(), snapshot);
        let leftovers = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_concurrent_saves_leave_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonTrustStore::new(dir.path().join("trust.json")));
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    let snapshot = TrustSnapshot {
                        tools: vec![format!("tool_{i}")],
                        sources: Vec::new(),
                    };
                    store.save(&snapshot).unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(store.load().unwrap().tools.len(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonTrustStore::new(&path).load(), Err(TrustStoreError::Json(_))));
    }
}
