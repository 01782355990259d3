use std::fs;
use std::path::{Component, Path, PathBuf};
use toolwright_core::ToolError;

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Resolves tool-supplied paths against the workspace root.
///
/// This keeps built-in tools inside the workspace; it is a convenience
/// boundary, not an isolation mechanism.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = fs::canonicalize(root)
            .map_err(|e| ToolError::Infrastructure(format!("Invalid workspace root: {}", e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an existing file.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, ToolError> {
        let full_path = self.join_checked(path.as_ref())?;

        let canonical = fs::canonicalize(&full_path)
            .map_err(|_| ToolError::validation(format!("Path does not exist: {}", full_path.display())))?;

        if !canonical.starts_with(&self.root) {
            return Err(ToolError::validation("Path escapes workspace"));
        }

        if let Ok(metadata) = fs::metadata(&canonical) {
            if metadata.is_file() && metadata.len() > MAX_FILE_SIZE {
                return Err(ToolError::validation("File too large"));
            }
        }

        Ok(canonical)
    }

    /// Resolve a path that may not exist yet.
    pub fn resolve_new(&self, path: impl AsRef<Path>) -> Result<PathBuf, ToolError> {
        let full_path = self.join_checked(path.as_ref())?;

        // Walk existing ancestors so a symlinked directory cannot escape.
        let mut current = self.root.clone();
        if let Ok(relative) = full_path.strip_prefix(&self.root) {
            for component in relative.components() {
                current.push(component);
                if !current.exists() {
                    break;
                }
                if let Ok(canonical) = fs::canonicalize(&current) {
                    if !canonical.starts_with(&self.root) {
                        return Err(ToolError::validation("Symlink escapes workspace"));
                    }
                }
            }
        }

        Ok(full_path)
    }

    fn join_checked(&self, path: &Path) -> Result<PathBuf, ToolError> {
        if path.as_os_str().is_empty() {
            return Err(ToolError::validation("Empty path"));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::validation("Path traversal detected"));
        }

        if path.is_absolute() {
            if path.starts_with(&self.root) {
                return Ok(path.to_path_buf());
            }
            return Err(ToolError::validation("Absolute paths outside the workspace are not allowed"));
        }

        Ok(self.root.join(path))
    }
}
