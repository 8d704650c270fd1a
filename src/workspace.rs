//! Workspace path validation.
//!
//! A session's workspace must be a writable directory before the control
//! loop touches it. These are configuration errors surfaced to the CLI, not
//! session failures.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from workspace validation.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The path does not exist and creation was not requested
    #[error("Workspace does not exist: {0} (pass --init-workspace to create it)")]
    NotFound(PathBuf),

    /// The path exists but is not a directory
    #[error("Workspace is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The directory cannot be written to
    #[error("Workspace is not writable: {path}: {message}")]
    NotWritable { path: PathBuf, message: String },

    /// IO error while probing the path
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate (and optionally create) a session workspace.
///
/// Returns the canonicalized path on success.
pub fn ensure_workspace(path: &Path, create: bool) -> Result<PathBuf, WorkspaceError> {
    if !path.exists() {
        if !create {
            return Err(WorkspaceError::NotFound(path.to_path_buf()));
        }
        fs::create_dir_all(path)?;
    }

    let path = path.canonicalize()?;
    if !path.is_dir() {
        return Err(WorkspaceError::NotADirectory(path));
    }

    // Permission bits from metadata are unreliable across filesystems, so
    // probe with a real write.
    let probe = path.join(".hone-write-probe");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            Ok(path)
        }
        Err(e) => Err(WorkspaceError::NotWritable {
            path,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_directory_is_accepted() {
        let dir = TempDir::new().unwrap();
        let resolved = ensure_workspace(dir.path(), false).unwrap();
        assert!(resolved.is_dir());
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent");
        let err = ensure_workspace(&missing, false).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
        assert!(err.to_string().contains("--init-workspace"));
    }

    #[test]
    fn test_missing_with_create() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nested/workspace");
        let resolved = ensure_workspace(&missing, true).unwrap();
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = ensure_workspace(&file, false).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotADirectory(_)));
    }

    #[test]
    fn test_probe_file_is_removed() {
        let dir = TempDir::new().unwrap();
        ensure_workspace(dir.path(), false).unwrap();
        assert!(!dir.path().join(".hone-write-probe").exists());
    }
}
