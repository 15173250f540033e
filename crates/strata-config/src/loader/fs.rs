//! File system seam used by the layer loaders and the settings editor

use std::path::Path;

use async_trait::async_trait;

use crate::error::{ConfigurationError, IoOperation, Result};

/// Async access to settings files
///
/// Implemented over `tokio::fs` by [`DiskFileSystem`]; tests and embedders can
/// provide their own.
#[async_trait]
pub trait SettingsFileSystem: Send + Sync {
    /// Read a file as UTF-8; `Ok(None)` when it does not exist
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>>;

    /// Write a file, creating missing parent directories
    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    async fn is_dir(&self, path: &Path) -> bool;

    async fn exists(&self, path: &Path) -> bool;
}

/// Settings files on the local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFileSystem;

impl DiskFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SettingsFileSystem for DiskFileSystem {
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigurationError::io(
                path.to_path_buf(),
                IoOperation::Read,
                e,
            )),
        }
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigurationError::io(parent.to_path_buf(), IoOperation::Write, e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ConfigurationError::io(path.to_path_buf(), IoOperation::Write, e))
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let fs = DiskFileSystem::new();
        let content = fs.read_to_string(&dir.path().join("nope.json")).await.unwrap();
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let fs = DiskFileSystem::new();
        let path = dir.path().join("a").join(".strata").join("settings.json");

        fs.write(&path, "{}").await.unwrap();

        assert!(fs.exists(&path).await);
        assert!(fs.is_dir(&dir.path().join("a")).await);
        assert!(!fs.is_dir(&path).await);
        assert_eq!(fs.read_to_string(&path).await.unwrap().as_deref(), Some("{}"));
    }
}
