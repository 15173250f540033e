//! Options of the configuration service itself

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, IoOperation, Result};

/// Service options, loadable from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOptions {
    /// Local user settings document
    pub user_settings_path: PathBuf,
    /// Directory inside each folder that holds its settings
    pub folder_config_dir: String,
    /// File name of folder and user settings documents
    pub settings_file_name: String,
    /// Authority of the remote environment, when the service runs against one
    pub remote_authority: Option<String>,
    /// Buffer size of every event channel
    pub event_capacity: usize,
    /// Watch layer files and reload them on change
    pub watch_files: bool,
}

impl ServiceOptions {
    /// Options with the user settings at `path`
    pub fn with_user_settings(path: impl Into<PathBuf>) -> Self {
        Self {
            user_settings_path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_remote_authority(mut self, authority: impl Into<String>) -> Self {
        self.remote_authority = Some(authority.into());
        self
    }

    /// Parse options from TOML text; missing fields take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ConfigurationError::Options(format!("Failed to parse options: {}", e)))
    }

    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::io(path.to_path_buf(), IoOperation::Read, e))?;
        Self::from_toml_str(&content)
    }

    /// Directory holding the settings of `folder`
    pub fn folder_config_path(&self, folder: &Path) -> PathBuf {
        folder.join(&self.folder_config_dir)
    }

    /// Settings document of `folder`
    pub fn folder_settings_path(&self, folder: &Path) -> PathBuf {
        self.folder_config_path(folder).join(&self.settings_file_name)
    }

    fn default_user_settings_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata")
            .join("settings.json")
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            user_settings_path: Self::default_user_settings_path(),
            folder_config_dir: ".strata".to_string(),
            settings_file_name: "settings.json".to_string(),
            remote_authority: None,
            event_capacity: 1024,
            watch_files: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = ServiceOptions::default();
        assert_eq!(options.folder_config_dir, ".strata");
        assert_eq!(options.settings_file_name, "settings.json");
        assert_eq!(options.event_capacity, 1024);
        assert!(options.user_settings_path.ends_with("strata/settings.json"));
        assert_eq!(
            options.folder_settings_path(Path::new("/work/a")),
            PathBuf::from("/work/a/.strata/settings.json")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let options = ServiceOptions::from_toml_str(
            r#"
            remote_authority = "ssh-remote+box"
            event_capacity = 16
            "#,
        )
        .unwrap();

        assert_eq!(options.remote_authority.as_deref(), Some("ssh-remote+box"));
        assert_eq!(options.event_capacity, 16);
        assert_eq!(options.folder_config_dir, ".strata");
    }

    #[test]
    fn test_invalid_toml_is_options_error() {
        let err = ServiceOptions::from_toml_str("event_capacity = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::Options(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "folder_config_dir = \".config\"\nwatch_files = true\n").unwrap();

        let options = ServiceOptions::from_file(&path).unwrap();
        assert_eq!(options.folder_config_dir, ".config");
        assert!(options.watch_files);

        let missing = ServiceOptions::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigurationError::Io { .. }));
    }
}
