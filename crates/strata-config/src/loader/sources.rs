//! Loaders for the user, workspace and folder layers

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{read_document, read_standalone, SettingsFileSystem};
use crate::model::ConfigurationModel;

pub const TASKS_KEY: &str = "tasks";
pub const LAUNCH_KEY: &str = "launch";
pub const TASKS_FILE_NAME: &str = "tasks.json";
pub const LAUNCH_FILE_NAME: &str = "launch.json";

/// User settings document plus the user `tasks.json` next to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    path: PathBuf,
}

impl UserSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tasks_path(&self) -> PathBuf {
        sibling(&self.path, TASKS_FILE_NAME)
    }

    /// Every file this layer reads
    pub fn resources(&self) -> Vec<PathBuf> {
        vec![self.path.clone(), self.tasks_path()]
    }

    pub async fn load(
        &self,
        fs: &dyn SettingsFileSystem,
        excluded: &BTreeSet<String>,
    ) -> ConfigurationModel {
        let mut document = read_document(fs, &self.path).await;
        if let Some(tasks) = read_standalone(fs, &self.tasks_path()).await {
            document.insert(TASKS_KEY.to_string(), tasks);
        }
        debug!(path = %self.path.display(), keys = document.len(), "Loaded user settings");
        ConfigurationModel::parse(document, excluded)
    }
}

/// A folder entry of a workspace file, with its path resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFolderEntry {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Parsed workspace file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceDocument {
    pub folders: Vec<WorkspaceFolderEntry>,
    /// `settings` plus the `launch`/`tasks` passthrough values
    pub model: ConfigurationModel,
}

/// Loader for a multi-root workspace file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSettings {
    path: PathBuf,
}

impl WorkspaceSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(
        &self,
        fs: &dyn SettingsFileSystem,
        excluded: &BTreeSet<String>,
    ) -> WorkspaceDocument {
        let document = read_document(fs, &self.path).await;
        let base = self.path.parent().unwrap_or_else(|| Path::new(""));

        let folders = match document.get("folders") {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(|entry| folder_entry(base, entry))
                .collect(),
            Some(_) => {
                warn!(path = %self.path.display(), "Ignoring workspace folders that are not an array");
                Vec::new()
            }
            None => Vec::new(),
        };

        let mut settings = match document.get("settings") {
            Some(Value::Object(settings)) => settings.clone(),
            _ => Map::new(),
        };
        for key in [LAUNCH_KEY, TASKS_KEY] {
            if let Some(value) = document.get(key) {
                settings.insert(key.to_string(), value.clone());
            }
        }

        debug!(
            path = %self.path.display(),
            folders = folders.len(),
            "Loaded workspace file"
        );
        WorkspaceDocument {
            folders,
            model: ConfigurationModel::parse(settings, excluded),
        }
    }
}

fn folder_entry(base: &Path, entry: &Value) -> Option<WorkspaceFolderEntry> {
    let object = entry.as_object()?;
    let path = match object.get("path").and_then(Value::as_str) {
        Some(path) => path,
        None => {
            warn!("Ignoring workspace folder entry without a path");
            return None;
        }
    };
    Some(WorkspaceFolderEntry {
        path: resolve_folder_path(base, path),
        name: object
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Resolve a folder path of a workspace file against the file's directory
pub fn resolve_folder_path(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Settings of one workspace folder: the settings document plus standalone
/// `tasks.json` and `launch.json` from the same directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSettings {
    config_dir: PathBuf,
    settings_file_name: String,
}

impl FolderSettings {
    pub fn new(config_dir: impl Into<PathBuf>, settings_file_name: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            settings_file_name: settings_file_name.into(),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(&self.settings_file_name)
    }

    /// File holding the standalone `key`, if `key` is one
    pub fn standalone_path(&self, key: &str) -> Option<PathBuf> {
        match key {
            TASKS_KEY => Some(self.config_dir.join(TASKS_FILE_NAME)),
            LAUNCH_KEY => Some(self.config_dir.join(LAUNCH_FILE_NAME)),
            _ => None,
        }
    }

    pub fn resources(&self) -> Vec<PathBuf> {
        vec![
            self.settings_path(),
            self.config_dir.join(TASKS_FILE_NAME),
            self.config_dir.join(LAUNCH_FILE_NAME),
        ]
    }

    pub async fn load(
        &self,
        fs: &dyn SettingsFileSystem,
        excluded: &BTreeSet<String>,
    ) -> ConfigurationModel {
        let mut document = read_document(fs, &self.settings_path()).await;
        for key in [TASKS_KEY, LAUNCH_KEY] {
            if let Some(path) = self.standalone_path(key) {
                if let Some(value) = read_standalone(fs, &path).await {
                    document.insert(key.to_string(), value);
                }
            }
        }
        ConfigurationModel::parse(document, excluded)
    }
}

fn sibling(path: &Path, file_name: &str) -> PathBuf {
    path.parent()
        .map(|parent| parent.join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

/// Lexically resolve `.` and `..` components
pub(crate) fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
