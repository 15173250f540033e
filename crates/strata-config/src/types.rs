//! Core value types shared by the registry, the resolver and the service

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Visibility class of a configuration property
///
/// Controls which layers may contribute a value for the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConfigurationScope {
    /// Only defaults and local user settings
    Application,
    /// Defaults and user settings (local and remote), never workspace
    Machine,
    /// Like `Machine`, but workspace and folder settings may override
    MachineOverridable,
    /// Every layer; the default when a property does not declare a scope
    #[default]
    Window,
    /// Every layer; folder values are read only for a given resource
    Resource,
    /// Like `Resource`, plus per-language override blocks
    LanguageOverridable,
}

impl ConfigurationScope {
    /// Scopes that may never be written into workspace or folder settings
    pub fn is_user_only(self) -> bool {
        matches!(
            self,
            ConfigurationScope::Application | ConfigurationScope::Machine
        )
    }

    /// Scopes whose values belong to the remote user layer when a remote is active
    pub fn is_machine(self) -> bool {
        matches!(
            self,
            ConfigurationScope::Machine | ConfigurationScope::MachineOverridable
        )
    }
}

/// Destination of a configuration write, also used as the source of change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigurationTarget {
    Default,
    User,
    UserLocal,
    UserRemote,
    Workspace,
    WorkspaceFolder,
    Memory,
}

impl std::fmt::Display for ConfigurationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfigurationTarget::Default => "DEFAULT",
            ConfigurationTarget::User => "USER",
            ConfigurationTarget::UserLocal => "USER_LOCAL",
            ConfigurationTarget::UserRemote => "USER_REMOTE",
            ConfigurationTarget::Workspace => "WORKSPACE",
            ConfigurationTarget::WorkspaceFolder => "WORKSPACE_FOLDER",
            ConfigurationTarget::Memory => "MEMORY",
        };
        f.write_str(name)
    }
}

/// Optional resource and language a lookup or write is scoped to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConfigurationOverrides {
    /// A path inside (or equal to) a workspace folder
    pub resource: Option<PathBuf>,
    /// Language identifier, e.g. `rust`
    pub override_identifier: Option<String>,
}

impl ConfigurationOverrides {
    /// Overrides with neither resource nor language
    pub fn none() -> Self {
        Self::default()
    }

    /// Overrides scoped to a resource
    pub fn resource(resource: impl Into<PathBuf>) -> Self {
        Self {
            resource: Some(resource.into()),
            override_identifier: None,
        }
    }

    /// Overrides scoped to a language
    pub fn language(identifier: impl Into<String>) -> Self {
        Self {
            resource: None,
            override_identifier: Some(identifier.into()),
        }
    }

    /// Add a language to these overrides
    pub fn with_language(mut self, identifier: impl Into<String>) -> Self {
        self.override_identifier = Some(identifier.into());
        self
    }
}

impl From<PathBuf> for ConfigurationOverrides {
    fn from(resource: PathBuf) -> Self {
        Self::resource(resource)
    }
}

impl From<&std::path::Path> for ConfigurationOverrides {
    fn from(resource: &std::path::Path) -> Self {
        Self::resource(resource)
    }
}

/// One source of configuration values, in increasing precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Default,
    UserLocal,
    UserRemote,
    Workspace,
    WorkspaceFolder,
    Memory,
}

/// Returns true when `key` has the `[id]` / `[a][b]` override form
pub fn is_override_key(key: &str) -> bool {
    key.len() > 2 && key.starts_with('[') && key.ends_with(']')
}

/// Split an override key such as `[rust][toml]` into its identifiers
pub fn override_identifiers_from_key(key: &str) -> Vec<String> {
    if !is_override_key(key) {
        return Vec::new();
    }
    key[1..key.len() - 1]
        .split("][")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the override key for a single language
pub fn key_from_override_identifier(identifier: &str) -> String {
    format!("[{}]", identifier)
}
