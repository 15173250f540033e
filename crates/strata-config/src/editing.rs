//! Validating and persisting configuration writes
//!
//! Settings documents store flat dotted keys and `"[lang]"` blocks. The
//! standalone `tasks` and `launch` documents, and their copies at the root
//! of a workspace file, are nested JSON edited by path.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConfigurationError, EditingErrorCode, Result};
use crate::loader::{read_document_strict, SettingsFileSystem, LAUNCH_KEY, TASKS_KEY};
use crate::types::{key_from_override_identifier, ConfigurationScope, ConfigurationTarget};
use crate::values::{add_to_value_tree, remove_from_value_tree, set_flat_value};
use crate::workspace::WorkbenchState;

/// What a write is checked against
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    pub state: WorkbenchState,
    pub scope: ConfigurationScope,
    /// Folder owning the write's resource, if any
    pub folder: Option<&'a Path>,
    /// Whether the remote user settings have been resolved
    pub remote_available: bool,
}

/// Reject writes whose target cannot hold the key
pub fn validate_write(
    key: &str,
    target: ConfigurationTarget,
    override_identifier: Option<&str>,
    context: &WriteContext<'_>,
) -> Result<()> {
    let workspace_target = matches!(
        target,
        ConfigurationTarget::Workspace | ConfigurationTarget::WorkspaceFolder
    );

    if workspace_target {
        match context.scope {
            ConfigurationScope::Application => {
                return Err(ConfigurationError::editing(
                    EditingErrorCode::InvalidWorkspaceConfigurationApplication,
                    format!(
                        "Unable to write {} to {} settings. This setting can be written only into user settings",
                        key,
                        target_label(target)
                    ),
                ))
            }
            ConfigurationScope::Machine => {
                return Err(ConfigurationError::editing(
                    EditingErrorCode::InvalidWorkspaceConfigurationMachine,
                    format!(
                        "Unable to write {} to {} settings. This setting can be written only into user settings",
                        key,
                        target_label(target)
                    ),
                ))
            }
            _ => {}
        }
        if context.state == WorkbenchState::Empty {
            return Err(ConfigurationError::editing(
                EditingErrorCode::NoWorkspaceOpened,
                format!("Unable to write {} because no workspace is opened", key),
            ));
        }
    }

    if target == ConfigurationTarget::WorkspaceFolder && context.folder.is_none() {
        return Err(ConfigurationError::editing(
            EditingErrorCode::InvalidFolderTarget,
            format!(
                "Unable to write {} to folder settings without a resource inside a workspace folder",
                key
            ),
        ));
    }

    let user_target = matches!(
        target,
        ConfigurationTarget::User | ConfigurationTarget::UserLocal | ConfigurationTarget::UserRemote
    );
    if user_target && standalone_key(key) == Some(LAUNCH_KEY) {
        return Err(ConfigurationError::editing(
            EditingErrorCode::InvalidUserTarget,
            format!("Unable to write {} to user settings", key),
        ));
    }

    if override_identifier.is_some() && context.scope != ConfigurationScope::LanguageOverridable {
        return Err(ConfigurationError::editing(
            EditingErrorCode::InvalidResourceLanguageConfiguration,
            format!("Unable to write {} because it is not a language overridable setting", key),
        ));
    }

    if target == ConfigurationTarget::UserRemote && !context.remote_available {
        return Err(ConfigurationError::editing(
            EditingErrorCode::RemoteNotAvailable,
            format!("Unable to write {} because the remote environment is not available", key),
        ));
    }

    Ok(())
}

fn target_label(target: ConfigurationTarget) -> &'static str {
    match target {
        ConfigurationTarget::WorkspaceFolder => "Folder",
        _ => "Workspace",
    }
}

/// `tasks` or `launch` when `key` is one of them or lies below one
pub fn standalone_key(key: &str) -> Option<&'static str> {
    [TASKS_KEY, LAUNCH_KEY].into_iter().find(|standalone| {
        key == *standalone
            || key
                .strip_prefix(standalone)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
    })
}

/// Where in which file a write lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteLocation {
    /// A settings document of flat keys, optionally under a section of it
    /// (`settings` of a workspace file)
    Settings {
        path: PathBuf,
        section: Option<&'static str>,
    },
    /// A nested document; `strip` drops the leading standalone key from the
    /// written path (a `tasks.json` holds the value of `tasks` itself)
    Nested { path: PathBuf, strip: Option<&'static str> },
}

impl WriteLocation {
    pub fn path(&self) -> &Path {
        match self {
            WriteLocation::Settings { path, .. } | WriteLocation::Nested { path, .. } => path,
        }
    }
}

/// Read a document that is about to be rewritten
///
/// A file with parse errors is never overwritten.
pub async fn read_for_edit(fs: &dyn SettingsFileSystem, path: &Path) -> Result<Map<String, Value>> {
    read_document_strict(fs, path).await.map_err(|e| match e {
        ConfigurationError::Parse { message, .. } => ConfigurationError::editing(
            EditingErrorCode::InvalidConfiguration,
            format!(
                "Unable to write into {}. Please fix the errors in the file first: {}",
                path.display(),
                message
            ),
        ),
        other => other,
    })
}

/// Serialize `document` and write it to `path`
pub async fn write_document(fs: &dyn SettingsFileSystem, path: &Path, document: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| ConfigurationError::internal(format!("Failed to serialize settings: {}", e)))?;
    fs.write(path, &format!("{}\n", content)).await
}

/// Apply a write to the file at `location`
pub async fn write_value(
    fs: &dyn SettingsFileSystem,
    location: &WriteLocation,
    key: &str,
    value: Option<Value>,
    override_identifier: Option<&str>,
) -> Result<()> {
    let path = location.path();
    let mut document = read_for_edit(fs, path).await?;

    let written = match location {
        WriteLocation::Settings { section, .. } => {
            match section {
                Some(section) => {
                    let mut settings = match document.remove(*section) {
                        Some(Value::Object(settings)) => settings,
                        _ => Map::new(),
                    };
                    edit_settings(&mut settings, key, value, override_identifier);
                    document.insert(section.to_string(), Value::Object(settings));
                }
                None => edit_settings(&mut document, key, value, override_identifier),
            }
            Value::Object(document)
        }
        WriteLocation::Nested { strip, .. } => {
            let relative = match strip {
                Some(prefix) => key
                    .strip_prefix(*prefix)
                    .map(|rest| rest.trim_start_matches('.'))
                    .unwrap_or(key),
                None => key,
            };
            if relative.is_empty() {
                value.unwrap_or_else(|| Value::Object(Map::new()))
            } else {
                match value {
                    Some(value) => {
                        add_to_value_tree(&mut document, relative, value);
                    }
                    None => {
                        remove_from_value_tree(&mut document, relative);
                    }
                }
                Value::Object(document)
            }
        }
    };

    write_document(fs, path, &written).await?;
    debug!(path = %path.display(), key = %key, "Wrote configuration value");
    Ok(())
}

fn edit_settings(
    document: &mut Map<String, Value>,
    key: &str,
    value: Option<Value>,
    override_identifier: Option<&str>,
) {
    let identifier = match override_identifier {
        Some(identifier) => identifier,
        None => return set_flat_value(document, key, value),
    };

    let block_key = key_from_override_identifier(identifier);
    let mut block = match document.remove(&block_key) {
        Some(Value::Object(block)) => block,
        _ => Map::new(),
    };
    set_flat_value(&mut block, key, value);
    if !block.is_empty() {
        document.insert(block_key, Value::Object(block));
    }
}
