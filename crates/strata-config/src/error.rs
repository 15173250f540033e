//! Error types for configuration resolution and editing

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Stable codes for rejected configuration writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditingErrorCode {
    /// An application scoped setting was written to workspace or folder settings
    InvalidWorkspaceConfigurationApplication,
    /// A machine scoped setting was written to workspace or folder settings
    InvalidWorkspaceConfigurationMachine,
    /// Workspace or folder target while no workspace is opened
    NoWorkspaceOpened,
    /// Folder target without a resource that belongs to a workspace folder
    InvalidFolderTarget,
    /// The key cannot be written into user settings
    InvalidUserTarget,
    /// An override identifier was given for a key that is not language overridable
    InvalidResourceLanguageConfiguration,
    /// The target file has parse errors and will not be overwritten
    InvalidConfiguration,
    /// Remote user target before the remote environment resolved
    RemoteNotAvailable,
}

impl std::fmt::Display for EditingErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            EditingErrorCode::InvalidWorkspaceConfigurationApplication => {
                "invalid_workspace_configuration_application"
            }
            EditingErrorCode::InvalidWorkspaceConfigurationMachine => {
                "invalid_workspace_configuration_machine"
            }
            EditingErrorCode::NoWorkspaceOpened => "no_workspace_opened",
            EditingErrorCode::InvalidFolderTarget => "invalid_folder_target",
            EditingErrorCode::InvalidUserTarget => "invalid_user_target",
            EditingErrorCode::InvalidResourceLanguageConfiguration => {
                "invalid_resource_language_configuration"
            }
            EditingErrorCode::InvalidConfiguration => "invalid_configuration",
            EditingErrorCode::RemoteNotAvailable => "remote_not_available",
        };
        f.write_str(code)
    }
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A write was rejected before touching disk
    #[error("{message} ({code})")]
    Editing {
        code: EditingErrorCode,
        message: String,
    },

    /// File read/write failed
    #[error("IO error on {path} ({operation}): {source}")]
    Io {
        path: PathBuf,
        operation: IoOperation,
        source: std::io::Error,
    },

    /// A settings document could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The requested target cannot be written
    #[error("Invalid configuration target: {0}")]
    InvalidTarget(String),

    /// A folder was referenced that is not part of the workspace
    #[error("Unknown workspace folder: {0}")]
    UnknownFolder(PathBuf),

    /// Engine options could not be loaded
    #[error("Invalid options: {0}")]
    Options(String),

    /// File watching failed
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// IO operation type for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Read,
    Write,
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoOperation::Read => write!(f, "read"),
            IoOperation::Write => write!(f, "write"),
        }
    }
}

impl ConfigurationError {
    /// Create an editing error with the given code
    pub fn editing(code: EditingErrorCode, message: impl Into<String>) -> Self {
        ConfigurationError::Editing {
            code,
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io(path: PathBuf, operation: IoOperation, source: std::io::Error) -> Self {
        ConfigurationError::Io {
            path,
            operation,
            source,
        }
    }

    /// Create a parse error
    pub fn parse(path: PathBuf, message: impl Into<String>) -> Self {
        ConfigurationError::Parse {
            path,
            message: message.into(),
        }
    }

    /// Create an invalid target error
    pub fn invalid_target(message: impl Into<String>) -> Self {
        ConfigurationError::InvalidTarget(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ConfigurationError::Internal(message.into())
    }

    /// The editing code, if this error is a rejected write
    pub fn code(&self) -> Option<EditingErrorCode> {
        match self {
            ConfigurationError::Editing { code, .. } => Some(*code),
            _ => None,
        }
    }
}
