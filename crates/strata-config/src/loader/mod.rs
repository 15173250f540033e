//! Loading settings documents into configuration models
//!
//! Documents are JSON with comments and trailing commas allowed. A missing
//! file is an empty document. A malformed file is logged and treated as
//! empty, so one broken layer never stops resolution of the others.

mod fs;
mod sources;

pub use fs::{DiskFileSystem, SettingsFileSystem};
pub use sources::{
    resolve_folder_path, FolderSettings, UserSettings, WorkspaceDocument, WorkspaceFolderEntry,
    WorkspaceSettings, LAUNCH_FILE_NAME, LAUNCH_KEY, TASKS_FILE_NAME, TASKS_KEY,
};

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ConfigurationError, Result};

/// Parse a settings document
///
/// Empty (or whitespace/comment only) text is an empty document; a top
/// level value that is not an object is a parse error.
pub fn parse_document(path: &Path, content: &str) -> Result<Map<String, Value>> {
    let value = jsonc_parser::parse_to_serde_value(content, &Default::default())
        .map_err(|e| ConfigurationError::parse(path.to_path_buf(), e.to_string()))?;

    match value {
        None => Ok(Map::new()),
        Some(Value::Object(document)) => Ok(document),
        Some(_) => Err(ConfigurationError::parse(
            path.to_path_buf(),
            "expected an object at the top level",
        )),
    }
}

/// Read and parse a document, failing on parse errors
///
/// Used before editing a file: a file that does not parse is never
/// overwritten.
pub async fn read_document_strict(
    fs: &dyn SettingsFileSystem,
    path: &Path,
) -> Result<Map<String, Value>> {
    match fs.read_to_string(path).await? {
        Some(content) => parse_document(path, &content),
        None => Ok(Map::new()),
    }
}

/// Read and parse a document, degrading any failure to an empty document
pub async fn read_document(fs: &dyn SettingsFileSystem, path: &Path) -> Map<String, Value> {
    match read_document_strict(fs, path).await {
        Ok(document) => document,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
            Map::new()
        }
    }
}

/// Read a standalone document (tasks/launch) whose value is kept opaque
async fn read_standalone(fs: &dyn SettingsFileSystem, path: &Path) -> Option<Value> {
    match fs.read_to_string(path).await {
        Ok(Some(content)) => match jsonc_parser::parse_to_serde_value(&content, &Default::default()) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed settings file");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("/tmp/settings.json")
    }

    #[test]
    fn test_parse_accepts_comments_and_trailing_commas() {
        let document = parse_document(
            &path(),
            r#"{
                // font
                "editor.fontSize": 12,
                /* wrap */
                "editor.wrap": "on",
            }"#,
        )
        .unwrap();

        assert_eq!(document.get("editor.fontSize"), Some(&json!(12)));
        assert_eq!(document.get("editor.wrap"), Some(&json!("on")));
    }

    #[test]
    fn test_parse_empty_text_is_empty_document() {
        assert!(parse_document(&path(), "").unwrap().is_empty());
        assert!(parse_document(&path(), "  // nothing\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_and_non_objects() {
        let err = parse_document(&path(), "{ \"a\": ").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse { .. }));

        let err = parse_document(&path(), "[1, 2]").unwrap_err();
        assert!(err.to_string().contains("expected an object"));
    }
}
