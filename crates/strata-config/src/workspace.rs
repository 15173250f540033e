//! Workspace identity, folders and folder diffs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::events::FoldersChangeEvent;

/// Kind of the opened workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkbenchState {
    Empty,
    /// A single folder is opened; it is also the workspace
    Folder,
    /// A multi-root workspace file is opened
    Workspace,
}

/// What `initialize` opens
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkspaceIdentifier {
    Empty,
    SingleFolder(PathBuf),
    /// A workspace file listing folders and holding shared settings
    MultiRoot(PathBuf),
}

impl WorkspaceIdentifier {
    pub fn state(&self) -> WorkbenchState {
        match self {
            WorkspaceIdentifier::Empty => WorkbenchState::Empty,
            WorkspaceIdentifier::SingleFolder(_) => WorkbenchState::Folder,
            WorkspaceIdentifier::MultiRoot(_) => WorkbenchState::Workspace,
        }
    }

    /// The workspace file of a multi-root workspace
    pub fn configuration_path(&self) -> Option<&Path> {
        match self {
            WorkspaceIdentifier::MultiRoot(path) => Some(path),
            _ => None,
        }
    }
}

/// One root folder of the workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkspaceFolder {
    pub uri: PathBuf,
    pub name: String,
    pub index: usize,
}

impl WorkspaceFolder {
    /// Folder named `name`, or after the last path segment
    pub fn new(uri: impl Into<PathBuf>, name: Option<String>, index: usize) -> Self {
        let uri = uri.into();
        let name = name.unwrap_or_else(|| {
            uri.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| uri.display().to_string())
        });
        Self { uri, name, index }
    }
}

/// The opened workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    identifier: WorkspaceIdentifier,
    folders: Vec<WorkspaceFolder>,
}

impl Workspace {
    pub fn empty() -> Self {
        Self {
            identifier: WorkspaceIdentifier::Empty,
            folders: Vec::new(),
        }
    }

    pub fn new(identifier: WorkspaceIdentifier, folders: Vec<WorkspaceFolder>) -> Self {
        Self {
            identifier,
            folders,
        }
    }

    pub fn identifier(&self) -> &WorkspaceIdentifier {
        &self.identifier
    }

    pub fn state(&self) -> WorkbenchState {
        self.identifier.state()
    }

    pub fn configuration_path(&self) -> Option<&Path> {
        self.identifier.configuration_path()
    }

    pub fn folders(&self) -> &[WorkspaceFolder] {
        &self.folders
    }

    /// Folder containing `resource`; the deepest one when folders nest
    pub fn get_folder(&self, resource: &Path) -> Option<&WorkspaceFolder> {
        self.folders
            .iter()
            .filter(|folder| resource.starts_with(&folder.uri))
            .max_by_key(|folder| folder.uri.components().count())
    }

    pub fn is_inside(&self, resource: &Path) -> bool {
        self.get_folder(resource).is_some()
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::empty()
    }
}

/// Diff two folder lists by uri
///
/// A folder that stays but moves or is renamed is reported as changed.
pub fn compare_folders(current: &[WorkspaceFolder], next: &[WorkspaceFolder]) -> FoldersChangeEvent {
    let find = |folders: &[WorkspaceFolder], uri: &Path| {
        folders.iter().find(|folder| folder.uri == uri).cloned()
    };

    let added = next
        .iter()
        .filter(|folder| find(current, folder.uri.as_path()).is_none())
        .cloned()
        .collect();
    let removed = current
        .iter()
        .filter(|folder| find(next, folder.uri.as_path()).is_none())
        .cloned()
        .collect();
    let changed = next
        .iter()
        .filter(|folder| {
            find(current, folder.uri.as_path())
                .map(|previous| previous.index != folder.index || previous.name != folder.name)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    FoldersChangeEvent {
        added,
        removed,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(path: &str, index: usize) -> WorkspaceFolder {
        WorkspaceFolder::new(path, None, index)
    }

    #[test]
    fn test_folder_name_defaults_to_basename() {
        assert_eq!(folder("/w/alpha", 0).name, "alpha");
        assert_eq!(
            WorkspaceFolder::new("/w/alpha", Some("A".to_string()), 0).name,
            "A"
        );
    }

    #[test]
    fn test_get_folder_prefers_deepest() {
        let workspace = Workspace::new(
            WorkspaceIdentifier::MultiRoot(PathBuf::from("/w/x.strata-workspace")),
            vec![folder("/w", 0), folder("/w/nested", 1)],
        );
        assert_eq!(
            workspace.get_folder(Path::new("/w/nested/src/lib.rs")).map(|f| f.index),
            Some(1)
        );
        assert_eq!(workspace.get_folder(Path::new("/w/a.rs")).map(|f| f.index), Some(0));
        assert!(!workspace.is_inside(Path::new("/elsewhere")));
        assert_eq!(workspace.state(), WorkbenchState::Workspace);
    }

    #[test]
    fn test_compare_folders() {
        let current = vec![folder("/a", 0), folder("/b", 1), folder("/c", 2)];
        let next = vec![
            folder("/c", 0),
            WorkspaceFolder::new("/b", Some("Bee".to_string()), 1),
            folder("/d", 2),
        ];

        let diff = compare_folders(&current, &next);

        assert_eq!(diff.added, vec![folder("/d", 2)]);
        assert_eq!(diff.removed, vec![folder("/a", 0)]);
        assert_eq!(diff.changed.len(), 2);
        assert!(compare_folders(&next, &next).is_empty());
    }
}
