//! Change events and the channels that carry them
//!
//! Every event kind has its own broadcast channel; a unified stream carries
//! all of them in emission order. Events with an empty payload are never
//! published.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::resolver::ConfigurationDiff;
use crate::trust::RestrictedSettings;
use crate::types::ConfigurationTarget;
use crate::values::keys_related;
use crate::workspace::{WorkbenchState, WorkspaceFolder};

/// Effective values changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChangeEvent {
    affected_keys: Vec<String>,
    changes: BTreeMap<String, BTreeSet<Option<PathBuf>>>,
    folders: Vec<PathBuf>,
    /// Layer whose change caused the event
    pub source: ConfigurationTarget,
}

impl ConfigurationChangeEvent {
    /// Build an event from a diff; `folders` are the folders known to either snapshot
    pub fn new(diff: ConfigurationDiff, folders: Vec<PathBuf>, source: ConfigurationTarget) -> Self {
        let affected_keys = diff.keys();
        Self {
            affected_keys,
            changes: diff.into_changes(),
            folders,
            source,
        }
    }

    /// Changed keys, sorted
    pub fn affected_keys(&self) -> &[String] {
        &self.affected_keys
    }

    pub fn is_empty(&self) -> bool {
        self.affected_keys.is_empty()
    }

    /// Whether the value of `section` (for `resource`, when given) changed
    ///
    /// A section is affected when a changed key equals it, lies below it or
    /// contains it.
    pub fn affects_configuration(&self, section: &str, resource: Option<&Path>) -> bool {
        let scope = resource.map(|resource| {
            self.folders
                .iter()
                .filter(|folder| resource.starts_with(folder))
                .max_by_key(|folder| folder.components().count())
                .cloned()
        });

        self.changes.iter().any(|(key, scopes)| {
            keys_related(key, section)
                && match &scope {
                    None => true,
                    Some(folder) => scopes.contains(folder),
                }
        })
    }
}

/// Folders were added, removed or changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FoldersChangeEvent {
    pub added: Vec<WorkspaceFolder>,
    pub removed: Vec<WorkspaceFolder>,
    pub changed: Vec<WorkspaceFolder>,
}

impl FoldersChangeEvent {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Every event of the workspace service, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEvent {
    WorkbenchStateChanged(WorkbenchState),
    WorkspaceNameChanged,
    WillChangeFolders(FoldersChangeEvent),
    DidChangeFolders(FoldersChangeEvent),
    ConfigurationChanged(ConfigurationChangeEvent),
    RestrictedSettingsChanged(RestrictedSettings),
}

impl WorkspaceEvent {
    fn is_empty(&self) -> bool {
        match self {
            WorkspaceEvent::WillChangeFolders(event) | WorkspaceEvent::DidChangeFolders(event) => {
                event.is_empty()
            }
            WorkspaceEvent::ConfigurationChanged(event) => event.is_empty(),
            _ => false,
        }
    }
}

/// Typed pub/sub channels of the workspace service
#[derive(Clone, Debug)]
pub struct EventBus {
    events: broadcast::Sender<WorkspaceEvent>,
    configuration: broadcast::Sender<ConfigurationChangeEvent>,
    will_change_folders: broadcast::Sender<FoldersChangeEvent>,
    did_change_folders: broadcast::Sender<FoldersChangeEvent>,
    workbench_state: broadcast::Sender<WorkbenchState>,
    workspace_name: broadcast::Sender<()>,
    restricted_settings: broadcast::Sender<RestrictedSettings>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: broadcast::channel(capacity).0,
            configuration: broadcast::channel(capacity).0,
            will_change_folders: broadcast::channel(capacity).0,
            did_change_folders: broadcast::channel(capacity).0,
            workbench_state: broadcast::channel(capacity).0,
            workspace_name: broadcast::channel(capacity).0,
            restricted_settings: broadcast::channel(capacity).0,
        }
    }

    /// Publish an event to its channel and the unified stream
    ///
    /// Returns false when the payload is empty and nothing was sent. Having
    /// no subscribers is not an error.
    pub fn publish(&self, event: WorkspaceEvent) -> bool {
        if event.is_empty() {
            return false;
        }

        match &event {
            WorkspaceEvent::WorkbenchStateChanged(state) => {
                debug!(state = ?state, "Workbench state changed");
                let _ = self.workbench_state.send(*state);
            }
            WorkspaceEvent::WorkspaceNameChanged => {
                let _ = self.workspace_name.send(());
            }
            WorkspaceEvent::WillChangeFolders(change) => {
                let _ = self.will_change_folders.send(change.clone());
            }
            WorkspaceEvent::DidChangeFolders(change) => {
                debug!(
                    added = change.added.len(),
                    removed = change.removed.len(),
                    changed = change.changed.len(),
                    "Workspace folders changed"
                );
                let _ = self.did_change_folders.send(change.clone());
            }
            WorkspaceEvent::ConfigurationChanged(change) => {
                debug!(source = %change.source, keys = ?change.affected_keys(), "Configuration changed");
                let _ = self.configuration.send(change.clone());
            }
            WorkspaceEvent::RestrictedSettingsChanged(restricted) => {
                let _ = self.restricted_settings.send(restricted.clone());
            }
        }
        let _ = self.events.send(event);
        true
    }

    /// Every event, in emission order
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    pub fn on_did_change_configuration(&self) -> broadcast::Receiver<ConfigurationChangeEvent> {
        self.configuration.subscribe()
    }

    pub fn on_will_change_workspace_folders(&self) -> broadcast::Receiver<FoldersChangeEvent> {
        self.will_change_folders.subscribe()
    }

    pub fn on_did_change_workspace_folders(&self) -> broadcast::Receiver<FoldersChangeEvent> {
        self.did_change_folders.subscribe()
    }

    pub fn on_did_change_workbench_state(&self) -> broadcast::Receiver<WorkbenchState> {
        self.workbench_state.subscribe()
    }

    pub fn on_did_change_workspace_name(&self) -> broadcast::Receiver<()> {
        self.workspace_name.subscribe()
    }

    pub fn on_did_change_restricted_settings(&self) -> broadcast::Receiver<RestrictedSettings> {
        self.restricted_settings.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigurationModel;
    use crate::registry::{ConfigurationProperty, ConfigurationRegistry};
    use crate::resolver::{compare, Configuration, LayerSet};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn model(value: Value) -> Arc<ConfigurationModel> {
        match value {
            Value::Object(map) => Arc::new(ConfigurationModel::parse(map, &BTreeSet::new())),
            _ => panic!("expected object"),
        }
    }

    fn change_event() -> ConfigurationChangeEvent {
        let registry = ConfigurationRegistry::new();
        registry.register_properties(vec![
            ConfigurationProperty::new("editor.fontSize", json!(12)),
            ConfigurationProperty::new("editor.wrap", json!("off")),
        ]);
        let registry = registry.snapshot();
        let folder = PathBuf::from("/w/a");
        let mut folders = BTreeMap::new();
        folders.insert(folder.clone(), model(json!({"editor.wrap": "on"})));

        let layers = LayerSet {
            default: Arc::new(ConfigurationModel::from_registry(&registry)),
            folders,
            ..LayerSet::default()
        };
        let before = Configuration::new(registry.clone(), layers.clone(), true, false);
        let after = before.with_layers(LayerSet {
            user_local: model(json!({"editor.fontSize": 14, "editor.wrap": "bounded"})),
            ..layers
        });

        ConfigurationChangeEvent::new(compare(&before, &after), vec![folder], ConfigurationTarget::UserLocal)
    }

    #[test]
    fn test_affects_configuration_by_section_and_resource() {
        let event = change_event();

        assert_eq!(event.affected_keys(), &["editor.fontSize", "editor.wrap"]);
        assert!(event.affects_configuration("editor", None));
        assert!(event.affects_configuration("editor.wrap", None));
        assert!(!event.affects_configuration("files", None));

        let inside = Path::new("/w/a/src/main.rs");
        assert!(event.affects_configuration("editor.fontSize", Some(inside)));
        // the folder value masks the user change
        assert!(!event.affects_configuration("editor.wrap", Some(inside)));
        assert!(event.affects_configuration("editor.wrap", Some(Path::new("/other/file"))));
    }

    #[test]
    fn test_publish_skips_empty_payloads() {
        let bus = EventBus::default();
        let mut all = bus.subscribe();
        let mut folders = bus.on_did_change_workspace_folders();

        assert!(!bus.publish(WorkspaceEvent::DidChangeFolders(FoldersChangeEvent::default())));
        assert!(bus.publish(WorkspaceEvent::WorkspaceNameChanged));

        assert!(folders.try_recv().is_err());
        assert_eq!(all.try_recv().unwrap(), WorkspaceEvent::WorkspaceNameChanged);
        assert!(all.try_recv().is_err());
    }

    #[test]
    fn test_per_kind_and_unified_streams() {
        let bus = EventBus::new(8);
        let mut all = bus.subscribe();
        let mut configuration = bus.on_did_change_configuration();
        let mut state = bus.on_did_change_workbench_state();

        bus.publish(WorkspaceEvent::WorkbenchStateChanged(WorkbenchState::Folder));
        bus.publish(WorkspaceEvent::ConfigurationChanged(change_event()));

        assert_eq!(state.try_recv().unwrap(), WorkbenchState::Folder);
        assert_eq!(configuration.try_recv().unwrap().source, ConfigurationTarget::UserLocal);
        assert!(matches!(
            all.try_recv().unwrap(),
            WorkspaceEvent::WorkbenchStateChanged(WorkbenchState::Folder)
        ));
        assert!(matches!(all.try_recv().unwrap(), WorkspaceEvent::ConfigurationChanged(_)));
    }
}
