//! The workspace configuration service
//!
//! [`WorkspaceService`] owns the current layer set and is the only place
//! that replaces it. Reads take the current immutable snapshot. Writes,
//! reloads, folder edits and initialization run one at a time, in call
//! order, and publish their events before they return. Re-initializing the
//! workspace supersedes any operation still in flight; its result is
//! discarded.
//!
//! Registry changes are applied by a background task as soon as they are
//! broadcast. Every call also catches up with the registry before it reads,
//! so a snapshot never lags behind a registration made before the call.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::editing::{
    read_for_edit, standalone_key, validate_write, write_document, write_value, WriteContext,
    WriteLocation,
};
use crate::error::{ConfigurationError, EditingErrorCode, Result};
use crate::events::{ConfigurationChangeEvent, EventBus, WorkspaceEvent};
use crate::loader::{
    resolve_folder_path, DiskFileSystem, FolderSettings, SettingsFileSystem, UserSettings,
    WorkspaceFolderEntry, WorkspaceSettings, TASKS_KEY,
};
use crate::model::ConfigurationModel;
use crate::options::ServiceOptions;
use crate::registry::{ConfigurationRegistry, RegistrationReport, SchemaDelta};
use crate::resolver::{
    compare, compare_keys, Configuration, ConfigurationDiff, ConfigurationKeys, InspectValue,
    LayerSet,
};
use crate::trust::{RestrictedSettings, TrustGate};
use crate::types::{ConfigurationOverrides, ConfigurationScope, ConfigurationTarget};
use crate::values::{keys_related, merge_values};
use crate::watcher::SettingsWatcher;
use crate::workspace::{
    compare_folders, WorkbenchState, Workspace, WorkspaceFolder, WorkspaceIdentifier,
};

/// Layer addressed by `reload_configuration`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadTarget {
    /// Local and remote user settings
    User,
    UserLocal,
    UserRemote,
    /// The workspace file, or the folder of a single-folder workspace
    Workspace,
    WorkspaceFolder(PathBuf),
}

#[derive(Debug, Clone)]
struct ServiceState {
    workspace: Workspace,
    configuration: Arc<Configuration>,
    trust: TrustGate,
    remote_settings: Option<PathBuf>,
    initialized: bool,
}

/// A freshly loaded layer, applied to whatever state is current at commit time
enum LayerUpdate {
    UserLocal(Arc<ConfigurationModel>),
    UserRemote(Arc<ConfigurationModel>),
    Folder(PathBuf, Arc<ConfigurationModel>),
    Workspace(LoadedWorkspace),
    Memory(Arc<ConfigurationModel>),
}

struct LoadedWorkspace {
    workspace: Workspace,
    model: Option<Arc<ConfigurationModel>>,
    folders: BTreeMap<PathBuf, Arc<ConfigurationModel>>,
}

/// Layered configuration of one workspace
pub struct WorkspaceService {
    registry: Arc<ConfigurationRegistry>,
    fs: Arc<dyn SettingsFileSystem>,
    options: ServiceOptions,
    state: RwLock<Arc<ServiceState>>,
    operations: Mutex<()>,
    epoch: AtomicU64,
    events: EventBus,
}

impl WorkspaceService {
    /// Create a service reading settings from disk
    ///
    /// Inside a tokio runtime the service follows registry changes on its
    /// own; see [`WorkspaceService::spawn_registry_listener`].
    pub fn new(registry: Arc<ConfigurationRegistry>, options: ServiceOptions) -> Arc<Self> {
        Self::with_file_system(registry, options, Arc::new(DiskFileSystem::new()))
    }

    pub fn with_file_system(
        registry: Arc<ConfigurationRegistry>,
        options: ServiceOptions,
        fs: Arc<dyn SettingsFileSystem>,
    ) -> Arc<Self> {
        let snapshot = registry.snapshot();
        let layers = LayerSet {
            default: Arc::new(ConfigurationModel::from_registry(&snapshot)),
            ..LayerSet::default()
        };
        let configuration = Configuration::new(
            snapshot,
            layers,
            true,
            options.remote_authority.is_some(),
        );
        let mut trust = TrustGate::default();
        trust.refresh(&configuration);

        let state = ServiceState {
            workspace: Workspace::empty(),
            configuration: Arc::new(configuration),
            trust,
            remote_settings: None,
            initialized: false,
        };

        let service = Arc::new(Self {
            registry,
            fs,
            events: EventBus::new(options.event_capacity),
            options,
            state: RwLock::new(Arc::new(state)),
            operations: Mutex::new(()),
            epoch: AtomicU64::new(0),
        });
        match Handle::try_current() {
            Ok(runtime) => {
                service.spawn_registry_listener_on(&runtime);
            }
            Err(_) => debug!("No tokio runtime, registry changes apply on the next call"),
        }
        service
    }

    /// Create a shared service, watching layer files when the options ask for it
    ///
    /// Must be called inside a tokio runtime when `watch_files` is set.
    pub fn shared(registry: Arc<ConfigurationRegistry>, options: ServiceOptions) -> Result<Arc<Self>> {
        let watch = options.watch_files;
        let service = Self::new(registry, options);
        if watch {
            service.spawn_watcher()?;
        }
        Ok(service)
    }

    pub fn registry(&self) -> &Arc<ConfigurationRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Every event, in emission order
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    /// The current immutable configuration snapshot
    pub fn configuration(&self) -> Arc<Configuration> {
        self.sync_registry();
        Arc::clone(&self.current().configuration)
    }

    pub fn get_value(&self, key: &str, overrides: &ConfigurationOverrides) -> Option<Value> {
        self.configuration().get_value(key, overrides)
    }

    /// Effective value of `key` deserialized as `T`
    pub fn get<T: DeserializeOwned>(&self, key: &str, overrides: &ConfigurationOverrides) -> Option<T> {
        let value = self.get_value(key, overrides)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Configuration value has an unexpected type");
                None
            }
        }
    }

    pub fn inspect(&self, key: &str, overrides: &ConfigurationOverrides) -> InspectValue {
        self.configuration().inspect(key, overrides)
    }

    pub fn keys(&self) -> ConfigurationKeys {
        self.configuration().keys()
    }

    pub fn get_workbench_state(&self) -> WorkbenchState {
        self.current().workspace.state()
    }

    pub fn get_workspace(&self) -> Workspace {
        self.current().workspace.clone()
    }

    pub fn get_workspace_folder(&self, resource: &Path) -> Option<WorkspaceFolder> {
        self.current().workspace.get_folder(resource).cloned()
    }

    pub fn is_inside_workspace(&self, resource: &Path) -> bool {
        self.current().workspace.is_inside(resource)
    }

    pub fn is_workspace_trusted(&self) -> bool {
        self.current().trust.is_trusted()
    }

    /// Restricted keys present in each layer, whatever the trust state
    pub fn restricted_settings(&self) -> RestrictedSettings {
        self.sync_registry();
        self.current().trust.restricted_settings().clone()
    }

    /// Apply a schema contribution and recompute the keys it touches
    pub fn apply_schema_delta(&self, delta: SchemaDelta) -> RegistrationReport {
        let report = self.registry.apply_delta(delta);
        self.sync_registry();
        report
    }

    /// Open a workspace
    ///
    /// The first initialization only loads; later ones emit the workbench
    /// state, name, folder and configuration changes they cause, in that
    /// order.
    pub async fn initialize(&self, identifier: WorkspaceIdentifier) -> Result<()> {
        // supersede whatever is in flight, then queue behind it
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _operation = self.operations.lock().await;
        self.sync_registry();

        let current = self.current();
        let excluded = current.configuration.registry().retracted().clone();
        let loaded = self.load_workspace(&identifier, &excluded).await;
        let user_local = self.load_user_local(&excluded).await;
        let user_remote = match &current.remote_settings {
            Some(path) => Some(self.load_user_settings(path, &excluded).await),
            None => None,
        };

        let mut updates = vec![LayerUpdate::UserLocal(user_local), LayerUpdate::Workspace(loaded)];
        if let Some(remote) = user_remote {
            updates.push(LayerUpdate::UserRemote(remote));
        }

        let transition = self.commit(epoch, |state| {
            let mut next = apply_updates(state, updates);
            next.initialized = true;
            next
        });
        if let Some((previous, next)) = transition {
            info!(
                state = ?next.workspace.state(),
                folders = next.workspace.folders().len(),
                "Workspace initialized"
            );
            if previous.initialized {
                self.emit_transition(&previous, &next, ConfigurationTarget::Workspace);
            }
        }
        Ok(())
    }

    /// Write `value` for `key`, or remove the key when `value` is `None`
    ///
    /// Without a target, the most specific layer the key may be written to
    /// is chosen, and a value equal to what that layer would inherit is
    /// removed from it instead of stored. Removing without a target clears
    /// the key from every layer that defines it.
    pub async fn update_value(
        &self,
        key: &str,
        value: Option<Value>,
        overrides: &ConfigurationOverrides,
        target: Option<ConfigurationTarget>,
    ) -> Result<()> {
        let _operation = self.operations.lock().await;
        self.sync_registry();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let state = self.current();

        let scope = state.configuration.scope_of(key);
        let folder = overrides
            .resource
            .as_deref()
            .and_then(|resource| state.workspace.get_folder(resource))
            .map(|folder| folder.uri.clone());
        let language = overrides.override_identifier.as_deref();

        let (target, explicit) = match target {
            Some(target) => (split_user_target(target, scope, &state), true),
            None if value.is_none() => {
                return self
                    .remove_everywhere(&state, epoch, key, folder.as_deref(), language)
                    .await
            }
            None => (derive_target(scope, folder.is_some(), &state), false),
        };

        let context = WriteContext {
            state: state.workspace.state(),
            scope,
            folder: folder.as_deref(),
            remote_available: state.remote_settings.is_some(),
        };
        validate_write(key, target, language, &context)?;

        let mut value = value;
        if !explicit && value.is_some() && inherited_value(&state.configuration, key, overrides, target) == value {
            debug!(key = %key, target = %target, "Value equals the inherited value, removing it");
            value = None;
        }

        let update = self
            .write_to_target(&state, target, folder.as_deref(), key, value, language)
            .await?;
        if let Some((previous, next)) = self.commit(epoch, |current| apply_updates(current, vec![update])) {
            self.emit_transition(&previous, &next, target);
        }
        Ok(())
    }

    /// Re-read layers from disk and publish what changed
    ///
    /// Without a target every layer is re-read, including the folder list of
    /// a workspace file.
    pub async fn reload_configuration(&self, target: Option<ReloadTarget>) -> Result<()> {
        let _operation = self.operations.lock().await;
        self.reload_locked(target).await
    }

    /// Reload the layer owning `path`; returns false when no layer reads it
    pub async fn handle_file_change(&self, path: &Path) -> Result<bool> {
        let state = self.current();
        let user = UserSettings::new(&self.options.user_settings_path);

        let target = if user.resources().iter().any(|resource| resource == path) {
            ReloadTarget::UserLocal
        } else if state
            .remote_settings
            .as_ref()
            .map(|remote| UserSettings::new(remote).resources().iter().any(|resource| resource == path))
            .unwrap_or(false)
        {
            ReloadTarget::UserRemote
        } else if state.workspace.configuration_path() == Some(path) {
            ReloadTarget::Workspace
        } else {
            match state.workspace.folders().iter().find(|folder| {
                self.folder_settings(&folder.uri)
                    .resources()
                    .iter()
                    .any(|resource| resource == path)
            }) {
                Some(folder) => ReloadTarget::WorkspaceFolder(folder.uri.clone()),
                None => return Ok(false),
            }
        };

        debug!(path = %path.display(), target = ?target, "Settings file changed");
        self.reload_configuration(Some(target)).await?;
        Ok(true)
    }

    /// Attach the remote user settings once the remote environment resolved
    pub async fn resolve_remote_environment(&self, settings_path: impl Into<PathBuf>) -> Result<()> {
        let settings_path = settings_path.into();
        let _operation = self.operations.lock().await;
        self.sync_registry();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let excluded = self.current().configuration.registry().retracted().clone();

        let model = self.load_user_settings(&settings_path, &excluded).await;
        let transition = self.commit(epoch, |state| {
            let mut next = apply_updates(state, vec![LayerUpdate::UserRemote(model)]);
            next.remote_settings = Some(settings_path.clone());
            next
        });
        if let Some((previous, next)) = transition {
            info!(path = %settings_path.display(), "Remote user settings resolved");
            self.emit_transition(&previous, &next, ConfigurationTarget::UserRemote);
        }
        Ok(())
    }

    /// Change workspace trust
    ///
    /// Publishes one configuration change listing exactly the restricted
    /// keys whose effective value changed.
    pub fn update_workspace_trust(&self, trusted: bool) {
        self.sync_registry();
        let (previous, next) = {
            let mut guard = self.state.write();
            if guard.trust.is_trusted() == trusted {
                return;
            }
            let previous = Arc::clone(&guard);
            let mut trust = previous.trust.clone();
            trust.set_trusted(trusted);
            let next = Arc::new(ServiceState {
                configuration: Arc::new(previous.configuration.with_trust(trusted)),
                trust,
                ..ServiceState::clone(&previous)
            });
            *guard = Arc::clone(&next);
            (previous, next)
        };

        info!(trusted, "Workspace trust changed");
        let restricted = previous.configuration.registry().restricted_keys();
        let diff = compare_keys(
            &previous.configuration,
            &next.configuration,
            restricted.iter().map(String::as_str),
        );
        self.publish_configuration(diff, &previous, &next, ConfigurationTarget::Workspace);
    }

    /// Add folders to a multi-root workspace
    ///
    /// Folders already in the workspace are skipped. `index` positions the
    /// new folders; an out-of-range index appends.
    pub async fn add_folders(&self, folders: Vec<WorkspaceFolderEntry>, index: Option<usize>) -> Result<()> {
        self.update_folders(folders, Vec::new(), index).await
    }

    pub async fn remove_folders(&self, folders: Vec<PathBuf>) -> Result<()> {
        self.update_folders(Vec::new(), folders, None).await
    }

    /// Rewrite the folder list of the workspace file, then reload it
    pub async fn update_folders(
        &self,
        add: Vec<WorkspaceFolderEntry>,
        remove: Vec<PathBuf>,
        index: Option<usize>,
    ) -> Result<()> {
        let _operation = self.operations.lock().await;
        self.sync_registry();
        let state = self.current();

        let config_path = match state.workspace.identifier() {
            WorkspaceIdentifier::MultiRoot(path) => path.clone(),
            _ => {
                return Err(ConfigurationError::invalid_target(
                    "Folders can only be edited in a multi-root workspace",
                ))
            }
        };
        let base = config_path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();

        let mut document = read_for_edit(self.fs.as_ref(), &config_path).await?;
        let mut entries = match document.remove("folders") {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        let entry_path = |entry: &Value| {
            entry
                .get("path")
                .and_then(Value::as_str)
                .map(|path| resolve_folder_path(&base, path))
        };

        let before = entries.len();
        let remove: BTreeSet<PathBuf> = remove
            .iter()
            .map(|path| resolve_folder_path(&base, &path.to_string_lossy()))
            .collect();
        entries.retain(|entry| entry_path(entry).map(|path| !remove.contains(&path)).unwrap_or(true));
        let mut changed = entries.len() != before;

        let mut position = index.filter(|index| *index <= entries.len()).unwrap_or(entries.len());
        for folder in add {
            let path = resolve_folder_path(&base, &folder.path.to_string_lossy());
            if entries.iter().any(|entry| entry_path(entry).as_ref() == Some(&path)) {
                continue;
            }
            let relative = path.strip_prefix(&base).unwrap_or(&path);
            let mut entry = Map::new();
            entry.insert(
                "path".to_string(),
                Value::String(relative.to_string_lossy().into_owned()),
            );
            if let Some(name) = folder.name {
                entry.insert("name".to_string(), Value::String(name));
            }
            entries.insert(position, Value::Object(entry));
            position += 1;
            changed = true;
        }

        if !changed {
            return Ok(());
        }
        document.insert("folders".to_string(), Value::Array(entries));
        write_document(self.fs.as_ref(), &config_path, &Value::Object(document)).await?;

        self.reload_locked(Some(ReloadTarget::Workspace)).await
    }

    /// Files read by the current layers
    pub fn watched_resources(&self) -> Vec<PathBuf> {
        let state = self.current();
        let mut resources = UserSettings::new(&self.options.user_settings_path).resources();
        if let Some(remote) = &state.remote_settings {
            resources.extend(UserSettings::new(remote).resources());
        }
        if let Some(path) = state.workspace.configuration_path() {
            resources.push(path.to_path_buf());
        }
        for folder in state.workspace.folders() {
            resources.extend(self.folder_settings(&folder.uri).resources());
        }
        resources
    }

    /// Apply every broadcast registry change and publish what it changed
    ///
    /// Started by the constructors when they run inside a tokio runtime. The
    /// task ends once the service is dropped and another change arrives.
    pub fn spawn_registry_listener(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_registry_listener_on(&Handle::current())
    }

    fn spawn_registry_listener_on(self: &Arc<Self>, runtime: &Handle) -> JoinHandle<()> {
        let mut changes = self.registry.subscribe();
        let weak = Arc::downgrade(self);

        runtime.spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let service = match weak.upgrade() {
                    Some(service) => service,
                    None => break,
                };
                service.sync_registry();
            }
        })
    }

    /// Watch layer files and reload them when they change
    ///
    /// The task ends once the service is dropped and another change arrives.
    pub fn spawn_watcher(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let (mut watcher, mut changes) = SettingsWatcher::new()?;
        watcher.sync(&self.watched_resources())?;
        let weak = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            while let Some(path) = changes.recv().await {
                let service = match weak.upgrade() {
                    Some(service) => service,
                    None => break,
                };
                if let Err(e) = service.handle_file_change(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to reload changed settings");
                }
                if let Err(e) = watcher.sync(&service.watched_resources()) {
                    warn!(error = %e, "Failed to update watched settings files");
                }
            }
        }))
    }

    fn current(&self) -> Arc<ServiceState> {
        Arc::clone(&self.state.read())
    }

    /// Swap in the state built by `apply` from the current one, unless a
    /// newer initialization superseded the operation started at `epoch`
    fn commit(
        &self,
        epoch: u64,
        apply: impl FnOnce(&ServiceState) -> ServiceState,
    ) -> Option<(Arc<ServiceState>, Arc<ServiceState>)> {
        let mut guard = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(epoch, "Discarding configuration superseded by a newer initialization");
            return None;
        }
        let previous = Arc::clone(&guard);
        let next = Arc::new(apply(&previous));
        *guard = Arc::clone(&next);
        Some((previous, next))
    }

    /// Catch up with registry changes made since the last call
    fn sync_registry(&self) {
        let registry = self.registry.snapshot();
        if self.state.read().configuration.registry().version() == registry.version() {
            return;
        }
        let (previous, next, affected) = {
            let mut guard = self.state.write();
            let previous = Arc::clone(&guard);
            let old_registry = previous.configuration.registry();
            if old_registry.version() == registry.version() {
                return;
            }

            let affected = registry.changed_keys(old_registry);
            let mut layers = previous.configuration.layers().clone();
            layers.default = Arc::new(ConfigurationModel::from_registry(&registry));
            if registry.retracted() != old_registry.retracted() {
                let excluded = registry.retracted();
                let reparse = |model: &Arc<ConfigurationModel>| Arc::new(model.reparse(excluded));
                layers.user_local = reparse(&layers.user_local);
                layers.user_remote = layers.user_remote.as_ref().map(reparse);
                layers.workspace = layers.workspace.as_ref().map(reparse);
                layers.memory = reparse(&layers.memory);
                for model in layers.folders.values_mut() {
                    *model = reparse(&*model);
                }
            }

            let configuration =
                previous
                    .configuration
                    .with_registry(Arc::clone(&registry), layers, &affected);
            let mut trust = previous.trust.clone();
            trust.refresh(&configuration);
            let next = Arc::new(ServiceState {
                configuration: Arc::new(configuration),
                trust,
                ..ServiceState::clone(&previous)
            });
            *guard = Arc::clone(&next);
            (previous, next, affected)
        };

        let mut candidates: BTreeSet<String> = affected.iter().cloned().collect();
        for keys in [previous.configuration.keys(), next.configuration.keys()] {
            let layer_keys = keys
                .user
                .into_iter()
                .chain(keys.workspace)
                .chain(keys.workspace_folder)
                .chain(keys.memory);
            candidates.extend(
                layer_keys.filter(|key| affected.iter().any(|changed| keys_related(changed, key))),
            );
        }
        debug!(version = registry.version(), keys = ?affected, "Applying registry changes");

        let diff = compare_keys(
            &previous.configuration,
            &next.configuration,
            candidates.iter().map(String::as_str),
        );
        self.publish_configuration(diff, &previous, &next, ConfigurationTarget::Default);
        self.publish_restricted(&previous, &next);
    }

    async fn reload_locked(&self, target: Option<ReloadTarget>) -> Result<()> {
        self.sync_registry();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let state = self.current();
        let excluded = state.configuration.registry().retracted().clone();

        let mut updates = Vec::new();
        let source = match &target {
            None => ConfigurationTarget::Workspace,
            Some(ReloadTarget::User) => ConfigurationTarget::User,
            Some(ReloadTarget::UserLocal) => ConfigurationTarget::UserLocal,
            Some(ReloadTarget::UserRemote) => ConfigurationTarget::UserRemote,
            Some(ReloadTarget::Workspace) => ConfigurationTarget::Workspace,
            Some(ReloadTarget::WorkspaceFolder(_)) => ConfigurationTarget::WorkspaceFolder,
        };

        let reload_local = matches!(
            target,
            None | Some(ReloadTarget::User) | Some(ReloadTarget::UserLocal)
        );
        let reload_remote = matches!(
            target,
            None | Some(ReloadTarget::User) | Some(ReloadTarget::UserRemote)
        );
        if reload_local {
            updates.push(LayerUpdate::UserLocal(self.load_user_local(&excluded).await));
        }
        if reload_remote {
            if let Some(path) = &state.remote_settings {
                updates.push(LayerUpdate::UserRemote(
                    self.load_user_settings(path, &excluded).await,
                ));
            }
        }

        match &target {
            None => {
                let loaded = self.load_workspace(state.workspace.identifier(), &excluded).await;
                updates.push(LayerUpdate::Workspace(loaded));
            }
            Some(ReloadTarget::Workspace) => match state.workspace.identifier() {
                WorkspaceIdentifier::Empty => {}
                WorkspaceIdentifier::SingleFolder(folder) => {
                    let model = self.load_folder(folder, &excluded).await;
                    updates.push(LayerUpdate::Folder(folder.clone(), model));
                }
                WorkspaceIdentifier::MultiRoot(_) => {
                    let loaded = self
                        .load_workspace(state.workspace.identifier(), &excluded)
                        .await;
                    updates.push(LayerUpdate::Workspace(loaded));
                }
            },
            Some(ReloadTarget::WorkspaceFolder(uri)) => {
                let folder = state
                    .workspace
                    .folders()
                    .iter()
                    .find(|folder| &folder.uri == uri)
                    .ok_or_else(|| ConfigurationError::UnknownFolder(uri.clone()))?;
                let model = self.load_folder(&folder.uri, &excluded).await;
                updates.push(LayerUpdate::Folder(folder.uri.clone(), model));
            }
            _ => {}
        }

        if let Some((previous, next)) = self.commit(epoch, |current| apply_updates(current, updates)) {
            self.emit_transition(&previous, &next, source);
        }
        Ok(())
    }

    async fn remove_everywhere(
        &self,
        state: &ServiceState,
        epoch: u64,
        key: &str,
        folder: Option<&Path>,
        language: Option<&str>,
    ) -> Result<()> {
        let layers = state.configuration.layers();
        let defines = |model: &ConfigurationModel| match language {
            Some(language) => model.get_override_value(language, key).is_some(),
            None => model.has(key),
        };

        let mut targets = Vec::new();
        if defines(&layers.memory) {
            targets.push(ConfigurationTarget::Memory);
        }
        if state.workspace.state() == WorkbenchState::Workspace {
            if let Some(model) = folder.and_then(|folder| layers.folders.get(folder)) {
                if defines(model) {
                    targets.push(ConfigurationTarget::WorkspaceFolder);
                }
            }
        }
        if layers.workspace.as_deref().map(defines).unwrap_or(false) {
            targets.push(ConfigurationTarget::Workspace);
        }
        if layers.user_remote.as_deref().map(defines).unwrap_or(false) {
            targets.push(ConfigurationTarget::UserRemote);
        }
        if defines(&layers.user_local) {
            targets.push(ConfigurationTarget::UserLocal);
        }

        let source = match targets.first() {
            Some(target) => *target,
            None => return Ok(()),
        };
        let mut updates = Vec::new();
        for target in targets {
            updates.push(
                self.write_to_target(state, target, folder, key, None, language)
                    .await?,
            );
        }

        if let Some((previous, next)) = self.commit(epoch, |current| apply_updates(current, updates)) {
            self.emit_transition(&previous, &next, source);
        }
        Ok(())
    }

    /// Persist one write and re-read the layer it landed in
    async fn write_to_target(
        &self,
        state: &ServiceState,
        target: ConfigurationTarget,
        folder: Option<&Path>,
        key: &str,
        value: Option<Value>,
        language: Option<&str>,
    ) -> Result<LayerUpdate> {
        let excluded = state.configuration.registry().retracted();
        let fs = self.fs.as_ref();

        match target {
            ConfigurationTarget::Memory => {
                let memory = &state.configuration.layers().memory;
                Ok(LayerUpdate::Memory(Arc::new(
                    memory.with_value(key, value, language, excluded),
                )))
            }
            ConfigurationTarget::Default => Err(ConfigurationError::invalid_target(
                "Default settings cannot be written",
            )),
            ConfigurationTarget::User | ConfigurationTarget::UserLocal => {
                let path = &self.options.user_settings_path;
                write_value(fs, &user_location(path, key), key, value, language).await?;
                Ok(LayerUpdate::UserLocal(self.load_user_settings(path, excluded).await))
            }
            ConfigurationTarget::UserRemote => {
                let path = state.remote_settings.as_ref().ok_or_else(|| {
                    ConfigurationError::editing(
                        EditingErrorCode::RemoteNotAvailable,
                        "The remote environment is not available",
                    )
                })?;
                write_value(fs, &user_location(path, key), key, value, language).await?;
                Ok(LayerUpdate::UserRemote(self.load_user_settings(path, excluded).await))
            }
            ConfigurationTarget::Workspace => match state.workspace.identifier() {
                WorkspaceIdentifier::SingleFolder(folder) => {
                    self.write_to_folder(folder, key, value, language, excluded).await
                }
                WorkspaceIdentifier::MultiRoot(path) => {
                    let location = match standalone_key(key) {
                        Some(_) => WriteLocation::Nested {
                            path: path.clone(),
                            strip: None,
                        },
                        None => WriteLocation::Settings {
                            path: path.clone(),
                            section: Some("settings"),
                        },
                    };
                    write_value(fs, &location, key, value, language).await?;
                    Ok(LayerUpdate::Workspace(
                        self.load_workspace(state.workspace.identifier(), excluded)
                            .await,
                    ))
                }
                WorkspaceIdentifier::Empty => Err(ConfigurationError::editing(
                    EditingErrorCode::NoWorkspaceOpened,
                    format!("Unable to write {} because no workspace is opened", key),
                )),
            },
            ConfigurationTarget::WorkspaceFolder => {
                let folder = folder.ok_or_else(|| {
                    ConfigurationError::editing(
                        EditingErrorCode::InvalidFolderTarget,
                        format!("Unable to write {} without a workspace folder", key),
                    )
                })?;
                self.write_to_folder(folder, key, value, language, excluded).await
            }
        }
    }

    async fn write_to_folder(
        &self,
        folder: &Path,
        key: &str,
        value: Option<Value>,
        language: Option<&str>,
        excluded: &BTreeSet<String>,
    ) -> Result<LayerUpdate> {
        let settings = self.folder_settings(folder);
        let location = match standalone_key(key).and_then(|standalone| {
            settings
                .standalone_path(standalone)
                .map(|path| (standalone, path))
        }) {
            Some((standalone, path)) => WriteLocation::Nested {
                path,
                strip: Some(standalone),
            },
            None => WriteLocation::Settings {
                path: settings.settings_path(),
                section: None,
            },
        };
        write_value(self.fs.as_ref(), &location, key, value, language).await?;
        Ok(LayerUpdate::Folder(
            folder.to_path_buf(),
            self.load_folder(folder, excluded).await,
        ))
    }

    fn folder_settings(&self, folder: &Path) -> FolderSettings {
        FolderSettings::new(
            self.options.folder_config_path(folder),
            &self.options.settings_file_name,
        )
    }

    async fn load_user_local(&self, excluded: &BTreeSet<String>) -> Arc<ConfigurationModel> {
        self.load_user_settings(&self.options.user_settings_path, excluded)
            .await
    }

    async fn load_user_settings(&self, path: &Path, excluded: &BTreeSet<String>) -> Arc<ConfigurationModel> {
        Arc::new(UserSettings::new(path).load(self.fs.as_ref(), excluded).await)
    }

    async fn load_folder(&self, folder: &Path, excluded: &BTreeSet<String>) -> Arc<ConfigurationModel> {
        Arc::new(
            self.folder_settings(folder)
                .load(self.fs.as_ref(), excluded)
                .await,
        )
    }

    async fn load_workspace(
        &self,
        identifier: &WorkspaceIdentifier,
        excluded: &BTreeSet<String>,
    ) -> LoadedWorkspace {
        match identifier {
            WorkspaceIdentifier::Empty => LoadedWorkspace {
                workspace: Workspace::empty(),
                model: None,
                folders: BTreeMap::new(),
            },
            WorkspaceIdentifier::SingleFolder(path) => {
                let model = self.load_folder(path, excluded).await;
                let mut folders = BTreeMap::new();
                folders.insert(path.clone(), Arc::clone(&model));
                LoadedWorkspace {
                    workspace: Workspace::new(
                        identifier.clone(),
                        vec![WorkspaceFolder::new(path.clone(), None, 0)],
                    ),
                    model: Some(model),
                    folders,
                }
            }
            WorkspaceIdentifier::MultiRoot(path) => {
                let document = WorkspaceSettings::new(path)
                    .load(self.fs.as_ref(), excluded)
                    .await;

                let mut workspace_folders = Vec::new();
                let mut folders = BTreeMap::new();
                for entry in document.folders {
                    if folders.contains_key(&entry.path) {
                        continue;
                    }
                    if self.fs.exists(&entry.path).await && !self.fs.is_dir(&entry.path).await {
                        warn!(path = %entry.path.display(), "Ignoring workspace folder that is not a directory");
                        continue;
                    }
                    let model = self.load_folder(&entry.path, excluded).await;
                    folders.insert(entry.path.clone(), model);
                    workspace_folders.push(WorkspaceFolder::new(
                        entry.path,
                        entry.name,
                        workspace_folders.len(),
                    ));
                }

                LoadedWorkspace {
                    workspace: Workspace::new(identifier.clone(), workspace_folders),
                    model: Some(Arc::new(document.model)),
                    folders,
                }
            }
        }
    }

    fn emit_transition(&self, previous: &ServiceState, next: &ServiceState, source: ConfigurationTarget) {
        if previous.workspace.state() != next.workspace.state() {
            self.events
                .publish(WorkspaceEvent::WorkbenchStateChanged(next.workspace.state()));
        }
        if previous.workspace.identifier() != next.workspace.identifier() {
            self.events.publish(WorkspaceEvent::WorkspaceNameChanged);
        }

        let folders = compare_folders(previous.workspace.folders(), next.workspace.folders());
        if !folders.is_empty() {
            self.events
                .publish(WorkspaceEvent::WillChangeFolders(folders.clone()));
            self.events.publish(WorkspaceEvent::DidChangeFolders(folders));
        }

        let diff = compare(&previous.configuration, &next.configuration);
        self.publish_configuration(diff, previous, next, source);
        self.publish_restricted(previous, next);
    }

    fn publish_configuration(
        &self,
        diff: ConfigurationDiff,
        previous: &ServiceState,
        next: &ServiceState,
        source: ConfigurationTarget,
    ) {
        if diff.is_empty() {
            return;
        }
        let folders: BTreeSet<PathBuf> = previous
            .configuration
            .layers()
            .folders
            .keys()
            .chain(next.configuration.layers().folders.keys())
            .cloned()
            .collect();
        let event = ConfigurationChangeEvent::new(diff, folders.into_iter().collect(), source);
        self.events.publish(WorkspaceEvent::ConfigurationChanged(event));
    }

    fn publish_restricted(&self, previous: &ServiceState, next: &ServiceState) {
        if previous.trust.restricted_settings() != next.trust.restricted_settings() {
            self.events.publish(WorkspaceEvent::RestrictedSettingsChanged(
                next.trust.restricted_settings().clone(),
            ));
        }
    }
}

fn apply_updates(state: &ServiceState, updates: Vec<LayerUpdate>) -> ServiceState {
    let mut layers = state.configuration.layers().clone();
    let mut workspace = state.workspace.clone();

    for update in updates {
        match update {
            LayerUpdate::UserLocal(model) => layers.user_local = model,
            LayerUpdate::UserRemote(model) => layers.user_remote = Some(model),
            LayerUpdate::Memory(model) => layers.memory = model,
            LayerUpdate::Folder(folder, model) => {
                // the folder may have left the workspace while it was loading
                if !layers.folders.contains_key(&folder) {
                    continue;
                }
                if workspace.state() == WorkbenchState::Folder {
                    layers.workspace = Some(Arc::clone(&model));
                }
                layers.folders.insert(folder, model);
            }
            LayerUpdate::Workspace(loaded) => {
                workspace = loaded.workspace;
                layers.workspace = loaded.model;
                layers.folders = loaded.folders;
            }
        }
    }

    let configuration = state.configuration.with_layers(layers);
    let mut trust = state.trust.clone();
    trust.refresh(&configuration);
    ServiceState {
        workspace,
        configuration: Arc::new(configuration),
        trust,
        remote_settings: state.remote_settings.clone(),
        initialized: state.initialized,
    }
}

/// `User` becomes the remote user layer for machine scoped keys when a
/// remote is attached, the local one otherwise
fn split_user_target(
    target: ConfigurationTarget,
    scope: ConfigurationScope,
    state: &ServiceState,
) -> ConfigurationTarget {
    match target {
        ConfigurationTarget::User if state.remote_settings.is_some() && scope.is_machine() => {
            ConfigurationTarget::UserRemote
        }
        ConfigurationTarget::User => ConfigurationTarget::UserLocal,
        other => other,
    }
}

fn derive_target(scope: ConfigurationScope, has_folder: bool, state: &ServiceState) -> ConfigurationTarget {
    let workspace_writable = !scope.is_user_only();
    match state.workspace.state() {
        WorkbenchState::Workspace if has_folder && workspace_writable => {
            ConfigurationTarget::WorkspaceFolder
        }
        WorkbenchState::Workspace | WorkbenchState::Folder if workspace_writable => {
            ConfigurationTarget::Workspace
        }
        _ => split_user_target(ConfigurationTarget::User, scope, state),
    }
}

/// Value `target` would inherit from the layers below it
fn inherited_value(
    configuration: &Configuration,
    key: &str,
    overrides: &ConfigurationOverrides,
    target: ConfigurationTarget,
) -> Option<Value> {
    let inspected = configuration.inspect(key, overrides);
    let below = match target {
        ConfigurationTarget::UserLocal | ConfigurationTarget::User => vec![inspected.default_value],
        ConfigurationTarget::UserRemote => vec![inspected.default_value, inspected.user_local_value],
        ConfigurationTarget::Workspace => vec![
            inspected.default_value,
            inspected.user_local_value,
            inspected.user_remote_value,
        ],
        ConfigurationTarget::WorkspaceFolder => vec![
            inspected.default_value,
            inspected.user_local_value,
            inspected.user_remote_value,
            inspected.workspace_value,
        ],
        ConfigurationTarget::Memory => vec![
            inspected.default_value,
            inspected.user_local_value,
            inspected.user_remote_value,
            inspected.workspace_value,
            inspected.workspace_folder_value,
        ],
        ConfigurationTarget::Default => Vec::new(),
    };

    below.into_iter().flatten().fold(None, |merged, value| match merged {
        Some(mut merged) => {
            merge_values(&mut merged, &value);
            Some(merged)
        }
        None => Some(value),
    })
}

fn user_location(settings_path: &Path, key: &str) -> WriteLocation {
    match standalone_key(key) {
        Some(TASKS_KEY) => WriteLocation::Nested {
            path: UserSettings::new(settings_path).tasks_path(),
            strip: Some(TASKS_KEY),
        },
        _ => WriteLocation::Settings {
            path: settings_path.to_path_buf(),
            section: None,
        },
    }
}
