//! Effective value resolution over an immutable layer set
//!
//! A [`Configuration`] is one consistent snapshot: a registry snapshot, the
//! models of every present layer, and the trust flag. Resolution walks the
//! layers a key's scope admits, in increasing precedence, merging object
//! values key by key and letting later layers replace scalars and arrays.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::ConfigurationModel;
use crate::registry::{ConfigurationProperty, RegistrySnapshot};
use crate::trust::TrustGate;
use crate::types::{ConfigurationOverrides, ConfigurationScope, LayerKind};
use crate::values::{
    add_to_value_tree, is_parent_key, keys_related, merge_values, remove_from_value_tree,
};

/// Models of every layer; absent optional layers are `None`
#[derive(Debug, Clone, Default)]
pub struct LayerSet {
    pub default: Arc<ConfigurationModel>,
    pub user_local: Arc<ConfigurationModel>,
    pub user_remote: Option<Arc<ConfigurationModel>>,
    pub workspace: Option<Arc<ConfigurationModel>>,
    pub folders: BTreeMap<PathBuf, Arc<ConfigurationModel>>,
    pub memory: Arc<ConfigurationModel>,
}

impl LayerSet {
    /// Folder owning `resource`: the deepest folder that contains it
    pub fn folder_for(&self, resource: &Path) -> Option<&Path> {
        self.folders
            .keys()
            .filter(|folder| resource.starts_with(folder))
            .max_by_key(|folder| folder.components().count())
            .map(PathBuf::as_path)
    }

    /// Present layers in increasing precedence, with the folder layer of
    /// `resource` when there is one
    fn chain(&self, resource: Option<&Path>) -> Vec<(LayerKind, &ConfigurationModel)> {
        let mut chain = vec![
            (LayerKind::Default, self.default.as_ref()),
            (LayerKind::UserLocal, self.user_local.as_ref()),
        ];
        if let Some(remote) = &self.user_remote {
            chain.push((LayerKind::UserRemote, remote.as_ref()));
        }
        if let Some(workspace) = &self.workspace {
            chain.push((LayerKind::Workspace, workspace.as_ref()));
        }
        if let Some(folder) = resource.and_then(|resource| self.folder_for(resource)) {
            if let Some(model) = self.folders.get(folder) {
                chain.push((LayerKind::WorkspaceFolder, model.as_ref()));
            }
        }
        chain.push((LayerKind::Memory, self.memory.as_ref()));
        chain
    }

    fn models(&self) -> impl Iterator<Item = &ConfigurationModel> {
        [Some(&self.default), Some(&self.user_local)]
            .into_iter()
            .chain([self.user_remote.as_ref(), self.workspace.as_ref()])
            .flatten()
            .chain(self.folders.values())
            .chain(std::iter::once(&self.memory))
            .map(Arc::as_ref)
    }
}

/// Whether a layer may contribute a key of `scope`
///
/// With a remote authority configured, machine scoped keys belong to the
/// remote user layer and the local user layer does not contribute them.
pub fn layer_admits_scope(scope: ConfigurationScope, layer: LayerKind, remote_authority: bool) -> bool {
    match layer {
        LayerKind::Default | LayerKind::Memory => true,
        LayerKind::UserLocal => !(remote_authority && scope.is_machine()),
        LayerKind::UserRemote => scope != ConfigurationScope::Application,
        LayerKind::Workspace | LayerKind::WorkspaceFolder => !scope.is_user_only(),
    }
}

type CacheKey = (String, Option<PathBuf>, Option<String>);

/// Immutable snapshot of everything resolution depends on
pub struct Configuration {
    registry: Arc<RegistrySnapshot>,
    layers: LayerSet,
    trusted: bool,
    remote_authority: bool,
    cache: Mutex<HashMap<CacheKey, Option<Value>>>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("registry_version", &self.registry.version())
            .field("layers", &self.layers)
            .field("trusted", &self.trusted)
            .field("remote_authority", &self.remote_authority)
            .finish()
    }
}

impl Configuration {
    pub fn new(
        registry: Arc<RegistrySnapshot>,
        layers: LayerSet,
        trusted: bool,
        remote_authority: bool,
    ) -> Self {
        Self {
            registry,
            layers,
            trusted,
            remote_authority,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<RegistrySnapshot> {
        &self.registry
    }

    pub fn layers(&self) -> &LayerSet {
        &self.layers
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn has_remote_authority(&self) -> bool {
        self.remote_authority
    }

    /// Same registry and trust, new layers
    pub fn with_layers(&self, layers: LayerSet) -> Self {
        Self::new(
            Arc::clone(&self.registry),
            layers,
            self.trusted,
            self.remote_authority,
        )
    }

    pub fn with_trust(&self, trusted: bool) -> Self {
        Self::new(
            Arc::clone(&self.registry),
            self.layers.clone(),
            trusted,
            self.remote_authority,
        )
    }

    /// New registry snapshot and layers re-derived for it
    ///
    /// Cached values are carried over except for keys related to `affected`.
    pub fn with_registry(
        &self,
        registry: Arc<RegistrySnapshot>,
        layers: LayerSet,
        affected: &[String],
    ) -> Self {
        let next = Self::new(registry, layers, self.trusted, self.remote_authority);
        {
            let cache = self.cache.lock();
            let mut carried = next.cache.lock();
            for (entry, value) in cache.iter() {
                if !affected.iter().any(|key| keys_related(key, &entry.0)) {
                    carried.insert(entry.clone(), value.clone());
                }
            }
        }
        next
    }

    pub fn folder_for(&self, resource: &Path) -> Option<&Path> {
        self.layers.folder_for(resource)
    }

    /// Property owning `key`: its own definition or the nearest registered parent
    pub fn property_of(&self, key: &str) -> Option<&ConfigurationProperty> {
        let mut candidate = key;
        loop {
            if let Some(property) = self.registry.get(candidate) {
                return Some(property);
            }
            match candidate.rfind('.') {
                Some(index) => candidate = &candidate[..index],
                None => return None,
            }
        }
    }

    pub fn scope_of(&self, key: &str) -> ConfigurationScope {
        self.property_of(key)
            .map(|property| property.scope)
            .unwrap_or_default()
    }

    pub fn is_restricted(&self, key: &str) -> bool {
        self.property_of(key)
            .map(|property| property.restricted)
            .unwrap_or(false)
    }

    /// Whether `layer` may contribute `key` under the current scope and trust
    pub fn admits(&self, layer: LayerKind, key: &str) -> bool {
        if !layer_admits_scope(self.scope_of(key), layer, self.remote_authority) {
            return false;
        }
        !TrustGate::suppresses(self.trusted, layer, self.is_restricted(key))
    }

    /// Effective value of `key`, cached per snapshot
    pub fn get_value(&self, key: &str, overrides: &ConfigurationOverrides) -> Option<Value> {
        let cache_key = (
            key.to_string(),
            self.cache_resource(overrides.resource.as_deref()),
            overrides.override_identifier.clone(),
        );
        if let Some(value) = self.cache.lock().get(&cache_key) {
            return value.clone();
        }
        let value = resolve(self, key, overrides);
        self.cache.lock().insert(cache_key, value.clone());
        value
    }

    pub fn inspect(&self, key: &str, overrides: &ConfigurationOverrides) -> InspectValue {
        inspect(self, key, overrides)
    }

    pub fn keys(&self) -> ConfigurationKeys {
        keys(self)
    }

    // resources inside the same folder resolve identically
    fn cache_resource(&self, resource: Option<&Path>) -> Option<PathBuf> {
        resource
            .and_then(|resource| self.folder_for(resource))
            .map(Path::to_path_buf)
    }

    /// Value `model` contributes for `key` as `layer`
    ///
    /// Section values drop descendants the layer may not contribute. With a
    /// language, override blocks of language overridable keys are merged in
    /// after the base value of the same layer.
    fn layer_value(
        &self,
        layer: LayerKind,
        model: &ConfigurationModel,
        key: &str,
        language: Option<&str>,
    ) -> Option<Value> {
        if !self.admits(layer, key) {
            return None;
        }

        let descendants: Vec<&String> = self
            .registry
            .keys()
            .filter(|candidate| is_parent_key(key, candidate))
            .collect();

        let mut value = model.get_value(key).cloned();
        let mut emptied = false;
        if let Some(Value::Object(section)) = value.as_mut() {
            let mut filtered = false;
            for descendant in &descendants {
                if !self.admits(layer, descendant) {
                    let relative = &descendant[key.len() + 1..];
                    filtered |= remove_from_value_tree(section, relative).is_some();
                }
            }
            emptied = filtered && section.is_empty();
        }
        if emptied {
            value = None;
        }

        let language = match language {
            Some(language) => language,
            None => return value,
        };

        if self.scope_of(key) == ConfigurationScope::LanguageOverridable {
            if let Some(language_value) = model.get_override_value(language, key) {
                value = Some(merged(value, &language_value));
            }
            return value;
        }

        for descendant in descendants {
            if self.scope_of(descendant) != ConfigurationScope::LanguageOverridable
                || !self.admits(layer, descendant)
            {
                continue;
            }
            if let Some(language_value) = model.get_override_value(language, descendant) {
                let mut nested = Map::new();
                if add_to_value_tree(&mut nested, &descendant[key.len() + 1..], language_value) {
                    value = Some(merged(value, &Value::Object(nested)));
                }
            }
        }
        value
    }
}

fn merged(base: Option<Value>, add: &Value) -> Value {
    match base {
        Some(mut base) => {
            merge_values(&mut base, add);
            base
        }
        None => add.clone(),
    }
}

fn merge_slot(slot: &mut Option<Value>, add: &Value) {
    *slot = Some(merged(slot.take(), add));
}

/// Resolve the effective value of `key`
///
/// Unknown keys resolve to `None`; that is not an error.
pub fn resolve(
    configuration: &Configuration,
    key: &str,
    overrides: &ConfigurationOverrides,
) -> Option<Value> {
    let language = overrides.override_identifier.as_deref();
    let mut value = None;
    for (layer, model) in configuration.layers.chain(overrides.resource.as_deref()) {
        if let Some(contribution) = configuration.layer_value(layer, model, key, language) {
            merge_slot(&mut value, &contribution);
        }
    }
    value
}

/// Per-layer breakdown of a key
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectValue {
    pub key: String,
    pub default_value: Option<Value>,
    /// Local and remote user values merged
    pub user_value: Option<Value>,
    pub user_local_value: Option<Value>,
    pub user_remote_value: Option<Value>,
    pub workspace_value: Option<Value>,
    pub workspace_folder_value: Option<Value>,
    pub memory_value: Option<Value>,
    /// The effective value
    pub value: Option<Value>,
    /// Languages overriding the key in any layer
    pub override_identifiers: Vec<String>,
}

/// Resolve `key` and report what every layer contributes
pub fn inspect(
    configuration: &Configuration,
    key: &str,
    overrides: &ConfigurationOverrides,
) -> InspectValue {
    let language = overrides.override_identifier.as_deref();
    let mut inspected = InspectValue {
        key: key.to_string(),
        ..InspectValue::default()
    };

    for (layer, model) in configuration.layers.chain(overrides.resource.as_deref()) {
        let contribution = match configuration.layer_value(layer, model, key, language) {
            Some(contribution) => contribution,
            None => continue,
        };
        match layer {
            LayerKind::Default => inspected.default_value = Some(contribution.clone()),
            LayerKind::UserLocal => {
                merge_slot(&mut inspected.user_value, &contribution);
                inspected.user_local_value = Some(contribution.clone());
            }
            LayerKind::UserRemote => {
                merge_slot(&mut inspected.user_value, &contribution);
                inspected.user_remote_value = Some(contribution.clone());
            }
            LayerKind::Workspace => inspected.workspace_value = Some(contribution.clone()),
            LayerKind::WorkspaceFolder => {
                inspected.workspace_folder_value = Some(contribution.clone())
            }
            LayerKind::Memory => inspected.memory_value = Some(contribution.clone()),
        }
        merge_slot(&mut inspected.value, &contribution);
    }

    let identifiers: BTreeSet<String> = configuration
        .layers
        .models()
        .flat_map(|model| model.overrides_for_key(key))
        .collect();
    inspected.override_identifiers = identifiers.into_iter().collect();
    inspected
}

/// Keys each layer defines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationKeys {
    pub default: Vec<String>,
    /// Local and remote user keys
    pub user: Vec<String>,
    pub workspace: Vec<String>,
    /// Keys of every folder layer
    pub workspace_folder: Vec<String>,
    pub memory: Vec<String>,
}

pub fn keys(configuration: &Configuration) -> ConfigurationKeys {
    let layers = &configuration.layers;
    let user = layers
        .user_local
        .keys()
        .iter()
        .chain(layers.user_remote.iter().flat_map(|model| model.keys()))
        .cloned()
        .collect::<BTreeSet<_>>();
    let folders = layers
        .folders
        .values()
        .flat_map(|model| model.keys())
        .cloned()
        .collect::<BTreeSet<_>>();

    ConfigurationKeys {
        default: layers.default.keys().to_vec(),
        user: user.into_iter().collect(),
        workspace: layers
            .workspace
            .as_ref()
            .map(|model| model.keys().to_vec())
            .unwrap_or_default(),
        workspace_folder: folders.into_iter().collect(),
        memory: layers.memory.keys().to_vec(),
    }
}

/// Keys whose effective value differs between two snapshots, with the
/// folders they differ for (`None` for the resource-less value)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDiff {
    changes: BTreeMap<String, BTreeSet<Option<PathBuf>>>,
}

impl ConfigurationDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changed keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.changes.keys().cloned().collect()
    }

    pub fn changes(&self) -> &BTreeMap<String, BTreeSet<Option<PathBuf>>> {
        &self.changes
    }

    pub fn into_changes(self) -> BTreeMap<String, BTreeSet<Option<PathBuf>>> {
        self.changes
    }

    fn record(&mut self, key: &str, scope: Option<PathBuf>) {
        self.changes.entry(key.to_string()).or_default().insert(scope);
    }
}

/// Diff every key known to either snapshot
pub fn compare(previous: &Configuration, current: &Configuration) -> ConfigurationDiff {
    let mut candidates = BTreeSet::new();
    for configuration in [previous, current] {
        candidates.extend(configuration.registry.keys().cloned());
        for model in configuration.layers.models() {
            candidates.extend(model.keys().iter().cloned());
            for block in model.overrides() {
                candidates.extend(block.keys.iter().cloned());
            }
        }
    }
    compare_keys(previous, current, candidates.iter().map(String::as_str))
}

/// Diff only `keys`
pub fn compare_keys<'a>(
    previous: &Configuration,
    current: &Configuration,
    keys: impl IntoIterator<Item = &'a str>,
) -> ConfigurationDiff {
    let mut resources: BTreeSet<Option<PathBuf>> = BTreeSet::new();
    resources.insert(None);
    let mut languages: BTreeSet<Option<String>> = BTreeSet::new();
    languages.insert(None);
    for configuration in [previous, current] {
        resources.extend(configuration.layers.folders.keys().cloned().map(Some));
        for model in configuration.layers.models() {
            languages.extend(model.override_identifiers().into_iter().map(Some));
        }
    }

    let mut diff = ConfigurationDiff::default();
    for key in keys {
        for resource in &resources {
            let changed = languages.iter().any(|language| {
                let overrides = ConfigurationOverrides {
                    resource: resource.clone(),
                    override_identifier: language.clone(),
                };
                previous.get_value(key, &overrides) != current.get_value(key, &overrides)
            });
            if changed {
                diff.record(key, resource.clone());
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConfigurationRegistry;
    use serde_json::json;

    fn model(value: Value) -> Arc<ConfigurationModel> {
        match value {
            Value::Object(map) => Arc::new(ConfigurationModel::parse(map, &BTreeSet::new())),
            _ => panic!("expected object"),
        }
    }

    fn registry(properties: Vec<ConfigurationProperty>) -> Arc<RegistrySnapshot> {
        let registry = ConfigurationRegistry::new();
        registry.register_properties(properties);
        registry.snapshot()
    }

    fn configuration(registry: Arc<RegistrySnapshot>, mut layers: LayerSet) -> Configuration {
        layers.default = Arc::new(ConfigurationModel::from_registry(&registry));
        Configuration::new(registry, layers, true, false)
    }

    fn folder() -> PathBuf {
        PathBuf::from("/work/a")
    }

    #[test]
    fn test_workspace_overrides_user_overrides_default() {
        let registry = registry(vec![ConfigurationProperty::new("p.setting", json!("isSet"))
            .with_scope(ConfigurationScope::Resource)]);
        let config = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"p.setting": "userValue"})),
                workspace: Some(model(json!({"p.setting": "workspaceValue"}))),
                ..LayerSet::default()
            },
        );

        let inspected = config.inspect("p.setting", &ConfigurationOverrides::none());
        assert_eq!(inspected.default_value, Some(json!("isSet")));
        assert_eq!(inspected.user_value, Some(json!("userValue")));
        assert_eq!(inspected.workspace_value, Some(json!("workspaceValue")));
        assert_eq!(inspected.value, Some(json!("workspaceValue")));
    }

    #[test]
    fn test_application_and_machine_ignore_workspace() {
        let registry = registry(vec![
            ConfigurationProperty::new("app.key", json!("d"))
                .with_scope(ConfigurationScope::Application),
            ConfigurationProperty::new("machine.key", json!("d"))
                .with_scope(ConfigurationScope::Machine),
        ]);
        let mut folders = BTreeMap::new();
        folders.insert(folder(), model(json!({"app.key": "f", "machine.key": "f"})));
        let config = configuration(
            registry,
            LayerSet {
                user_remote: Some(model(json!({"app.key": "r", "machine.key": "r"}))),
                workspace: Some(model(json!({"app.key": "w", "machine.key": "w"}))),
                folders,
                ..LayerSet::default()
            },
        );

        let resource = ConfigurationOverrides::resource(folder().join("file.rs"));
        assert_eq!(config.get_value("app.key", &resource), Some(json!("d")));
        assert_eq!(config.get_value("machine.key", &resource), Some(json!("r")));
        assert_eq!(config.inspect("app.key", &resource).workspace_value, None);
    }

    #[test]
    fn test_machine_overridable_precedence() {
        let registry = registry(vec![ConfigurationProperty::new("m.key", json!("d"))
            .with_scope(ConfigurationScope::MachineOverridable)]);
        let config = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"m.key": "local"})),
                user_remote: Some(model(json!({"m.key": "remote"}))),
                workspace: Some(model(json!({"m.key": "workspace"}))),
                ..LayerSet::default()
            },
        );
        assert_eq!(
            config.get_value("m.key", &ConfigurationOverrides::none()),
            Some(json!("workspace"))
        );
    }

    #[test]
    fn test_remote_authority_hides_local_machine_values() {
        let registry = registry(vec![ConfigurationProperty::new("m.key", json!("d"))
            .with_scope(ConfigurationScope::Machine)]);
        let mut layers = LayerSet {
            user_local: model(json!({"m.key": "local"})),
            ..LayerSet::default()
        };
        layers.default = Arc::new(ConfigurationModel::from_registry(&registry));
        let config = Configuration::new(registry, layers, true, true);

        assert_eq!(
            config.get_value("m.key", &ConfigurationOverrides::none()),
            Some(json!("d"))
        );
    }

    #[test]
    fn test_folder_layer_needs_resource() {
        let registry = registry(vec![ConfigurationProperty::new("r.key", json!("d"))
            .with_scope(ConfigurationScope::Resource)]);
        let mut folders = BTreeMap::new();
        folders.insert(folder(), model(json!({"r.key": "folder"})));
        let config = configuration(
            registry,
            LayerSet {
                folders,
                ..LayerSet::default()
            },
        );

        assert_eq!(config.get_value("r.key", &ConfigurationOverrides::none()), Some(json!("d")));
        assert_eq!(
            config.get_value("r.key", &ConfigurationOverrides::resource(folder())),
            Some(json!("folder"))
        );
        assert_eq!(
            config.get_value("r.key", &ConfigurationOverrides::resource("/elsewhere")),
            Some(json!("d"))
        );
    }

    #[test]
    fn test_restricted_folder_value_needs_trust() {
        let registry = registry(vec![ConfigurationProperty::new("r.key", json!("d")).restricted()]);
        let mut folders = BTreeMap::new();
        folders.insert(folder(), model(json!({"r.key": "folder"})));
        let trusted = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"r.key": "user"})),
                folders,
                ..LayerSet::default()
            },
        );
        let untrusted = trusted.with_trust(false);
        let resource = ConfigurationOverrides::resource(folder());

        assert_eq!(trusted.get_value("r.key", &resource), Some(json!("folder")));
        assert_eq!(untrusted.get_value("r.key", &resource), Some(json!("user")));

        let diff = compare(&trusted, &untrusted);
        assert_eq!(diff.keys(), vec!["r.key"]);
        assert!(diff.changes()["r.key"].contains(&Some(folder())));
        assert!(!diff.changes()["r.key"].contains(&None));
    }

    #[test]
    fn test_objects_merge_and_arrays_replace() {
        let registry = registry(vec![
            ConfigurationProperty::new("o.map", json!({"a": 1, "b": 2})),
            ConfigurationProperty::new("o.list", json!([1, 2])),
        ]);
        let config = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"o.map": {"b": 3, "c": 4}, "o.list": [9]})),
                ..LayerSet::default()
            },
        );
        let none = ConfigurationOverrides::none();

        assert_eq!(config.get_value("o.map", &none), Some(json!({"a": 1, "b": 3, "c": 4})));
        assert_eq!(config.get_value("o.list", &none), Some(json!([9])));
        assert_eq!(config.inspect("o.map", &none).user_value, Some(json!({"b": 3, "c": 4})));
    }

    #[test]
    fn test_section_filters_ineligible_children() {
        let registry = registry(vec![
            ConfigurationProperty::new("s.window", json!(1)),
            ConfigurationProperty::new("s.app", json!(1)).with_scope(ConfigurationScope::Application),
        ]);
        let config = configuration(
            registry,
            LayerSet {
                workspace: Some(model(json!({"s.window": 2, "s.app": 2}))),
                ..LayerSet::default()
            },
        );

        assert_eq!(
            config.get_value("s", &ConfigurationOverrides::none()),
            Some(json!({"window": 2, "app": 1}))
        );
    }

    #[test]
    fn test_language_override_in_same_slot() {
        let registry = registry(vec![ConfigurationProperty::new("editor.tabSize", json!(4))
            .with_scope(ConfigurationScope::LanguageOverridable)]);
        let config = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"[rust]": {"editor.tabSize": 2}})),
                workspace: Some(model(json!({"editor.tabSize": 8}))),
                ..LayerSet::default()
            },
        );

        let rust = ConfigurationOverrides::language("rust");
        assert_eq!(config.get_value("editor.tabSize", &rust), Some(json!(8)));
        let inspected = config.inspect("editor.tabSize", &rust);
        assert_eq!(inspected.user_value, Some(json!(2)));
        assert_eq!(inspected.override_identifiers, vec!["rust"]);
        assert_eq!(
            config.get_value("editor.tabSize", &ConfigurationOverrides::language("go")),
            Some(json!(8))
        );
    }

    #[test]
    fn test_language_override_ignored_for_other_scopes() {
        let registry = registry(vec![ConfigurationProperty::new("w.key", json!(1))]);
        let config = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"[rust]": {"w.key": 2}})),
                ..LayerSet::default()
            },
        );
        assert_eq!(
            config.get_value("w.key", &ConfigurationOverrides::language("rust")),
            Some(json!(1))
        );
    }

    #[test]
    fn test_unknown_key_is_none_everywhere() {
        let config = configuration(registry(Vec::new()), LayerSet::default());
        let inspected = config.inspect("nope", &ConfigurationOverrides::none());
        assert_eq!(inspected, InspectValue {
            key: "nope".to_string(),
            ..InspectValue::default()
        });
    }

    #[test]
    fn test_keys_per_layer() {
        let registry = registry(vec![ConfigurationProperty::new("a.key", json!(1))]);
        let mut folders = BTreeMap::new();
        folders.insert(folder(), model(json!({"f.key": 1})));
        let config = configuration(
            registry,
            LayerSet {
                user_local: model(json!({"u.local": 1})),
                user_remote: Some(model(json!({"u.remote": 1}))),
                workspace: Some(model(json!({"w.key": 1}))),
                folders,
                ..LayerSet::default()
            },
        );

        let keys = config.keys();
        assert_eq!(keys.default, vec!["a.key"]);
        assert_eq!(keys.user, vec!["u.local", "u.remote"]);
        assert_eq!(keys.workspace, vec!["w.key"]);
        assert_eq!(keys.workspace_folder, vec!["f.key"]);
    }

    #[test]
    fn test_registry_change_carries_unrelated_cache() {
        let registry = registry(vec![
            ConfigurationProperty::new("a.key", json!(1)),
            ConfigurationProperty::new("b.key", json!(1)),
        ]);
        let config = configuration(registry.clone(), LayerSet::default());
        let none = ConfigurationOverrides::none();
        config.get_value("a.key", &none);
        config.get_value("b.key", &none);

        let next = config.with_registry(registry, config.layers().clone(), &["a".to_string()]);
        let cache = next.cache.lock();
        assert_eq!(cache.len(), 1);
        assert!(cache.keys().all(|entry| entry.0 == "b.key"));
    }
}
