//! Workspace trust and restricted settings

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::ConfigurationModel;
use crate::registry::RegistrySnapshot;
use crate::resolver::Configuration;
use crate::types::LayerKind;

/// Restricted keys physically present in each layer, independent of trust
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictedSettings {
    /// Every registered restricted key
    pub default: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_local: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_remote: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Vec<String>>,
    /// Folders that define at least one restricted key
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub workspace_folder: BTreeMap<PathBuf, Vec<String>>,
}

impl RestrictedSettings {
    pub fn compute(configuration: &Configuration) -> Self {
        let registry = configuration.registry();
        let layers = configuration.layers();
        let present = |model: &ConfigurationModel| {
            let keys = restricted_keys_in(model, registry);
            (!keys.is_empty()).then_some(keys)
        };

        Self {
            default: registry.restricted_keys(),
            user_local: present(layers.user_local.as_ref()),
            user_remote: layers.user_remote.as_deref().and_then(present),
            workspace: layers.workspace.as_deref().and_then(present),
            workspace_folder: layers
                .folders
                .iter()
                .filter_map(|(folder, model)| present(model.as_ref()).map(|keys| (folder.clone(), keys)))
                .collect(),
        }
    }
}

/// Restricted keys `model` defines, directly or in a language block
pub fn restricted_keys_in(model: &ConfigurationModel, registry: &RegistrySnapshot) -> Vec<String> {
    registry
        .restricted_keys()
        .into_iter()
        .filter(|key| {
            model.has(key)
                || model
                    .override_identifiers()
                    .iter()
                    .any(|identifier| model.get_override_value(identifier, key).is_some())
        })
        .collect()
}

/// The workspace trust flag and the restricted settings it gates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustGate {
    trusted: bool,
    restricted: RestrictedSettings,
}

impl TrustGate {
    pub fn new(trusted: bool) -> Self {
        Self {
            trusted,
            restricted: RestrictedSettings::default(),
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Set the flag, returning whether it changed
    pub fn set_trusted(&mut self, trusted: bool) -> bool {
        let changed = self.trusted != trusted;
        self.trusted = trusted;
        changed
    }

    pub fn restricted_settings(&self) -> &RestrictedSettings {
        &self.restricted
    }

    /// Recompute the restricted settings, returning whether they changed
    pub fn refresh(&mut self, configuration: &Configuration) -> bool {
        let restricted = RestrictedSettings::compute(configuration);
        let changed = restricted != self.restricted;
        self.restricted = restricted;
        changed
    }

    /// Whether a restricted key from `layer` is suppressed at this trust level
    pub fn suppresses(trusted: bool, layer: LayerKind, restricted: bool) -> bool {
        restricted
            && !trusted
            && matches!(layer, LayerKind::Workspace | LayerKind::WorkspaceFolder)
    }
}

impl Default for TrustGate {
    fn default() -> Self {
        Self::new(true)
    }
}
