//! Process-wide catalog of configuration property definitions
//!
//! The registry is shared behind an `Arc` and mutated through deltas. Every
//! mutation produces a new immutable [`RegistrySnapshot`] with a bumped
//! version; readers take a snapshot at the start of a call and never observe
//! a half-applied batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{is_override_key, override_identifiers_from_key, ConfigurationScope};

const REGISTRY_CHANNEL_CAPACITY: usize = 256;

/// Definition of one configuration property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationProperty {
    /// Dotted setting key, e.g. `editor.fontSize`
    pub key: String,
    /// Value used when no other layer defines the key
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub scope: ConfigurationScope,
    /// Restricted settings are ignored from untrusted workspace and folder layers
    #[serde(default)]
    pub restricted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ConfigurationProperty {
    /// Create a window scoped, unrestricted property
    pub fn new(key: impl Into<String>, default_value: Value) -> Self {
        Self {
            key: key.into(),
            default_value,
            scope: ConfigurationScope::Window,
            restricted: false,
            description: None,
        }
    }

    pub fn with_scope(mut self, scope: ConfigurationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Why a property was not registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The key is already registered (first registration wins)
    Duplicate,
    /// Empty key, or a key shaped like a language override
    InvalidKey,
}

/// A property dropped from a registration batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedProperty {
    pub key: String,
    pub reason: RejectionReason,
}

/// Outcome of a registry mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Keys whose definition or default changed
    pub affected_keys: Vec<String>,
    /// Properties dropped from the batch; siblings were still applied
    pub rejected: Vec<RejectedProperty>,
}

impl RegistrationReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Notification sent after every effective registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryChange {
    pub keys: Vec<String>,
    pub version: u64,
}

/// One batch of schema contributions, applied as a single delta
///
/// Defaults are applied first, then removals, then additions.
#[derive(Debug, Clone, Default)]
pub struct SchemaDelta {
    /// Default value overrides, including `"[lang]": {...}` blocks
    pub defaults: Vec<Map<String, Value>>,
    pub added: Vec<ConfigurationProperty>,
    pub removed: Vec<String>,
}

/// Immutable view of the registry at one version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    version: u64,
    properties: BTreeMap<String, ConfigurationProperty>,
    default_overrides: BTreeMap<String, Value>,
    retracted: BTreeSet<String>,
}

impl RegistrySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&ConfigurationProperty> {
        self.properties.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Scope of `key`, `Window` for unregistered keys
    pub fn scope_of(&self, key: &str) -> ConfigurationScope {
        self.properties
            .get(key)
            .map(|property| property.scope)
            .unwrap_or_default()
    }

    pub fn is_restricted(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .map(|property| property.restricted)
            .unwrap_or(false)
    }

    /// Effective default of a registered key, honoring default overrides
    pub fn default_value(&self, key: &str) -> Option<&Value> {
        let property = self.properties.get(key)?;
        Some(
            self.default_overrides
                .get(key)
                .unwrap_or(&property.default_value),
        )
    }

    pub fn properties(&self) -> impl Iterator<Item = &ConfigurationProperty> {
        self.properties.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    /// Registered keys marked restricted, sorted
    pub fn restricted_keys(&self) -> Vec<String> {
        self.properties
            .values()
            .filter(|property| property.restricted)
            .map(|property| property.key.clone())
            .collect()
    }

    /// Language default blocks contributed through the defaults phase
    pub fn language_defaults(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.default_overrides
            .iter()
            .filter(|(key, _)| is_override_key(key))
    }

    /// Keys deregistered and not registered again since
    pub fn retracted(&self) -> &BTreeSet<String> {
        &self.retracted
    }

    /// Keys whose definition, default or language default differs from `previous`
    pub fn changed_keys(&self, previous: &RegistrySnapshot) -> Vec<String> {
        let mut changed = BTreeSet::new();

        let all_keys: BTreeSet<&String> = self
            .properties
            .keys()
            .chain(previous.properties.keys())
            .collect();
        for key in all_keys {
            let same = self.properties.get(key) == previous.properties.get(key)
                && self.default_value(key) == previous.default_value(key);
            if !same {
                changed.insert(key.clone());
            }
        }

        let override_keys: BTreeSet<&String> = self
            .language_defaults()
            .chain(previous.language_defaults())
            .map(|(key, _)| key)
            .collect();
        for override_key in override_keys {
            let current = self.default_overrides.get(override_key);
            let before = previous.default_overrides.get(override_key);
            if current != before {
                for block in [current, before].into_iter().flatten() {
                    if let Some(block) = block.as_object() {
                        changed.extend(block.keys().cloned());
                    }
                }
            }
        }

        changed.into_iter().collect()
    }
}

/// Shared, versioned property registry
pub struct ConfigurationRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    changes: broadcast::Sender<RegistryChange>,
}

impl ConfigurationRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(REGISTRY_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            changes,
        }
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Subscribe to registry change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    pub fn get_property(&self, key: &str) -> Option<ConfigurationProperty> {
        self.current.read().get(key).cloned()
    }

    pub fn all_properties(&self) -> BTreeMap<String, ConfigurationProperty> {
        self.current.read().properties.clone()
    }

    /// Register property definitions
    ///
    /// Duplicate and invalid keys are dropped into the report; the remaining
    /// properties of the batch are still registered.
    pub fn register_properties(
        &self,
        properties: impl IntoIterator<Item = ConfigurationProperty>,
    ) -> RegistrationReport {
        let properties: Vec<_> = properties.into_iter().collect();
        self.mutate(|draft, report| add_properties(draft, properties, report))
    }

    /// Remove property definitions, returning the keys that were registered
    pub fn deregister_properties(&self, keys: &[String]) -> Vec<String> {
        self.mutate(|draft, report| remove_properties(draft, keys, report))
            .affected_keys
    }

    /// Apply a defaults contribution (`key -> default`, or `"[lang]" -> {...}`)
    pub fn register_defaults(&self, defaults: Map<String, Value>) -> Vec<String> {
        self.mutate(|draft, report| add_defaults(draft, defaults, report))
            .affected_keys
    }

    /// Drop previously contributed default overrides
    pub fn deregister_defaults(&self, keys: &[String]) -> Vec<String> {
        self.mutate(|draft, report| {
            for key in keys {
                if let Some(previous) = draft.default_overrides.remove(key) {
                    record_default_keys(key, &previous, report);
                }
            }
        })
        .affected_keys
    }

    /// Apply a two-phase schema contribution as one delta
    pub fn apply_delta(&self, delta: SchemaDelta) -> RegistrationReport {
        self.mutate(|draft, report| {
            for defaults in delta.defaults {
                add_defaults(draft, defaults, report);
            }
            remove_properties(draft, &delta.removed, report);
            add_properties(draft, delta.added, report);
        })
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut RegistrySnapshot, &mut RegistrationReport),
    ) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let change = {
            let mut current = self.current.write();
            let mut draft = RegistrySnapshot::clone(&current);
            apply(&mut draft, &mut report);

            dedup_in_place(&mut report.affected_keys);
            if report.affected_keys.is_empty() {
                return report;
            }

            draft.version = current.version + 1;
            let change = RegistryChange {
                keys: report.affected_keys.clone(),
                version: draft.version,
            };
            *current = Arc::new(draft);
            change
        };

        debug!(version = change.version, keys = ?change.keys, "Configuration registry updated");
        let _ = self.changes.send(change);
        report
    }
}

impl Default for ConfigurationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_key(key: &str) -> bool {
    !key.trim().is_empty() && !is_override_key(key) && !key.starts_with('.') && !key.ends_with('.')
}

fn add_properties(
    draft: &mut RegistrySnapshot,
    properties: Vec<ConfigurationProperty>,
    report: &mut RegistrationReport,
) {
    for property in properties {
        if !valid_key(&property.key) {
            warn!(key = %property.key, "Ignoring configuration property with an invalid key");
            report.rejected.push(RejectedProperty {
                key: property.key,
                reason: RejectionReason::InvalidKey,
            });
            continue;
        }
        if draft.properties.contains_key(&property.key) {
            warn!(key = %property.key, "Ignoring duplicate configuration property registration");
            report.rejected.push(RejectedProperty {
                key: property.key,
                reason: RejectionReason::Duplicate,
            });
            continue;
        }
        draft.retracted.remove(&property.key);
        report.affected_keys.push(property.key.clone());
        draft.properties.insert(property.key.clone(), property);
    }
}

fn remove_properties(draft: &mut RegistrySnapshot, keys: &[String], report: &mut RegistrationReport) {
    for key in keys {
        if draft.properties.remove(key).is_some() {
            draft.retracted.insert(key.clone());
            report.affected_keys.push(key.clone());
        }
    }
}

fn add_defaults(
    draft: &mut RegistrySnapshot,
    defaults: Map<String, Value>,
    report: &mut RegistrationReport,
) {
    for (key, value) in defaults {
        if is_override_key(&key) {
            if override_identifiers_from_key(&key).is_empty() || !value.is_object() {
                warn!(key = %key, "Ignoring malformed language default block");
                continue;
            }
            if let Some(previous) = draft.default_overrides.get(&key) {
                record_default_keys(&key, previous, report);
            }
        }
        record_default_keys(&key, &value, report);
        draft.default_overrides.insert(key, value);
    }
}

fn record_default_keys(key: &str, value: &Value, report: &mut RegistrationReport) {
    if is_override_key(key) {
        if let Some(block) = value.as_object() {
            report.affected_keys.extend(block.keys().cloned());
        }
    } else {
        report.affected_keys.push(key.to_string());
    }
}

fn dedup_in_place(keys: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    keys.retain(|key| seen.insert(key.clone()));
}
