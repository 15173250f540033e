//! Immutable per-source configuration models
//!
//! A [`ConfigurationModel`] keeps the document it was built from (`raw`), the
//! nested value tree derived from it, the index of keys the document defines,
//! and its language override blocks. Models are never edited in place; every
//! change builds a new model.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::registry::RegistrySnapshot;
use crate::types::{is_override_key, key_from_override_identifier, override_identifiers_from_key};
use crate::values::{
    add_to_value_tree, get_value_in_tree, keys_related, merge_values, remove_from_value_tree,
    set_flat_value,
};

/// Settings contributed by one `"[lang]"` block
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationOverride {
    pub identifiers: Vec<String>,
    pub contents: Map<String, Value>,
    pub keys: Vec<String>,
}

/// Parsed settings of one layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationModel {
    raw: Map<String, Value>,
    contents: Map<String, Value>,
    keys: Vec<String>,
    overrides: Vec<ConfigurationOverride>,
}

impl ConfigurationModel {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a model from a settings document
    ///
    /// Keys in `excluded` are left out of the index and the value tree but
    /// stay in the raw document, so re-deriving without them restores them.
    pub fn parse(raw: Map<String, Value>, excluded: &BTreeSet<String>) -> Self {
        let (contents, keys) = expand_settings(&raw, excluded);

        let mut overrides = Vec::new();
        for (key, value) in &raw {
            if !is_override_key(key) {
                continue;
            }
            let identifiers = override_identifiers_from_key(key);
            let block = match value.as_object() {
                Some(block) if !identifiers.is_empty() => block,
                _ => {
                    warn!(key = %key, "Ignoring language override that is not an object");
                    continue;
                }
            };
            let (contents, keys) = expand_settings(block, excluded);
            overrides.push(ConfigurationOverride {
                identifiers,
                contents,
                keys,
            });
        }

        Self {
            raw,
            contents,
            keys,
            overrides,
        }
    }

    /// Default layer derived from the registry: every registered key with its
    /// effective default, plus language default blocks
    pub fn from_registry(registry: &RegistrySnapshot) -> Self {
        let mut raw = Map::new();
        for property in registry.properties() {
            if let Some(value) = registry.default_value(&property.key) {
                raw.insert(property.key.clone(), value.clone());
            }
        }
        for (key, block) in registry.language_defaults() {
            raw.insert(key.clone(), block.clone());
        }
        Self::parse(raw, &BTreeSet::new())
    }

    /// Re-derive this model with a different excluded key set
    pub fn reparse(&self, excluded: &BTreeSet<String>) -> Self {
        Self::parse(self.raw.clone(), excluded)
    }

    /// New model with `key` set (or removed when `value` is `None`)
    pub fn with_value(
        &self,
        key: &str,
        value: Option<Value>,
        override_identifier: Option<&str>,
        excluded: &BTreeSet<String>,
    ) -> Self {
        let mut raw = self.raw.clone();
        match override_identifier {
            Some(identifier) => {
                let block_key = key_from_override_identifier(identifier);
                let mut block = raw
                    .remove(&block_key)
                    .and_then(|block| match block {
                        Value::Object(block) => Some(block),
                        _ => None,
                    })
                    .unwrap_or_default();
                set_flat_value(&mut block, key, value);
                if !block.is_empty() {
                    raw.insert(block_key, Value::Object(block));
                }
            }
            None => set_flat_value(&mut raw, key, value),
        }
        Self::parse(raw, excluded)
    }

    /// The document this model was parsed from
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// The nested value tree
    pub fn contents(&self) -> &Map<String, Value> {
        &self.contents
    }

    /// Keys this model defines, in document order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn overrides(&self) -> &[ConfigurationOverride] {
        &self.overrides
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.overrides.is_empty()
    }

    /// Value at `key`; a parent key returns the whole section
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        get_value_in_tree(&self.contents, key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    /// Value of `key` from every override block naming `identifier`, merged
    /// in document order
    pub fn get_override_value(&self, identifier: &str, key: &str) -> Option<Value> {
        let mut merged: Option<Value> = None;
        for block in self.overrides_for_identifier(identifier) {
            if let Some(value) = get_value_in_tree(&block.contents, key) {
                match merged.as_mut() {
                    Some(existing) => merge_values(existing, value),
                    None => merged = Some(value.clone()),
                }
            }
        }
        merged
    }

    /// Keys overridden for `identifier`
    pub fn override_keys(&self, identifier: &str) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for block in self.overrides_for_identifier(identifier) {
            keys.extend(block.keys.iter().cloned());
        }
        keys.into_iter().collect()
    }

    /// Every language with an override block, sorted
    pub fn override_identifiers(&self) -> Vec<String> {
        let identifiers: BTreeSet<&String> = self
            .overrides
            .iter()
            .flat_map(|block| block.identifiers.iter())
            .collect();
        identifiers.into_iter().cloned().collect()
    }

    /// Languages whose override block defines `key` or one of its relatives
    pub fn overrides_for_key(&self, key: &str) -> Vec<String> {
        let mut identifiers = BTreeSet::new();
        for block in &self.overrides {
            if block.keys.iter().any(|k| keys_related(k, key)) {
                identifiers.extend(block.identifiers.iter().cloned());
            }
        }
        identifiers.into_iter().collect()
    }

    /// The value tree with override blocks re-attached under `"[lang]"` keys
    pub fn to_record(&self) -> Value {
        let mut record = self.contents.clone();
        for block in &self.overrides {
            let key = block
                .identifiers
                .iter()
                .map(|id| key_from_override_identifier(id))
                .collect::<String>();
            record.insert(key, Value::Object(block.contents.clone()));
        }
        Value::Object(record)
    }

    fn overrides_for_identifier<'a>(
        &'a self,
        identifier: &'a str,
    ) -> impl Iterator<Item = &'a ConfigurationOverride> + 'a {
        self.overrides
            .iter()
            .filter(move |block| block.identifiers.iter().any(|id| id == identifier))
    }
}

fn expand_settings(
    document: &Map<String, Value>,
    excluded: &BTreeSet<String>,
) -> (Map<String, Value>, Vec<String>) {
    let mut contents = Map::new();
    let mut keys = Vec::new();

    for (key, value) in document {
        if is_override_key(key) || excluded.contains(key) || key.is_empty() {
            continue;
        }
        if add_to_value_tree(&mut contents, key, value.clone()) {
            keys.push(key.clone());
        }
    }

    // excluded keys may also sit inside an object written under a parent key
    for key in excluded {
        remove_from_value_tree(&mut contents, key);
    }

    (contents, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConfigurationProperty, ConfigurationRegistry};
    use serde_json::json;

    fn document(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn parse(value: Value) -> ConfigurationModel {
        ConfigurationModel::parse(document(value), &BTreeSet::new())
    }

    #[test]
    fn test_parse_expands_dotted_keys() {
        let model = parse(json!({"editor.fontSize": 12, "editor.wrap": "on", "files": {"eol": "\n"}}));

        assert_eq!(model.keys(), &["editor.fontSize", "editor.wrap", "files"]);
        assert_eq!(model.get_value("editor.fontSize"), Some(&json!(12)));
        assert_eq!(
            model.get_value("editor"),
            Some(&json!({"fontSize": 12, "wrap": "on"}))
        );
        assert_eq!(model.get_value("files.eol"), Some(&json!("\n")));
        assert!(model.has("editor.wrap"));
        assert!(!model.has("editor.missing"));
    }

    #[test]
    fn test_language_override_blocks() {
        let model = parse(json!({
            "editor.tabSize": 4,
            "[rust]": {"editor.tabSize": 2},
            "[rust][toml]": {"editor.wrap": "off"}
        }));

        assert_eq!(model.override_identifiers(), vec!["rust", "toml"]);
        assert_eq!(model.get_override_value("rust", "editor.tabSize"), Some(json!(2)));
        assert_eq!(model.get_override_value("toml", "editor.wrap"), Some(json!("off")));
        assert_eq!(model.get_override_value("go", "editor.tabSize"), None);
        assert_eq!(model.overrides_for_key("editor.tabSize"), vec!["rust"]);
        assert_eq!(model.override_keys("rust"), vec!["editor.tabSize", "editor.wrap"]);
        assert_eq!(model.keys(), &["editor.tabSize"]);
    }

    #[test]
    fn test_excluded_keys_are_purged_but_raw_is_kept() {
        let mut excluded = BTreeSet::new();
        excluded.insert("a.gone".to_string());
        let model = ConfigurationModel::parse(
            document(json!({"a.gone": 1, "a.kept": 2, "[rust]": {"a.gone": 3}})),
            &excluded,
        );

        assert!(!model.has("a.gone"));
        assert_eq!(model.get_override_value("rust", "a.gone"), None);
        assert!(model.raw().contains_key("a.gone"));

        let restored = model.reparse(&BTreeSet::new());
        assert_eq!(restored.get_value("a.gone"), Some(&json!(1)));
    }

    #[test]
    fn test_with_value_builds_new_model() {
        let model = parse(json!({"a.b": 1}));
        let updated = model.with_value("a.c", Some(json!(2)), None, &BTreeSet::new());
        let language = updated.with_value("a.b", Some(json!(5)), Some("rust"), &BTreeSet::new());
        let removed = language.with_value("a.b", None, Some("rust"), &BTreeSet::new());

        assert!(!model.has("a.c"));
        assert_eq!(updated.get_value("a"), Some(&json!({"b": 1, "c": 2})));
        assert_eq!(language.get_override_value("rust", "a.b"), Some(json!(5)));
        assert!(removed.override_identifiers().is_empty());
    }

    #[test]
    fn test_to_record_includes_overrides() {
        let model = parse(json!({"a.b": 1, "[go]": {"a.b": 2}}));
        assert_eq!(model.to_record(), json!({"a": {"b": 1}, "[go]": {"a": {"b": 2}}}));
    }

    #[test]
    fn test_default_model_from_registry() {
        let registry = ConfigurationRegistry::new();
        registry.register_properties(vec![
            ConfigurationProperty::new("a.one", json!(1)),
            ConfigurationProperty::new("a.two", json!("two")),
        ]);
        let mut defaults = Map::new();
        defaults.insert("[rust]".to_string(), json!({"a.one": 10}));
        registry.register_defaults(defaults);

        let model = ConfigurationModel::from_registry(&registry.snapshot());

        assert_eq!(model.get_value("a"), Some(&json!({"one": 1, "two": "two"})));
        assert_eq!(model.get_override_value("rust", "a.one"), Some(json!(10)));
    }

    #[test]
    fn test_scalar_parent_conflict_drops_key() {
        let model = parse(json!({"a": 1, "a.b": 2}));
        assert_eq!(model.keys(), &["a"]);
        assert_eq!(model.get_value("a"), Some(&json!(1)));
    }
}
