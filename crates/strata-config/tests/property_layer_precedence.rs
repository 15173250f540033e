//! Property-based tests for layer precedence and merging

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use strata_config::{
    compare, Configuration, ConfigurationModel, ConfigurationOverrides, ConfigurationProperty,
    ConfigurationRegistry, LayerSet,
};

const KEY: &str = "editor.fontSize";

fn model(entries: Map<String, Value>) -> Arc<ConfigurationModel> {
    Arc::new(ConfigurationModel::parse(entries, &BTreeSet::new()))
}

fn scalar_model(value: Option<i64>) -> Arc<ConfigurationModel> {
    let mut entries = Map::new();
    if let Some(value) = value {
        entries.insert(KEY.to_string(), json!(value));
    }
    model(entries)
}

fn configuration(
    user: Option<i64>,
    workspace: Option<i64>,
    folder: Option<i64>,
    memory: Option<i64>,
) -> Configuration {
    let registry = ConfigurationRegistry::new();
    registry.register_properties(vec![ConfigurationProperty::new(KEY, json!(12))]);
    let registry = registry.snapshot();

    let mut folders = BTreeMap::new();
    folders.insert(PathBuf::from("/w/a"), scalar_model(folder));
    let layers = LayerSet {
        default: Arc::new(ConfigurationModel::from_registry(&registry)),
        user_local: scalar_model(user),
        workspace: Some(scalar_model(workspace)),
        folders,
        memory: scalar_model(memory),
        ..LayerSet::default()
    };
    Configuration::new(registry, layers, true, false)
}

/// Strategy for small nested objects of integers
fn object_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-c]", 0i64..5, 0..3).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(key, value)| (key, json!(value)))
            .collect()
    })
}

proptest! {
    /// Property: the highest layer defining a key wins
    #[test]
    fn prop_highest_layer_wins(
        user in prop::option::of(0i64..100),
        workspace in prop::option::of(0i64..100),
        folder in prop::option::of(0i64..100),
        memory in prop::option::of(0i64..100),
    ) {
        let configuration = configuration(user, workspace, folder, memory);

        let without_resource = memory.or(workspace).or(user).unwrap_or(12);
        prop_assert_eq!(
            configuration.get_value(KEY, &ConfigurationOverrides::none()),
            Some(json!(without_resource))
        );

        let in_folder = memory.or(folder).or(workspace).or(user).unwrap_or(12);
        prop_assert_eq!(
            configuration.get_value(KEY, &ConfigurationOverrides::resource("/w/a/src/lib.rs")),
            Some(json!(in_folder))
        );
    }

    /// Property: object values merge key by key, the upper layer winning on conflicts
    #[test]
    fn prop_objects_merge_recursively(
        lower in object_strategy(),
        upper in object_strategy(),
    ) {
        let registry = ConfigurationRegistry::new();
        registry.register_properties(vec![ConfigurationProperty::new("files.exclude", json!({}))]);
        let registry = registry.snapshot();

        let mut user = Map::new();
        user.insert("files.exclude".to_string(), Value::Object(lower.clone()));
        let mut workspace = Map::new();
        workspace.insert("files.exclude".to_string(), Value::Object(upper.clone()));
        let layers = LayerSet {
            default: Arc::new(ConfigurationModel::from_registry(&registry)),
            user_local: model(user),
            workspace: Some(model(workspace)),
            ..LayerSet::default()
        };
        let configuration = Configuration::new(registry, layers, true, false);

        let mut expected = lower;
        for (key, value) in upper {
            expected.insert(key, value);
        }
        prop_assert_eq!(
            configuration.get_value("files.exclude", &ConfigurationOverrides::none()),
            Some(Value::Object(expected))
        );
    }

    /// Property: a diff reports a key exactly when some effective value moved
    #[test]
    fn prop_diff_matches_effective_change(
        before in prop::option::of(0i64..3),
        after in prop::option::of(0i64..3),
    ) {
        let previous = configuration(before, None, None, None);
        let current = configuration(after, None, None, None);

        let diff = compare(&previous, &current);
        prop_assert_eq!(diff.keys().contains(&KEY.to_string()), before != after);
    }
}
