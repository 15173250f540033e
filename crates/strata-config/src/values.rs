//! Helpers over nested JSON value trees
//!
//! Settings documents store dotted keys (`"editor.font.size": 12`). Models
//! expand them into nested objects so that a parent section can be read as a
//! whole and merged key by key.

use serde_json::{Map, Value};
use tracing::warn;

/// Insert `value` at the dotted `key`, creating intermediate objects
///
/// Returns `false` (and leaves the tree untouched) when a scalar already sits
/// on the path.
pub fn add_to_value_tree(tree: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    let segments: Vec<&str> = key.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return false,
    };

    let mut current = tree;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(child) => current = child,
            _ => {
                warn!(key = %key, segment = %segment, "Ignoring setting, parent is not an object");
                return false;
            }
        }
    }

    current.insert(last.to_string(), value);
    true
}

/// Remove the dotted `key`, pruning parents left empty
pub fn remove_from_value_tree(tree: &mut Map<String, Value>, key: &str) -> Option<Value> {
    let segments: Vec<&str> = key.split('.').collect();
    remove_segments(tree, &segments)
}

fn remove_segments(tree: &mut Map<String, Value>, segments: &[&str]) -> Option<Value> {
    match segments {
        [] => None,
        [last] => tree.remove(*last),
        [first, rest @ ..] => {
            let child = match tree.get_mut(*first) {
                Some(Value::Object(child)) => child,
                _ => return None,
            };
            let removed = remove_segments(child, rest);
            if removed.is_some() && child.is_empty() {
                tree.remove(*first);
            }
            removed
        }
    }
}

/// Look up the dotted `key` in the tree
pub fn get_value_in_tree<'a>(tree: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let first = segments.next()?;
    let mut current = tree.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Merge `add` into `base`
///
/// Objects merge key by key (recursively); any other value in `add` replaces
/// the one in `base`.
pub fn merge_values(base: &mut Value, add: &Value) {
    match (base, add) {
        (Value::Object(base_map), Value::Object(add_map)) => merge_maps(base_map, add_map),
        (base, add) => *base = add.clone(),
    }
}

/// Merge the entries of `add` into `base`, recursing into shared objects
pub fn merge_maps(base: &mut Map<String, Value>, add: &Map<String, Value>) {
    for (key, value) in add {
        match base.get_mut(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                merge_values(existing, value)
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Set or remove a setting in a flat settings document
///
/// Documents normally hold dotted keys at the top level, but a key may also
/// live inside an object written under one of its parents. Descendant
/// entries are dropped when a key is replaced as a whole.
pub fn set_flat_value(document: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    document.retain(|existing, _| !is_parent_key(key, existing));

    let ancestor = document
        .keys()
        .find(|existing| is_parent_key(existing, key))
        .cloned();
    if let Some(ancestor) = ancestor {
        if let Some(Value::Object(parent)) = document.get_mut(&ancestor) {
            let relative = &key[ancestor.len() + 1..];
            match value {
                Some(value) => {
                    add_to_value_tree(parent, relative, value);
                }
                None => {
                    remove_from_value_tree(parent, relative);
                    if parent.is_empty() {
                        document.remove(&ancestor);
                    }
                }
            }
            return;
        }
    }

    match value {
        Some(value) => {
            document.insert(key.to_string(), value);
        }
        None => {
            document.remove(key);
        }
    }
}

/// Returns true when `a` equals `b` or one is a dotted parent of the other
pub fn keys_related(a: &str, b: &str) -> bool {
    a == b || is_parent_key(a, b) || is_parent_key(b, a)
}

/// Returns true when `parent` is a strict dotted prefix of `child`
pub fn is_parent_key(parent: &str, child: &str) -> bool {
    child.len() > parent.len()
        && child.starts_with(parent)
        && child.as_bytes()[parent.len()] == b'.'
}
