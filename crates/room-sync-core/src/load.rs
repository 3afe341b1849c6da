//! The load/snapshot protocol: applying an incoming payload (flat
//! path-keyed or nested tree-shaped) to a JSON state tree, and producing
//! outgoing snapshots from a [`crate::sync_engine::SyncEngine`]'s attached
//! fields.
//!
//! `load` is the inverse of what the sync engine emits: the same
//! `$delete`-sentinel convention the engine's path-form batches use also
//! appears here, in both forms a payload can take. In path form it is the
//! `None` arm of the same `Option<Value>` the engine already produces; in
//! tree form, where there is no separate "delete" channel, it is the
//! literal string [`DELETE_SENTINEL`] appearing as a field's value.

use std::any::Any;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::LoadError;
use crate::path;
use crate::sync_engine::{Batch, SyncEngine};

/// The tree-form sentinel for "remove this key", since a nested object has
/// no separate channel for deletions the way a path-keyed batch does.
pub const DELETE_SENTINEL: &str = "$delete";

fn is_delete_sentinel(value: &Value) -> bool {
    value.as_str() == Some(DELETE_SENTINEL)
}

/// Apply a flat, path-keyed payload (the same shape `SyncEngine` batches
/// are in) to `root`, in order.
pub fn load_paths(root: &mut Value, payload: &Batch) -> Result<(), LoadError> {
    for (path_str, value) in payload {
        match value {
            Some(value) => path::set(root, path_str, value.clone())?,
            None => {
                path::remove(root, path_str)?;
            }
        }
    }
    Ok(())
}

/// Apply a nested tree-form payload to `root`, merging object subtrees
/// key-by-key and replacing arrays and scalars wholesale. A leaf equal to
/// [`DELETE_SENTINEL`] removes that key from its parent instead of setting
/// it.
pub fn load_tree(root: &mut Value, payload: &Value) -> Result<(), LoadError> {
    merge_tree(root, payload);
    Ok(())
}

fn merge_tree(root: &mut Value, incoming: &Value) {
    match incoming {
        Value::Object(incoming_map) => {
            if !root.is_object() {
                *root = Value::Object(serde_json::Map::new());
            }
            let Value::Object(root_map) = root else { unreachable!() };
            for (key, value) in incoming_map {
                if is_delete_sentinel(value) {
                    root_map.shift_remove(key);
                    continue;
                }
                match root_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => merge_tree(existing, value),
                    _ => {
                        root_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        other => *root = other.clone(),
    }
}

/// Construct synced class instances for every entry of every
/// `nested_class`-registered field present in `tree`, using `registry` to
/// look up the constructor for each field's registered class type.
///
/// Returns, per field, the map of entry id to the constructed instance
/// (type-erased, since field types vary per `Syncable` struct); the caller
/// downcasts and wires each instance into the live cell graph (e.g. via
/// `SyncEngine::attach_nested`).
pub fn instantiate_nested(
    schema: &crate::meta::SyncSchema,
    registry: &ClassRegistry,
    tree: &Value,
) -> Result<IndexMap<String, IndexMap<String, Rc<dyn Any>>>, LoadError> {
    let mut result = IndexMap::new();
    for (field_name, meta) in schema_nested_fields(schema) {
        let Some(entries) = tree.get(&field_name).and_then(Value::as_object) else {
            continue;
        };
        let mut instances = IndexMap::new();
        for (key, entry_value) in entries {
            if is_delete_sentinel(entry_value) {
                continue;
            }
            let instance = registry.construct(&meta, key, entry_value)?;
            instances.insert(key.clone(), instance);
        }
        result.insert(field_name, instances);
    }
    Ok(result)
}

fn schema_nested_fields(schema: &crate::meta::SyncSchema) -> Vec<(String, String)> {
    schema
        .synced_fields()
        .chain(schema.persisted_fields())
        .filter_map(|(name, meta)| meta.nested_class.clone().map(|class_type| (name.to_string(), class_type)))
        .collect::<std::collections::BTreeMap<_, _>>()
        .into_iter()
        .collect()
}

/// A registry of constructors for `nested_class`-tagged fields, keyed by
/// the class type name recorded in [`crate::meta::SyncSchema::nested_class`].
/// There is no reflection to recover a concrete Rust type from a string at
/// runtime, so the room shell registers one constructor per class type up
/// front, the explicit analogue of what a decorator-based registry would
/// otherwise infer. Each constructor receives both the entry's key (its id)
/// and its snapshot value, since a freshly reconstructed instance must know
/// its own id before anything else loads into it.
#[derive(Default)]
pub struct ClassRegistry {
    constructors: IndexMap<String, Rc<dyn Fn(&str, &Value) -> Result<Rc<dyn Any>, LoadError>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        class_type: impl Into<String>,
        constructor: impl Fn(&str, &Value) -> Result<Rc<dyn Any>, LoadError> + 'static,
    ) {
        self.constructors.insert(class_type.into(), Rc::new(constructor));
    }

    pub fn construct(&self, class_type: &str, key: &str, value: &Value) -> Result<Rc<dyn Any>, LoadError> {
        let constructor = self
            .constructors
            .get(class_type)
            .ok_or_else(|| LoadError::UnknownClassType { class_type: class_type.to_string() })?;
        constructor(key, value)
    }
}

/// Shallow snapshot of `prefix`'s own synced/persisted fields.
pub fn create_states_snapshot(engine: &SyncEngine, prefix: &str) -> Value {
    engine.snapshot(prefix, false, &|_| true)
}

/// Deep snapshot of `prefix` and everything nested under it, optionally
/// narrowed by `filter` (called with each field name encountered, at every
/// depth; returning `false` excludes that field and its subtree).
pub fn create_states_snapshot_deep(engine: &SyncEngine, prefix: &str, filter: impl Fn(&str) -> bool) -> Value {
    engine.snapshot(prefix, true, &filter)
}

/// Convert a `chrono` date/time into the ISO-8601 string form snapshots use
/// for date-valued fields.
pub fn date_to_iso8601(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_paths_sets_and_deletes() {
        let mut root = json!({"players": {"p1": {"score": 1}}});
        let mut payload: Batch = IndexMap::new();
        payload.insert("players.p1.score".to_string(), Some(json!(5)));
        payload.insert("players.p1.removed_flag".to_string(), None);

        load_paths(&mut root, &payload).unwrap();
        assert_eq!(root["players"]["p1"]["score"], json!(5));
    }

    #[test]
    fn load_tree_merges_nested_objects_and_honors_delete_sentinel() {
        let mut root = json!({"players": {"p1": {"score": 1, "name": "Ada"}}});
        let payload = json!({"players": {"p1": {"score": 2, "name": DELETE_SENTINEL}}});

        load_tree(&mut root, &payload).unwrap();
        assert_eq!(root["players"]["p1"]["score"], json!(2));
        assert!(root["players"]["p1"].get("name").is_none());
    }

    #[test]
    fn load_tree_replaces_arrays_wholesale_rather_than_merging() {
        let mut root = json!({"items": [1, 2, 3]});
        let payload = json!({"items": [9]});
        load_tree(&mut root, &payload).unwrap();
        assert_eq!(root["items"], json!([9]));
    }

    #[test]
    fn class_registry_constructs_registered_type() {
        let mut registry = ClassRegistry::new();
        registry.register("player", |key, value| {
            let name = value.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            Ok(Rc::new(format!("{key}:{name}")) as Rc<dyn Any>)
        });

        let instance = registry.construct("player", "p1", &json!({"name": "Ada"})).unwrap();
        assert_eq!(instance.downcast_ref::<String>().unwrap(), "p1:Ada");

        let err = registry.construct("missing", "p1", &json!({})).unwrap_err();
        assert!(matches!(err, LoadError::UnknownClassType { .. }));
    }

    #[test]
    fn date_to_iso8601_formats_with_millis_and_z() {
        let date = DateTime::parse_from_rfc3339("2026-07-30T12:00:00.500Z").unwrap().with_timezone(&Utc);
        assert_eq!(date_to_iso8601(&date), "2026-07-30T12:00:00.500Z");
    }
}
