//! Sync annotations and metadata.
//!
//! There are no field decorators in Rust, so a synced class instance
//! registers its own field metadata explicitly through [`SyncSchema`]'s
//! builder instead of annotating fields in place — the same shape a
//! decorator-based system produces, built by hand. A struct becomes synced
//! by implementing [`Syncable`] and returning a `SyncSchema` describing
//! which of its fields are synced to observers, persisted to storage, or
//! used as the instance's id.

use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::cell::{ArrayCell, ArrayChange, ObjectCell, ObjectChange, ScalarCell};

/// Per-field registration: whether it's synced to observers, persisted to
/// storage, whether it is the instance's id field, and, for fields holding
/// a nested synced class (or collection of them), the registered class type
/// name used to reconstruct it on `load`.
#[derive(Debug, Clone, Default)]
pub struct FieldMeta {
    pub sync: bool,
    pub persist: bool,
    pub is_id: bool,
    pub nested_class: Option<String>,
}

/// The set of field registrations for one `Syncable` type, built once (by
/// convention, in that type's `Syncable::sync_schema`) and reused for every
/// instance.
#[derive(Debug, Clone, Default)]
pub struct SyncSchema {
    fields: IndexMap<String, FieldMeta>,
}

impl SyncSchema {
    pub fn builder() -> SyncSchemaBuilder {
        SyncSchemaBuilder { schema: SyncSchema::default() }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.get(name)
    }

    pub fn id_field(&self) -> Option<&str> {
        self.fields.iter().find(|(_, meta)| meta.is_id).map(|(name, _)| name.as_str())
    }

    pub fn synced_fields(&self) -> impl Iterator<Item = (&str, &FieldMeta)> {
        self.fields.iter().filter(|(_, meta)| meta.sync).map(|(name, meta)| (name.as_str(), meta))
    }

    pub fn persisted_fields(&self) -> impl Iterator<Item = (&str, &FieldMeta)> {
        self.fields.iter().filter(|(_, meta)| meta.persist).map(|(name, meta)| (name.as_str(), meta))
    }
}

/// Builder for [`SyncSchema`]: one chained call per field, no macros
/// required.
pub struct SyncSchemaBuilder {
    schema: SyncSchema,
}

impl SyncSchemaBuilder {
    fn entry(&mut self, name: impl Into<String>) -> &mut FieldMeta {
        self.schema.fields.entry(name.into()).or_default()
    }

    /// Mark `name` as synced to `onSync`-style observers.
    pub fn sync(mut self, name: impl Into<String>) -> Self {
        self.entry(name).sync = true;
        self
    }

    /// Mark `name` as persisted to the shard store.
    pub fn persist(mut self, name: impl Into<String>) -> Self {
        self.entry(name).persist = true;
        self
    }

    /// Mark `name` as both synced and persisted.
    pub fn sync_and_persist(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.entry(name.clone()).sync = true;
        self.entry(name).persist = true;
        self
    }

    /// Mark `name` as the instance's id field.
    pub fn id(mut self, name: impl Into<String>) -> Self {
        self.entry(name).is_id = true;
        self
    }

    /// Mark `name` as holding a nested synced class instance (or
    /// collection of them) even when `name` is not itself one of this
    /// type's `sync_fields()` (a hand-managed `IndexMap` of attached
    /// instances, say, rather than a cell), registered under `class_type`
    /// for `load` reconstruction.
    pub fn nested_class(mut self, name: impl Into<String>, class_type: impl Into<String>) -> Self {
        self.entry(name).nested_class = Some(class_type.into());
        self
    }

    pub fn build(self) -> SyncSchema {
        self.schema
    }
}

/// A class instance whose fields can be walked by the sync engine and the
/// load/snapshot protocol.
pub trait Syncable {
    /// The field registrations for this type. Expected to be cheap and
    /// deterministic (typically a `const fn`-free builder chain run once
    /// per call); the sync engine calls it once per instance it attaches.
    fn sync_schema() -> SyncSchema;

    /// This instance's id, read from its registered id field.
    fn id(&self) -> String;
}

/// One field-level change destined for the sync engine's batch, expressed
/// relative to the field it came from: `suffix` is empty for a scalar set
/// or a bulk array/object replace, or a key/index for a targeted array or
/// object mutation. `value: None` is the `$delete` sentinel.
#[derive(Debug, Clone)]
pub struct PathValue {
    pub suffix: String,
    pub value: Option<Value>,
}

impl PathValue {
    fn value(suffix: impl Into<String>, value: Value) -> Self {
        Self { suffix: suffix.into(), value: Some(value) }
    }

    fn delete(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into(), value: None }
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Derives the per-index `PathValue`s for a `shift`/`unshift`/`splice`
/// mutation, given the removed count, the inserted items, and the array's
/// contents after the mutation already landed.
///
/// A pure removal (`inserted` empty) walks the removed range back to front:
/// each delete still lands on the element meant to go, since removing a
/// higher index first doesn't renumber the lower ones still waiting. A pure
/// insertion or a mixed replace first grows (pushing the shifted tail to its
/// new end positions) or shrinks (trimming the tail) the array to its final
/// length, then overwrites every index from the mutation's start onward with
/// its final value — which also covers the positions the growth step just
/// pushed, a harmless repeat. Both halves only ever call `set`-at-existing-
/// index, `set`-at-current-length (push), or `remove`-at-existing-index,
/// the same primitives `path::set`/`path::remove` support.
fn array_splice_path_values<T: Clone + Serialize>(removed_len: usize, inserted: &[T], index: usize, final_items: &[T]) -> Vec<PathValue> {
    let inserted_len = inserted.len();
    if removed_len == 0 && inserted_len == 0 {
        return Vec::new();
    }
    if inserted_len == 0 {
        return (index..index + removed_len).rev().map(|i| PathValue::delete(i.to_string())).collect();
    }

    let final_len = final_items.len();
    let old_len = final_len + removed_len - inserted_len;
    let mut out = Vec::new();
    if inserted_len > removed_len {
        for new_index in old_len..final_len {
            out.push(PathValue::value(new_index.to_string(), to_value(final_items[new_index].clone())));
        }
    } else if removed_len > inserted_len {
        for old_index in (final_len..old_len).rev() {
            out.push(PathValue::delete(old_index.to_string()));
        }
    }
    for idx in index..final_len {
        out.push(PathValue::value(idx.to_string(), to_value(final_items[idx].clone())));
    }
    out
}

/// A cell that the sync engine can snapshot and watch, expressed generically
/// over what kind of cell it is. Implemented for `ScalarCell`, `ArrayCell`
/// and `ObjectCell`; the engine holds fields as `Box<dyn SyncField>` so a
/// `Syncable` instance's field list can mix cell kinds.
pub trait SyncField {
    fn snapshot(&self) -> Value;
    fn watch(&self, on_change: Rc<dyn Fn(Vec<PathValue>)>) -> Box<dyn Any>;
}

impl<T: Clone + Serialize + 'static> SyncField for ScalarCell<T> {
    fn snapshot(&self) -> Value {
        to_value(self.peek())
    }

    fn watch(&self, on_change: Rc<dyn Fn(Vec<PathValue>)>) -> Box<dyn Any> {
        Box::new(self.subscribe(move |v| on_change(vec![PathValue::value("", to_value(v))])))
    }
}

impl<T: Clone + Serialize + 'static> SyncField for ArrayCell<T> {
    fn snapshot(&self) -> Value {
        to_value(self.current())
    }

    fn watch(&self, on_change: Rc<dyn Fn(Vec<PathValue>)>) -> Box<dyn Any> {
        let cell = self.clone();
        Box::new(self.subscribe(move |change| {
            let changes = match change {
                ArrayChange::Init(items) => vec![PathValue::value("", to_value(items))],
                ArrayChange::Push(value) => {
                    let index = cell.current().len().saturating_sub(1);
                    vec![PathValue::value(index.to_string(), to_value(value))]
                }
                ArrayChange::Pop(_) => vec![PathValue::delete(cell.current().len().to_string())],
                ArrayChange::Shift(_) => array_splice_path_values(1, &[], 0, &cell.current()),
                ArrayChange::Unshift(value) => array_splice_path_values(0, std::slice::from_ref(&value), 0, &cell.current()),
                ArrayChange::Set { index, value } => vec![PathValue::value(index.to_string(), to_value(value))],
                ArrayChange::Splice { index, removed, inserted } => {
                    array_splice_path_values(removed.len(), &inserted, index, &cell.current())
                }
                ArrayChange::Clear => vec![PathValue::value("", Value::Array(Vec::new()))],
            };
            on_change(changes);
        }))
    }
}

impl<T: Clone + Serialize + 'static> SyncField for ObjectCell<T> {
    fn snapshot(&self) -> Value {
        let map: IndexMap<String, Value> = self.current().into_iter().map(|(k, v)| (k, to_value(v))).collect();
        to_value(map)
    }

    fn watch(&self, on_change: Rc<dyn Fn(Vec<PathValue>)>) -> Box<dyn Any> {
        Box::new(self.subscribe(move |change| {
            let changes = match change {
                ObjectChange::Init(fields) => {
                    let map: IndexMap<String, Value> = fields.into_iter().map(|(k, v)| (k, to_value(v))).collect();
                    vec![PathValue::value("", to_value(map))]
                }
                ObjectChange::Set { key, value } => vec![PathValue::value(key, to_value(value))],
                ObjectChange::Remove { key } => vec![PathValue::delete(key)],
            };
            on_change(changes);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_builder_tracks_sync_persist_and_id() {
        let schema = SyncSchema::builder()
            .id("id")
            .sync_and_persist("name")
            .persist("secret")
            .build();

        assert_eq!(schema.id_field(), Some("id"));
        assert!(schema.field("name").unwrap().sync);
        assert!(schema.field("name").unwrap().persist);
        assert!(!schema.field("secret").unwrap().sync);
        assert_eq!(schema.synced_fields().count(), 1);
        assert_eq!(schema.persisted_fields().count(), 2);
    }

    #[test]
    fn scalar_cell_watch_reports_root_replace() {
        let cell = ScalarCell::new(1);
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _guard = SyncField::watch(&cell, Rc::new(move |changes| seen2.borrow_mut().extend(changes)));

        cell.set(2);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].suffix, "");
        assert_eq!(seen[0].value, Some(Value::from(2)));
    }

    #[test]
    fn array_cell_watch_derives_index_paths() {
        let array = ArrayCell::new(vec![1, 2]);
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _guard = SyncField::watch(&array, Rc::new(move |changes| seen2.borrow_mut().extend(changes)));

        array.push(3);
        array.pop();

        let seen = seen.borrow();
        assert_eq!(seen[0].suffix, "2");
        assert_eq!(seen[0].value, Some(Value::from(3)));
        assert_eq!(seen[1].suffix, "2");
        assert_eq!(seen[1].value, None);
    }

    #[test]
    fn array_cell_shift_emits_single_delete_at_zero() {
        let array = ArrayCell::new(vec![1, 2]);
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _guard = SyncField::watch(&array, Rc::new(move |changes| seen2.borrow_mut().extend(changes)));

        array.shift();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].suffix, "0");
        assert_eq!(seen[0].value, None);
    }

    #[test]
    fn array_cell_unshift_emits_add_at_zero_and_reindexes_tail() {
        let array = ArrayCell::new(vec![1, 2]);
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _guard = SyncField::watch(&array, Rc::new(move |changes| seen2.borrow_mut().extend(changes)));

        array.unshift(0);

        let seen = seen.borrow();
        let by_suffix: IndexMap<String, Option<Value>> =
            seen.iter().map(|pv| (pv.suffix.clone(), pv.value.clone())).collect();
        assert_eq!(by_suffix.get("0"), Some(&Some(Value::from(0))));
        assert_eq!(by_suffix.get("1"), Some(&Some(Value::from(1))));
        assert_eq!(by_suffix.get("2"), Some(&Some(Value::from(2))));
    }

    #[test]
    fn array_cell_splice_remove_only_emits_descending_deletes() {
        let array = ArrayCell::new(vec!['a', 'b', 'c', 'd', 'e']);
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _guard = SyncField::watch(&array, Rc::new(move |changes| seen2.borrow_mut().extend(changes)));

        array.splice(1, 2, Vec::new());

        assert_eq!(array.current(), vec!['a', 'd', 'e']);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].suffix, "2");
        assert_eq!(seen[0].value, None);
        assert_eq!(seen[1].suffix, "1");
        assert_eq!(seen[1].value, None);
    }

    #[test]
    fn array_cell_splice_noop_emits_nothing() {
        let array = ArrayCell::new(vec![1, 2]);
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _guard = SyncField::watch(&array, Rc::new(move |changes| seen2.borrow_mut().extend(changes)));

        array.splice(1, 0, Vec::new());

        assert!(seen.borrow().is_empty());
    }
}
