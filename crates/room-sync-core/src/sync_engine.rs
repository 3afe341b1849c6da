//! The sync engine: attaches to a `Syncable` instance's cells, derives
//! path-keyed change records from their mutations, and accumulates them
//! into `onSync`/`onPersist` batches for the room shell to flush on its own
//! schedule.
//!
//! A batch is an [`IndexMap`] rather than a `HashMap` for two reasons that
//! both come straight from the ordering invariant: within one flush, a path
//! must appear at most once (a later change to the same path overwrites the
//! earlier one in place, it does not reorder it), and a container's own
//! entry must appear before any of its children's (attaching a parent
//! records its fields before a nested child is ever attached under it, and
//! `IndexMap::insert` on an existing key updates the value without moving
//! the key).
//!
//! Nested class instances are not discovered by reflection — there is none
//! to use — they are attached explicitly by the owning code via
//! [`SyncEngine::attach_nested`] whenever a collection gains an entry, and
//! torn down via [`SyncEngine::detach_and_delete`] when it loses one. This
//! mirrors the explicit, decorator-less wiring [`crate::meta::SyncSchema`]
//! already uses for field registration. Attaching a nested instance for the
//! first time also records the *empty shape* of its containing field in
//! the same sync batch, ahead of the child's own entries, so a receiver
//! applying the batch in order resets the collection before populating it.
//!
//! Persisted entries are keyed by *shard root*, not by the full field path:
//! every field an attachment owns collapses onto that attachment's own
//! prefix (or [`crate::storage::ROOT_SHARD`] for the room root), since one
//! whole-instance snapshot is persisted per shard rather than one storage
//! write per field.

use std::any::Any;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::meta::{PathValue, Syncable};

/// A path-keyed change batch. `None` is the `$delete` sentinel.
pub type Batch = IndexMap<String, Option<Value>>;

/// A `Syncable` type that can additionally enumerate its own fields as
/// type-erased [`crate::meta::SyncField`]s, so the engine can snapshot and
/// watch them without knowing the concrete cell types.
pub trait SyncAttach: Syncable {
    fn sync_fields(&self) -> Vec<(String, Box<dyn crate::meta::SyncField>)>;
}

struct Attachment {
    _guards: Vec<Box<dyn Any>>,
    /// Field name plus the field itself, kept around so
    /// `SyncEngine::snapshot` can re-read a field's current value at any
    /// later time, not just the moment it was attached.
    fields: Vec<(String, Box<dyn crate::meta::SyncField>)>,
    nested: std::cell::RefCell<Vec<String>>,
}

/// Attaches to `Syncable` instances and accumulates path-keyed batches for
/// `onSync`/`onPersist` until the room shell flushes them.
#[derive(Default)]
pub struct SyncEngine {
    sync_pending: std::cell::RefCell<Batch>,
    persist_pending: std::cell::RefCell<Batch>,
    attachments: std::cell::RefCell<IndexMap<String, Attachment>>,
}

fn join_path(prefix: &str, field: &str, suffix: &str) -> String {
    let base = if prefix.is_empty() { field.to_string() } else { format!("{prefix}.{field}") };
    if suffix.is_empty() { base } else { format!("{base}.{suffix}") }
}

/// The persistence shard an attachment at `prefix` belongs to: the room
/// root for the empty prefix, or the attachment's own prefix otherwise
/// (which, for a nested attachment, is already exactly the `field.key`
/// shard name `attach_nested` gave it).
fn shard_root(prefix: &str) -> String {
    if prefix.is_empty() { crate::storage::ROOT_SHARD.to_string() } else { prefix.to_string() }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to `instance` under `prefix` (`""` for the room root). Records
    /// every synced/persisted field's current value into the pending
    /// batches immediately, then subscribes each field so further
    /// mutations are recorded too.
    pub fn attach<S: SyncAttach>(&self, prefix: impl Into<String>, instance: &S) {
        self.attach_with_transforms(prefix, instance, &IndexMap::new())
    }

    /// Like [`SyncEngine::attach`], but `transforms` lets the caller mask or
    /// reshape a field's value before it lands in the *sync* batch (the
    /// persist batch always receives the untransformed value). Keyed by
    /// field name.
    pub fn attach_with_transforms<S: SyncAttach>(
        &self,
        prefix: impl Into<String>,
        instance: &S,
        transforms: &IndexMap<String, Rc<dyn Fn(Value) -> Value>>,
    ) {
        let prefix = prefix.into();
        let schema = S::sync_schema();
        let mut guards: Vec<Box<dyn Any>> = Vec::new();
        let mut fields_store: Vec<(String, Box<dyn crate::meta::SyncField>)> = Vec::new();

        for (field_name, field) in instance.sync_fields() {
            let Some(meta) = schema.field(&field_name) else {
                tracing::warn!(field = %field_name, "sync_fields() returned a field with no schema entry, skipping");
                continue;
            };
            if !meta.sync && !meta.persist {
                continue;
            }

            let transform = transforms.get(&field_name).cloned();
            let sync = meta.sync;
            let persist = meta.persist;
            let path_prefix = prefix.clone();
            let field_for_watch = field_name.clone();

            if sync || persist {
                let initial = field.snapshot();
                self.record(&path_prefix, &field_name, "", Some(apply(&transform, initial.clone())), Some(initial), sync, persist);
            }

            if !sync && !persist {
                continue;
            }

            // SAFETY-free note: the closure below only ever runs while
            // `self` (the SyncEngine) is alive, because the guard keeping
            // the subscription alive is owned by `self.attachments`, which
            // is what we're populating right now. `self` therefore cannot
            // be dropped while this closure could still fire.
            let self_ptr: *const SyncEngine = self;
            let guard = field.watch(Rc::new(move |changes: Vec<PathValue>| {
                // SAFETY: see note above.
                let engine = unsafe { &*self_ptr };
                for change in changes {
                    match change.value {
                        Some(value) => {
                            let sync_value = if sync { Some(apply(&transform, value.clone())) } else { None };
                            let persist_value = if persist { Some(value) } else { None };
                            engine.record(&path_prefix, &field_for_watch, &change.suffix, sync_value, persist_value, sync, persist);
                        }
                        None => engine.record_delete(&path_prefix, &field_for_watch, &change.suffix, sync, persist),
                    }
                }
            }));
            guards.push(guard);
            fields_store.push((field_name, field));
        }

        self.attachments.borrow_mut().insert(
            prefix.clone(),
            Attachment { _guards: guards, fields: fields_store, nested: std::cell::RefCell::new(Vec::new()) },
        );
    }

    /// Build a point-in-time JSON object of `prefix`'s own fields. With
    /// `deep`, recursively folds in every nested attachment's snapshot
    /// (keyed by the nested path's final segment, i.e. the collection
    /// entry's id). `filter` is consulted with each field name; returning
    /// `false` excludes that field (and, for a nested attachment reached
    /// through it, the whole subtree).
    pub fn snapshot(&self, prefix: &str, deep: bool, filter: &dyn Fn(&str) -> bool) -> Value {
        let attachments = self.attachments.borrow();
        let Some(attachment) = attachments.get(prefix) else {
            return Value::Object(serde_json::Map::new());
        };

        let mut out = serde_json::Map::new();
        for (name, field) in &attachment.fields {
            if filter(name) {
                out.insert(name.clone(), field.snapshot());
            }
        }

        if deep {
            let nested_prefixes: Vec<String> = attachment.nested.borrow().clone();
            for nested_prefix in nested_prefixes {
                let rest = if prefix.is_empty() {
                    nested_prefix.as_str()
                } else {
                    nested_prefix.strip_prefix(prefix).and_then(|r| r.strip_prefix('.')).unwrap_or(&nested_prefix)
                };
                let Some((field_name, key)) = rest.split_once('.') else { continue };
                if !filter(field_name) {
                    continue;
                }
                let child_value = self.snapshot(&nested_prefix, true, filter);
                let entry = out.entry(field_name.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(map) = entry {
                    map.insert(key.to_string(), child_value);
                }
            }
        }

        Value::Object(out)
    }

    /// Attach a nested class instance at `parent_prefix.field.key`, and
    /// register it so [`SyncEngine::detach`]/[`SyncEngine::detach_and_delete`]
    /// on the parent cascades to it. Also records the containing field's
    /// empty shape (`{}`) into the pending sync batch, ahead of the child's
    /// own entries, so a receiver resets the collection before populating it.
    pub fn attach_nested<S: SyncAttach>(&self, parent_prefix: &str, field: &str, key: &str, instance: &S) {
        let container_path =
            if parent_prefix.is_empty() { field.to_string() } else { format!("{parent_prefix}.{field}") };
        self.sync_pending.borrow_mut().insert(container_path, Some(Value::Object(serde_json::Map::new())));

        let nested_prefix = join_path(parent_prefix, field, key);
        self.attach(nested_prefix.clone(), instance);
        if let Some(parent) = self.attachments.borrow().get(parent_prefix) {
            parent.nested.borrow_mut().push(nested_prefix);
        }
    }

    /// Detach `prefix` and everything nested under it, releasing every
    /// subscription. Does not record any change (use
    /// [`SyncEngine::detach_and_delete`] for a collection entry removal).
    pub fn detach(&self, prefix: &str) {
        let nested = self
            .attachments
            .borrow_mut()
            .shift_remove(prefix)
            .map(|attachment| attachment.nested.into_inner())
            .unwrap_or_default();
        for child in nested {
            self.detach(&child);
        }
    }

    /// Detach `prefix` (and its nested attachments) and record a `$delete`
    /// for `prefix` itself in both pending batches, as when a collection
    /// entry is removed.
    pub fn detach_and_delete(&self, prefix: &str) {
        self.detach(prefix);
        self.sync_pending.borrow_mut().insert(prefix.to_string(), None);
        self.persist_pending.borrow_mut().insert(shard_root(prefix), None);
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        prefix: &str,
        field: &str,
        suffix: &str,
        sync_value: Option<Value>,
        persist_value: Option<Value>,
        sync: bool,
        persist: bool,
    ) {
        if sync {
            if let Some(value) = sync_value {
                let path = join_path(prefix, field, suffix);
                self.sync_pending.borrow_mut().insert(path, Some(value));
            }
        }
        if persist {
            if let Some(value) = persist_value {
                self.persist_pending.borrow_mut().insert(shard_root(prefix), Some(value));
            }
        }
    }

    fn record_delete(&self, prefix: &str, field: &str, suffix: &str, sync: bool, persist: bool) {
        if sync {
            let path = join_path(prefix, field, suffix);
            self.sync_pending.borrow_mut().insert(path, None);
        }
        if persist {
            self.persist_pending.borrow_mut().insert(shard_root(prefix), None);
        }
    }

    pub fn has_pending_sync(&self) -> bool {
        !self.sync_pending.borrow().is_empty()
    }

    pub fn has_pending_persist(&self) -> bool {
        !self.persist_pending.borrow().is_empty()
    }

    /// Drain and return the pending sync batch.
    pub fn take_sync_batch(&self) -> Batch {
        std::mem::take(&mut *self.sync_pending.borrow_mut())
    }

    /// Drain and return the pending persist batch.
    pub fn take_persist_batch(&self) -> Batch {
        std::mem::take(&mut *self.persist_pending.borrow_mut())
    }
}

fn apply(transform: &Option<Rc<dyn Fn(Value) -> Value>>, value: Value) -> Value {
    match transform {
        Some(f) => f(value),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ScalarCell;
    use crate::meta::SyncSchema;

    struct Player {
        id: String,
        name: ScalarCell<String>,
        score: ScalarCell<i64>,
    }

    impl Syncable for Player {
        fn sync_schema() -> SyncSchema {
            SyncSchema::builder().id("id").sync_and_persist("name").sync("score").build()
        }

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    impl SyncAttach for Player {
        fn sync_fields(&self) -> Vec<(String, Box<dyn crate::meta::SyncField>)> {
            vec![
                ("name".to_string(), Box::new(self.name.clone())),
                ("score".to_string(), Box::new(self.score.clone())),
            ]
        }
    }

    #[test]
    fn attach_records_initial_snapshot() {
        let engine = SyncEngine::new();
        let player = Player { id: "p1".into(), name: ScalarCell::new("Ada".into()), score: ScalarCell::new(0) };

        engine.attach("players.p1", &player);
        let batch = engine.take_sync_batch();

        assert_eq!(batch.get("players.p1.name"), Some(&Some(Value::from("Ada"))));
        assert_eq!(batch.get("players.p1.score"), Some(&Some(Value::from(0))));
    }

    #[test]
    fn mutation_after_attach_lands_in_next_batch() {
        let engine = SyncEngine::new();
        let player = Player { id: "p1".into(), name: ScalarCell::new("Ada".into()), score: ScalarCell::new(0) };
        engine.attach("players.p1", &player);
        engine.take_sync_batch();

        player.score.set(10);
        let batch = engine.take_sync_batch();
        assert_eq!(batch.get("players.p1.score"), Some(&Some(Value::from(10))));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn detach_and_delete_stops_further_updates_and_marks_path_deleted() {
        let engine = SyncEngine::new();
        let player = Player { id: "p1".into(), name: ScalarCell::new("Ada".into()), score: ScalarCell::new(0) };
        engine.attach_nested("", "players", "p1", &player);
        engine.take_sync_batch();

        engine.detach_and_delete("players.p1");
        let batch = engine.take_sync_batch();
        assert_eq!(batch.get("players.p1"), Some(&None));

        player.score.set(99);
        assert!(!engine.has_pending_sync());
    }

    #[test]
    fn only_persisted_fields_reach_the_persist_batch() {
        let engine = SyncEngine::new();
        let player = Player { id: "p1".into(), name: ScalarCell::new("Ada".into()), score: ScalarCell::new(0) };
        engine.attach("players.p1", &player);
        let persist_batch = engine.take_persist_batch();

        // "name" is persisted, "score" is sync-only, so the attachment's
        // one shard ("players.p1") goes dirty from "name" alone.
        assert!(persist_batch.contains_key("players.p1"));
        assert_eq!(persist_batch.len(), 1);
    }

    struct FullyPersisted {
        id: String,
        a: ScalarCell<i64>,
        b: ScalarCell<i64>,
    }

    impl Syncable for FullyPersisted {
        fn sync_schema() -> SyncSchema {
            SyncSchema::builder().id("id").sync_and_persist("a").sync_and_persist("b").build()
        }

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    impl SyncAttach for FullyPersisted {
        fn sync_fields(&self) -> Vec<(String, Box<dyn crate::meta::SyncField>)> {
            vec![("a".to_string(), Box::new(self.a.clone())), ("b".to_string(), Box::new(self.b.clone()))]
        }
    }

    #[test]
    fn persisted_fields_of_one_attachment_collapse_onto_one_shard() {
        let engine = SyncEngine::new();
        let entity = FullyPersisted { id: "e1".into(), a: ScalarCell::new(1), b: ScalarCell::new(2) };
        engine.attach_nested("", "entities", "e1", &entity);
        engine.take_persist_batch();

        entity.a.set(10);
        entity.b.set(20);
        let persist_batch = engine.take_persist_batch();

        assert_eq!(persist_batch.len(), 1);
        assert!(persist_batch.contains_key("entities.e1"));
    }

    #[test]
    fn transform_masks_sync_value_but_not_persist_value() {
        let engine = SyncEngine::new();
        let player = Player { id: "p1".into(), name: ScalarCell::new("secret".into()), score: ScalarCell::new(0) };
        let mut transforms: IndexMap<String, Rc<dyn Fn(Value) -> Value>> = IndexMap::new();
        transforms.insert("name".to_string(), Rc::new(|_| Value::from("[redacted]")));

        engine.attach_with_transforms("players.p1", &player, &transforms);
        let sync_batch = engine.take_sync_batch();
        let persist_batch = engine.take_persist_batch();

        assert_eq!(sync_batch.get("players.p1.name"), Some(&Some(Value::from("[redacted]"))));
        assert_eq!(persist_batch.get("players.p1"), Some(&Some(Value::from("secret"))));
    }

    #[test]
    fn attach_nested_records_container_shape_before_child_entries() {
        let engine = SyncEngine::new();
        let player = Player { id: "id".into(), name: ScalarCell::new("Ada".into()), score: ScalarCell::new(10) };

        engine.attach_nested("", "nested", "id", &player);
        let batch = engine.take_sync_batch();

        let keys: Vec<&str> = batch.keys().map(String::as_str).collect();
        let container_pos = keys.iter().position(|k| *k == "nested").unwrap();
        let child_pos = keys.iter().position(|k| *k == "nested.id.name").unwrap();
        assert!(container_pos < child_pos);
        assert_eq!(batch.get("nested"), Some(&Some(Value::Object(serde_json::Map::new()))));
    }
}
