//! A small reference room: a couple of players with a name and a score,
//! wired into a [`SyncEngine`] and persisted through a
//! [`room_sync_core::Storage`]. Exists to give `main.rs` something real to
//! flush on a timer; not meant to be a general-purpose room framework.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use room_sync_core::path;
use room_sync_core::storage::{Storage, ROOT_SHARD};
use room_sync_core::{
    ClassRegistry, LoadError, ScalarCell, StorageError, SyncAttach, SyncEngine, SyncField, SyncSchema, Syncable,
};
use serde_json::Value;

pub struct Player {
    pub id: String,
    pub name: ScalarCell<String>,
    pub score: ScalarCell<i64>,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: ScalarCell::new(name.into()), score: ScalarCell::new(0) }
    }

    pub fn from_snapshot(id: impl Into<String>, value: &Value) -> Self {
        let name = value.get("name").and_then(Value::as_str).unwrap_or("unnamed").to_string();
        let score = value.get("score").and_then(Value::as_i64).unwrap_or(0);
        Self { id: id.into(), name: ScalarCell::new(name), score: ScalarCell::new(score) }
    }
}

impl Syncable for Player {
    fn sync_schema() -> SyncSchema {
        SyncSchema::builder().id("id").sync_and_persist("name").sync_and_persist("score").build()
    }

    fn id(&self) -> String {
        self.id.clone()
    }
}

impl SyncAttach for Player {
    fn sync_fields(&self) -> Vec<(String, Box<dyn SyncField>)> {
        vec![
            ("name".to_string(), Box::new(self.name.clone())),
            ("score".to_string(), Box::new(self.score.clone())),
        ]
    }
}

/// The room root: a name and a keyed collection of players. `players` is
/// not itself a cell (a room's top-level collections are managed directly
/// rather than through `ObjectCell`, since each entry is its own attached
/// `Syncable` instance, not a plain JSON value) — entries are attached to
/// the engine individually via `SyncEngine::attach_nested`.
pub struct Room {
    pub name: ScalarCell<String>,
    pub players: RefCell<IndexMap<String, Rc<Player>>>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: ScalarCell::new(name.into()), players: RefCell::new(IndexMap::new()) }
    }

    /// Attach the room root and every already-present player to `engine`.
    pub fn attach(&self, engine: &SyncEngine) {
        engine.attach("", self);
        for (id, player) in self.players.borrow().iter() {
            engine.attach_nested("", "players", id, player.as_ref());
        }
    }

    pub fn add_player(&self, engine: &SyncEngine, player: Player) {
        let id = player.id.clone();
        let player = Rc::new(player);
        engine.attach_nested("", "players", &id, player.as_ref());
        self.players.borrow_mut().insert(id, player);
    }

    pub fn remove_player(&self, engine: &SyncEngine, id: &str) {
        engine.detach_and_delete(&format!("players.{id}"));
        self.players.borrow_mut().shift_remove(id);
    }
}

impl Syncable for Room {
    fn sync_schema() -> SyncSchema {
        SyncSchema::builder()
            .sync_and_persist("name")
            .nested_class("players", "Player")
            .build()
    }

    fn id(&self) -> String {
        "room".to_string()
    }
}

impl SyncAttach for Room {
    fn sync_fields(&self) -> Vec<(String, Box<dyn SyncField>)> {
        vec![("name".to_string(), Box::new(self.name.clone()))]
    }
}

/// The class-type registry the room shell hands to [`room_sync_core::load`]
/// so a booting room can reconstruct `players` entries from storage without
/// Rust reflection. One constructor per `nested_class` name `Room`'s schema
/// declares.
pub fn class_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry.register("Player", |key, value| Ok(Rc::new(Player::from_snapshot(key, value)) as Rc<dyn Any>));
    registry
}

/// Write every dirty shard in a drained `onPersist` batch: a present entry
/// re-snapshots its prefix and writes the shard, a `$delete` entry removes
/// it. The freshly taken snapshot, not the batch's own hint value, is what
/// actually lands in storage — the hint value exists only so a caller that
/// doesn't need a fresh read can act on it directly.
pub fn flush_persist_batch(
    engine: &SyncEngine,
    storage: &dyn Storage,
    batch: room_sync_core::Batch,
) -> Result<(), StorageError> {
    for (shard, value) in batch {
        match value {
            Some(_) => {
                let prefix = if shard == ROOT_SHARD { "" } else { shard.as_str() };
                let snapshot = room_sync_core::create_states_snapshot(engine, prefix);
                storage.put(&shard, snapshot)?;
            }
            None => storage.remove(&shard)?,
        }
    }
    Ok(())
}

/// Compose the room's persisted shards (the root shard plus one shard per
/// collection entry) into a single tree by reading the root and every other
/// shard and folding each one in with `path::set(root, key, value)`.
pub fn compose_tree_from_storage(storage: &dyn Storage) -> Result<Value, StorageError> {
    let mut tree = storage.get(ROOT_SHARD)?.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    for shard in storage.list()? {
        if shard == ROOT_SHARD {
            continue;
        }
        if let Some(value) = storage.get(&shard)? {
            path::set(&mut tree, &shard, value).expect("storage shard keys never contain forbidden segments");
        }
    }
    Ok(tree)
}

/// Reconstruct a `Room` from a composed storage tree: the root fields load
/// directly, and each `players` entry is instantiated through
/// `class_registry()` via [`room_sync_core::load::instantiate_nested`].
pub fn room_from_tree(tree: &Value, registry: &ClassRegistry) -> Result<Room, LoadError> {
    let name = tree.get("name").and_then(Value::as_str).unwrap_or("Room").to_string();
    let room = Room::new(name);

    let nested = room_sync_core::load::instantiate_nested(&Room::sync_schema(), registry, tree)?;
    if let Some(players) = nested.get("players") {
        for (id, instance) in players {
            let player = instance.clone().downcast::<Player>().map_err(|_| LoadError::InvalidValue {
                path: format!("players.{id}"),
                message: "registered constructor for \"Player\" did not produce a Player instance".to_string(),
            })?;
            room.players.borrow_mut().insert(id.clone(), player);
        }
    }
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaching_room_records_root_and_existing_players() {
        let engine = SyncEngine::new();
        let room = Room::new("Lobby");
        room.add_player(&engine, Player::new("p1", "Ada"));
        engine.take_sync_batch();

        let room2 = Room::new("Lobby 2");
        room2.add_player(&engine, Player::new("p2", "Lin"));
        room2.attach(&engine);
        let batch = engine.take_sync_batch();

        assert!(batch.contains_key("name"));
        assert!(batch.contains_key("players.p2.name"));
    }

    #[test]
    fn remove_player_marks_deletion_and_detaches() {
        let engine = SyncEngine::new();
        let room = Room::new("Lobby");
        room.add_player(&engine, Player::new("p1", "Ada"));
        engine.take_sync_batch();

        let player = Rc::clone(room.players.borrow().get("p1").unwrap());
        room.remove_player(&engine, "p1");
        let batch = engine.take_sync_batch();
        assert_eq!(batch.get("players.p1"), Some(&None));

        player.score.set(42);
        assert!(!engine.has_pending_sync());
    }
}
