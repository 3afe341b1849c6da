//! Persistence shards.
//!
//! A room's persisted state is not one blob: the root object lives under
//! the `"."` shard, and every entry of a persisted, class-typed collection
//! field lives under its own `"field.key"` shard, so a single mutated
//! collection entry round-trips through storage without touching its
//! siblings. [`Storage`] is the seam a room shell plugs its own backing
//! store into; [`InMemoryStorage`] is the reference implementation used in
//! tests.

use std::cell::RefCell;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::StorageError;

/// Shard name for a room's root object.
pub const ROOT_SHARD: &str = ".";

/// Build the shard name for an entry `key` of a persisted collection field
/// `field`.
pub fn collection_shard(field: &str, key: &str) -> String {
    format!("{field}.{key}")
}

/// Storage contract a room shell must implement to back `load`/persist: a
/// small put/get/list shape narrowed to whole-shard JSON values rather than
/// byte streams.
pub trait Storage {
    fn put(&self, shard: &str, value: Value) -> Result<(), StorageError>;
    fn get(&self, shard: &str) -> Result<Option<Value>, StorageError>;
    fn remove(&self, shard: &str) -> Result<(), StorageError>;
    fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory `Storage`, for tests and for rooms with no durability
/// requirement.
#[derive(Default)]
pub struct InMemoryStorage {
    shards: RefCell<IndexMap<String, Value>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn put(&self, shard: &str, value: Value) -> Result<(), StorageError> {
        self.shards.borrow_mut().insert(shard.to_string(), value);
        Ok(())
    }

    fn get(&self, shard: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.shards.borrow().get(shard).cloned())
    }

    fn remove(&self, shard: &str) -> Result<(), StorageError> {
        self.shards.borrow_mut().shift_remove(shard);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.shards.borrow().keys().cloned().collect())
    }
}
