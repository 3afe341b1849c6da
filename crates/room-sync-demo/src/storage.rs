//! A file-backed [`room_sync_core::Storage`]: one JSON file per shard,
//! written with `serde_json::to_vec_pretty`, matching the core's per-shard
//! persistence model one file at a time instead of one file for
//! everything.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use room_sync_core::error::StorageError;
use room_sync_core::storage::{Storage, ROOT_SHARD};
use serde_json::Value;

pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn shard_path(&self, shard: &str) -> PathBuf {
        let filename = if shard == ROOT_SHARD { "_root.json".to_string() } else { format!("{shard}.json") };
        self.dir.join(filename)
    }

    fn io_err(shard: &str, source: std::io::Error) -> StorageError {
        StorageError::Io { shard: shard.to_string(), source }
    }
}

impl Storage for FileStorage {
    fn put(&self, shard: &str, value: Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&value)
            .map_err(|source| StorageError::Serialization { shard: shard.to_string(), source })?;
        fs::write(self.shard_path(shard), bytes).map_err(|source| Self::io_err(shard, source))
    }

    fn get(&self, shard: &str) -> Result<Option<Value>, StorageError> {
        match fs::read(self.shard_path(shard)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Serialization { shard: shard.to_string(), source }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(shard, e)),
        }
    }

    fn remove(&self, shard: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.shard_path(shard)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(shard, e)),
        }
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| Self::io_err("<dir>", source))?;
        let mut shards = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Self::io_err("<dir>", source))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            shards.push(if stem == "_root" { ROOT_SHARD.to_string() } else { stem.to_string() });
        }
        Ok(shards)
    }
}

pub fn default_room_dir(base: &Path) -> PathBuf {
    base.join(".room-sync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_root_and_collection_shards() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        storage.put(ROOT_SHARD, json!({"score_cap": 100})).unwrap();
        storage.put("players.p1", json!({"name": "Ada"})).unwrap();

        assert_eq!(storage.get(ROOT_SHARD).unwrap(), Some(json!({"score_cap": 100})));
        assert_eq!(storage.get("players.p1").unwrap(), Some(json!({"name": "Ada"})));

        let mut listed = storage.list().unwrap();
        listed.sort();
        assert_eq!(listed, vec![".".to_string(), "players.p1".to_string()]);

        storage.remove("players.p1").unwrap();
        assert_eq!(storage.get("players.p1").unwrap(), None);
    }
}
