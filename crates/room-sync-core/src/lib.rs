//! room-sync-core: the reactive cell graph, sync engine, and load/snapshot
//! protocol for a realtime, room-oriented state model.
//!
//! A room is a tree of class instances whose fields are reactive cells
//! ([`cell`]). Cells compose into derived values through the dependency
//! graph ([`graph`]: `computed`, `linked_signal`, `effect`, `untracked`).
//! A [`sync_engine::SyncEngine`] attaches to a `Syncable` instance
//! ([`meta`]) and turns its cells' mutations into path-keyed change
//! batches ([`path`] for the path algebra those batches are addressed
//! with); [`load`] applies the same shape of payload back, in either flat
//! path-keyed or nested tree form, and derives point-in-time snapshots.
//! [`storage`] is the seam a room shell plugs a durable shard store into.
//!
//! This crate has no wire format, authentication, routing, or multi-writer
//! consistency protocol opinions — those are a room shell's job, built on
//! top of what's exported here. It assumes a single logical thread per
//! room (see the crate-level concurrency notes in `graph`), which is why
//! its cells are `Rc`/`RefCell`-based rather than `Arc`/`Mutex`-based.

pub mod cell;
pub mod error;
pub mod events;
pub mod graph;
pub mod load;
pub mod meta;
pub mod path;
pub mod storage;
pub mod sync_engine;

pub use cell::{ArrayCell, ArrayChange, ObjectCell, ObjectChange, ScalarCell};
pub use error::{LoadError, PathError, StorageError, SyncEngineError};
pub use events::{EventBus, Subscription};
pub use graph::{untracked, Computed, Effect, LinkedPrevious, LinkedSignal};
pub use load::{create_states_snapshot, create_states_snapshot_deep, load_paths, load_tree, ClassRegistry, DELETE_SENTINEL};
pub use meta::{FieldMeta, PathValue, SyncField, SyncSchema, Syncable};
pub use storage::{InMemoryStorage, Storage};
pub use sync_engine::{Batch, SyncAttach, SyncEngine};
