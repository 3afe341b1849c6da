//! room-sync-demo library: a reference "room shell" — the collaborator
//! `room-sync-core` assumes but deliberately leaves for its caller to build.
//!
//! Exposes the pieces `main.rs` wires together so integration tests can
//! drive them without going through the binary: a toy [`room::Room`]/
//! [`room::Player`] pair of `Syncable` types, a file-backed
//! [`storage::FileStorage`], and the [`throttle::Throttle`] that turns the
//! core's raw `onSync`/`onPersist` pending state into a leading+trailing
//! flush cadence.

pub mod room;
pub mod storage;
pub mod throttle;

pub use room::{Player, Room};
pub use storage::{default_room_dir, FileStorage};
pub use throttle::Throttle;
