//! room-runner: a small headless process that boots one room from disk,
//! attaches it to a sync engine, runs a scripted sequence of mutations
//! against it, and flushes the resulting sync/persist batches on throttled
//! timers, logging each flush instead of shipping it over a wire.
//!
//! Everything `room-sync-core` exposes is `Rc`-based, so the whole body
//! below runs inside a `tokio::task::LocalSet` on a current-thread runtime
//! rather than the default multithreaded one.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use room_sync_core::SyncEngine;
use room_sync_demo::room::{self, Player, Room};
use room_sync_demo::{default_room_dir, FileStorage, Throttle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "room-runner")]
#[command(about = "Boots a room, runs a scripted session against it, and flushes sync/persist batches")]
struct Args {
    /// Directory holding the room's persisted shards (created if missing).
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Name to give the room if no root shard already exists.
    #[arg(long, default_value = "Lobby")]
    room_name: String,

    /// Sync flush throttle window, in milliseconds.
    #[arg(long, default_value_t = 500)]
    sync_window_ms: u64,

    /// Persist flush throttle window, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    persist_window_ms: u64,

    /// Enable verbose logging.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}

async fn run(args: Args) -> Result<()> {
    let storage_dir = args.storage_dir.unwrap_or_else(|| default_room_dir(&std::env::current_dir().unwrap()));
    info!("Storage directory: {:?}", storage_dir);
    let storage = FileStorage::new(&storage_dir)?;

    let registry = room::class_registry();
    let tree = room::compose_tree_from_storage(&storage)?;
    let room = if tree.as_object().is_some_and(|m| !m.is_empty()) {
        info!("Loaded existing room from storage");
        room::room_from_tree(&tree, &registry)?
    } else {
        info!(name = %args.room_name, "No existing room found, starting fresh");
        Room::new(args.room_name)
    };

    let engine = Rc::new(SyncEngine::new());
    room.attach(&engine);

    let sync_throttle = Throttle::new(Duration::from_millis(args.sync_window_ms));
    let persist_throttle = Throttle::new(Duration::from_millis(args.persist_window_ms));

    let flush_sync: Rc<dyn Fn()> = {
        let engine = Rc::clone(&engine);
        Rc::new(move || {
            let batch = engine.take_sync_batch();
            if !batch.is_empty() {
                info!(entries = batch.len(), ?batch, "sync batch flushed");
            }
        })
    };
    let flush_persist: Rc<dyn Fn()> = {
        let engine = Rc::clone(&engine);
        let storage_dir = storage_dir.clone();
        Rc::new(move || {
            let batch = engine.take_persist_batch();
            if batch.is_empty() {
                return;
            }
            let storage = FileStorage::new(&storage_dir).expect("storage directory still exists");
            match room::flush_persist_batch(&engine, &storage, batch.clone()) {
                Ok(()) => info!(entries = batch.len(), "persist batch flushed"),
                Err(err) => tracing::error!(%err, "failed to flush persist batch"),
            }
        })
    };

    run_demo_session(&room, &engine, &sync_throttle, &persist_throttle, Rc::clone(&flush_sync), Rc::clone(&flush_persist))
        .await;

    // Drain anything still pending after the scripted session ends, so the
    // process doesn't exit with unflushed state sitting in the engine.
    flush_sync();
    flush_persist();

    info!("room-runner exiting");
    Ok(())
}

/// A scripted sequence of mutations standing in for real player traffic:
/// two players join, one player's score changes a few times in quick
/// succession (to exercise throttle coalescing), and one player leaves.
async fn run_demo_session(
    room: &Room,
    engine: &Rc<SyncEngine>,
    sync_throttle: &Throttle,
    persist_throttle: &Throttle,
    flush_sync: Rc<dyn Fn()>,
    flush_persist: Rc<dyn Fn()>,
) {
    let signal = |engine: &Rc<SyncEngine>, sync_throttle: &Throttle, persist_throttle: &Throttle| {
        if engine.has_pending_sync() {
            sync_throttle.signal(Rc::clone(&flush_sync));
        }
        if engine.has_pending_persist() {
            persist_throttle.signal(Rc::clone(&flush_persist));
        }
    };

    room.add_player(engine, Player::new("p1", "Ada"));
    signal(engine, sync_throttle, persist_throttle);
    tokio::time::sleep(Duration::from_millis(50)).await;

    room.add_player(engine, Player::new("p2", "Lin"));
    signal(engine, sync_throttle, persist_throttle);
    tokio::time::sleep(Duration::from_millis(50)).await;

    if let Some(ada) = room.players.borrow().get("p1").cloned() {
        for score in [10, 25, 40] {
            ada.score.set(score);
            signal(engine, sync_throttle, persist_throttle);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    tokio::time::sleep(Duration::from_millis(600)).await;

    room.remove_player(engine, "p2");
    signal(engine, sync_throttle, persist_throttle);
    tokio::time::sleep(Duration::from_millis(2100)).await;
}
