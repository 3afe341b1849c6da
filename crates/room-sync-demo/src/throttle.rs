//! A leading+trailing throttled-flush wrapper, the room shell's job rather
//! than the core's: invoke immediately on the first call of a quiet window;
//! on further calls within `w` ms remember only that a trailing flush is
//! owed; once `w` ms pass with no further call, flush once more and reset.
//!
//! `room-sync-core::SyncEngine` never calls a timer itself — it only
//! accumulates pending entries and answers `has_pending_sync`/
//! `take_sync_batch`. This module is the caller-supplied scheduler the core
//! leaves out: [`Throttle::signal`] is called every time the shell notices
//! new pending state, and `flush` (which drains and ships the batch) is
//! invoked with leading+trailing semantics around it.
//!
//! Built on `tokio::task::spawn_local` rather than `tokio::spawn`: every
//! reactive primitive in `room-sync-core` is `Rc`-based under its
//! single-writer-room concurrency model, so the trailing-edge timer task
//! must run on the same thread that drives the room, not be `Send`.
//! `main.rs` runs its whole event loop inside a `tokio::task::LocalSet` for
//! exactly this reason.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

struct ThrottleState {
    cooling_down: bool,
    trailing_call_pending: bool,
}

/// A leading+trailing throttle for a zero-argument flush callback. `T`'s
/// "arguments" are implicit: `flush` is expected to read whatever is
/// currently pending (e.g. `SyncEngine::take_sync_batch`) at the moment it
/// actually runs, which is what "remember only the most recent arguments"
/// means when the thing being remembered is the engine's own pending map
/// rather than data passed explicitly to `signal`.
pub struct Throttle {
    window: Duration,
    state: Rc<RefCell<ThrottleState>>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Rc::new(RefCell::new(ThrottleState { cooling_down: false, trailing_call_pending: false })),
        }
    }

    /// Notify the throttle that there is new pending state to flush
    /// eventually. `flush` is cloned into the trailing-edge timer task, so
    /// it must be cheap to clone (an `Rc<dyn Fn()>` around the real work).
    pub fn signal(&self, flush: Rc<dyn Fn()>) {
        let mut state = self.state.borrow_mut();
        if state.cooling_down {
            state.trailing_call_pending = true;
            return;
        }
        state.cooling_down = true;
        state.trailing_call_pending = false;
        drop(state);

        flush();

        let window = self.window;
        let state_handle = Rc::clone(&self.state);
        tokio::task::spawn_local(async move {
            loop {
                tokio::time::sleep(window).await;
                let mut state = state_handle.borrow_mut();
                if state.trailing_call_pending {
                    state.trailing_call_pending = false;
                    drop(state);
                    flush();
                } else {
                    state.cooling_down = false;
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn leading_call_fires_immediately() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let throttle = Throttle::new(Duration::from_millis(50));
                let calls = Rc::new(RefCell::new(0));
                let calls2 = Rc::clone(&calls);
                throttle.signal(Rc::new(move || *calls2.borrow_mut() += 1));
                assert_eq!(*calls.borrow(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn calls_within_window_coalesce_into_one_trailing_flush() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let throttle = Throttle::new(Duration::from_millis(100));
                let calls = Rc::new(RefCell::new(0));

                let c = Rc::clone(&calls);
                throttle.signal(Rc::new(move || *c.borrow_mut() += 1));
                assert_eq!(*calls.borrow(), 1);

                tokio::time::advance(Duration::from_millis(10)).await;
                let c = Rc::clone(&calls);
                throttle.signal(Rc::new(move || *c.borrow_mut() += 1));
                tokio::time::advance(Duration::from_millis(10)).await;
                let c = Rc::clone(&calls);
                throttle.signal(Rc::new(move || *c.borrow_mut() += 1));
                // Still inside the cooldown window: neither extra signal
                // fired immediately.
                assert_eq!(*calls.borrow(), 1);

                tokio::time::advance(Duration::from_millis(100)).await;
                tokio::task::yield_now().await;
                // One trailing flush for both coalesced signals.
                assert_eq!(*calls.borrow(), 2);
            })
            .await;
    }
}
