//! Generic multicast event bus used by every reactive primitive.
//!
//! Cells, computed cells and linked cells all need the same thing: a list of
//! listeners that get called, in subscription order, whenever a value
//! changes, plus a `Subscription` handle that detaches the listener when
//! dropped. This is that primitive, generalized over the event payload type
//! instead of being specific to one event enum.
//!
//! The room model is single-threaded cooperative (every cell emission,
//! computed re-evaluation and sync flush runs on one logical thread, per
//! the concurrency model), so this uses `Rc`/`RefCell` rather than
//! `Arc`/`RwLock`.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Subscription handle that detaches its callback when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription<T> {
    bus: Weak<EventBus<T>>,
    id: usize,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Multicast event bus. Wrap in `Rc` to enable subscriptions.
pub struct EventBus<T> {
    callbacks: RefCell<Vec<(usize, Rc<dyn Fn(T)>)>>,
    next_id: StdCell<usize>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            callbacks: RefCell::new(Vec::new()),
            next_id: StdCell::new(0),
        }
    }
}

impl<T: Clone + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a `Subscription` that detaches the
    /// callback on drop. Requires `self` to be wrapped in `Rc`.
    pub fn subscribe(self: &Rc<Self>, callback: impl Fn(T) + 'static) -> Subscription<T> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.callbacks.borrow_mut().push((id, Rc::new(callback)));
        Subscription {
            bus: Rc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // `try_borrow_mut` rather than `borrow_mut`: a Subscription's Drop
        // can run while `emit` is iterating the same list (e.g. a listener
        // drops a prior subscription), and that must not panic.
        if let Ok(mut callbacks) = self.callbacks.try_borrow_mut() {
            callbacks.retain(|(i, _)| *i != id);
        }
    }

    /// Number of currently attached listeners.
    pub fn listener_count(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// Emit an event to every subscriber, in subscription order.
    pub fn emit(&self, event: T) {
        // Clone the callback list first: a callback that subscribes or
        // unsubscribes during emission must not corrupt the iteration.
        let callbacks: Vec<_> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn subscribe_and_emit() {
        let bus = Rc::new(EventBus::new());
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);

        let _sub = bus.subscribe(move |v: i32| seen_clone.borrow_mut().push(v));
        bus.emit(1);
        bus.emit(2);

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn subscription_detaches_on_drop() {
        let bus = Rc::new(EventBus::new());
        let count = Rc::new(StdCell::new(0));
        let count_clone = Rc::clone(&count);

        let sub = bus.subscribe(move |_: ()| count_clone.set(count_clone.get() + 1));
        bus.emit(());
        assert_eq!(count.get(), 1);

        drop(sub);
        bus.emit(());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn emission_order_matches_subscription_order() {
        let bus = Rc::new(EventBus::new());
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        let _s1 = bus.subscribe(move |_: ()| o1.borrow_mut().push(1));
        let o2 = Rc::clone(&order);
        let _s2 = bus.subscribe(move |_: ()| o2.borrow_mut().push(2));

        bus.emit(());
        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
