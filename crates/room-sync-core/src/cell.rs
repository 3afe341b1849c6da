//! Cell primitives: the three flavors of mutable reactive state a class
//! field can hold — a scalar, an array, or a keyed object/record.
//!
//! Every cell wraps an `Rc`-shared inner value plus an `EventBus` that emits
//! a tagged change record on every mutation. Reading a cell (`current`,
//! `get`, ...) registers it as a dependency of whatever computation is
//! currently being tracked (see [`crate::graph`]); mutating it drives both
//! that dependency graph and, independently, the sync engine's change
//! batching (the sync engine subscribes to the same change records).
//!
//! Scalars compare with `PartialEq` before emitting: setting a cell to its
//! current value is a no-op, not a change. Arrays and objects emit a
//! specific, minimal change record per mutation (`push`, `splice`, ...)
//! rather than diffing the whole collection, so the sync engine can derive
//! exact paths without re-walking the container.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::events::EventBus;
use crate::graph::{next_dep_id, track_read, DepId, DependencySource};

// ---------------------------------------------------------------------
// ScalarCell
// ---------------------------------------------------------------------

struct ScalarInner<T> {
    id: DepId,
    value: RefCell<T>,
    bus: Rc<EventBus<T>>,
    frozen: StdCell<bool>,
    equal: Box<dyn Fn(&T, &T) -> bool>,
}

impl<T: Clone + 'static> DependencySource for ScalarInner<T> {
    fn dep_id(&self) -> DepId {
        self.id
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Box<dyn std::any::Any> {
        Box::new(self.bus.subscribe(move |_| callback()))
    }
}

/// A single reactive value of type `T`.
pub struct ScalarCell<T> {
    inner: Rc<ScalarInner<T>>,
}

impl<T> Clone for ScalarCell<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Clone + 'static> ScalarCell<T> {
    /// Build a cell whose `set` uses `equal` instead of `PartialEq` to
    /// decide whether a new value is a no-op. Lets a field's equality be
    /// something other than identity — e.g. a scalar holding a type with no
    /// meaningful `PartialEq`, or one that should compare by a derived key.
    pub fn new_with_equal(initial: T, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(ScalarInner {
                id: next_dep_id(),
                value: RefCell::new(initial),
                bus: Rc::new(EventBus::new()),
                frozen: StdCell::new(false),
                equal: Box::new(equal),
            }),
        }
    }

    /// Current value. Registers this cell as a dependency of the enclosing
    /// tracked computation, if any.
    pub fn current(&self) -> T {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.value.borrow().clone()
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Set the value. A no-op (no emission) if `value` is equal (per this
    /// cell's `equal` function) to the current value, or if the cell is
    /// frozen.
    pub fn set(&self, value: T) {
        if (self.inner.equal)(&self.inner.value.borrow(), &value) {
            return;
        }
        *self.inner.value.borrow_mut() = value.clone();
        if !self.inner.frozen.get() {
            self.inner.bus.emit(value);
        }
    }

    /// Suppress emissions until [`ScalarCell::unfreeze`]. `set` still
    /// updates the stored value.
    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    /// Resume emissions and immediately replay the current value as an
    /// `init`-equivalent emission, so subscribers that missed updates while
    /// frozen catch up.
    pub fn unfreeze(&self) {
        self.inner.frozen.set(false);
        self.inner.bus.emit(self.inner.value.borrow().clone());
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    /// Subscribe to every value this cell is set to (subject to the
    /// no-op/frozen rules above).
    pub fn subscribe(&self, callback: impl Fn(T) + 'static) -> crate::events::Subscription<T> {
        self.inner.bus.subscribe(callback)
    }
}

impl<T: Clone + PartialEq + 'static> ScalarCell<T> {
    /// Build a cell that compares by `PartialEq`, the common case.
    pub fn new(initial: T) -> Self {
        Self::new_with_equal(initial, |a, b| a == b)
    }
}

// ---------------------------------------------------------------------
// ArrayCell
// ---------------------------------------------------------------------

/// A tagged description of a single array mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayChange<T> {
    /// Emitted on unfreeze: the full current contents, replayed as if the
    /// array had just been initialized to this state.
    Init(Vec<T>),
    Push(T),
    Pop(Option<T>),
    Shift(Option<T>),
    Unshift(T),
    Set { index: usize, value: T },
    Splice { index: usize, removed: Vec<T>, inserted: Vec<T> },
    Clear,
}

struct ArrayInner<T> {
    id: DepId,
    items: RefCell<Vec<T>>,
    bus: Rc<EventBus<ArrayChange<T>>>,
    frozen: StdCell<bool>,
    equal: Box<dyn Fn(&T, &T) -> bool>,
}

impl<T: Clone + 'static> DependencySource for ArrayInner<T> {
    fn dep_id(&self) -> DepId {
        self.id
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Box<dyn std::any::Any> {
        Box::new(self.bus.subscribe(move |_| callback()))
    }
}

/// A reactive array of values of type `T`.
pub struct ArrayCell<T> {
    inner: Rc<ArrayInner<T>>,
}

impl<T> Clone for ArrayCell<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Clone + 'static> ArrayCell<T> {
    /// Build an array cell whose index assignment (`assign_at`) uses
    /// `equal` instead of `PartialEq` to decide whether a write is a no-op.
    pub fn new_with_equal(initial: Vec<T>, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                id: next_dep_id(),
                items: RefCell::new(initial),
                bus: Rc::new(EventBus::new()),
                frozen: StdCell::new(false),
                equal: Box::new(equal),
            }),
        }
    }

    fn emit(&self, change: ArrayChange<T>) {
        if !self.inner.frozen.get() {
            self.inner.bus.emit(change);
        }
    }

    /// Full current contents. Registers a dependency.
    pub fn current(&self) -> Vec<T> {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.items.borrow().clone()
    }

    pub fn len(&self) -> usize {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn push(&self, value: T) {
        self.inner.items.borrow_mut().push(value.clone());
        self.emit(ArrayChange::Push(value));
    }

    pub fn pop(&self) -> Option<T> {
        let value = self.inner.items.borrow_mut().pop();
        self.emit(ArrayChange::Pop(value.clone()));
        value
    }

    pub fn shift(&self) -> Option<T> {
        let value = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() { None } else { Some(items.remove(0)) }
        };
        self.emit(ArrayChange::Shift(value.clone()));
        value
    }

    pub fn unshift(&self, value: T) {
        self.inner.items.borrow_mut().insert(0, value.clone());
        self.emit(ArrayChange::Unshift(value));
    }

    /// Replace the item at `index`. A no-op (no emission) if `value` is
    /// equal (per this cell's `equal` function) to the current item there.
    pub fn assign_at(&self, index: usize, value: T) {
        let unchanged = self
            .inner
            .items
            .borrow()
            .get(index)
            .is_some_and(|current| (self.inner.equal)(current, &value));
        if unchanged {
            return;
        }
        self.inner.items.borrow_mut()[index] = value.clone();
        self.emit(ArrayChange::Set { index, value });
    }

    /// Remove `remove_count` items starting at `index` and insert
    /// `inserted` in their place, mirroring `Array.prototype.splice`.
    pub fn splice(&self, index: usize, remove_count: usize, inserted: Vec<T>) -> Vec<T> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            let end = (index + remove_count).min(items.len());
            items.splice(index..end, inserted.clone()).collect::<Vec<_>>()
        };
        self.emit(ArrayChange::Splice { index, removed: removed.clone(), inserted });
        removed
    }

    pub fn remove_at(&self, index: usize) -> Option<T> {
        let has_index = index < self.inner.items.borrow().len();
        if !has_index {
            return None;
        }
        let removed = self.splice(index, 1, Vec::new());
        removed.into_iter().next()
    }

    pub fn clear(&self) {
        self.inner.items.borrow_mut().clear();
        self.emit(ArrayChange::Clear);
    }

    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    pub fn unfreeze(&self) {
        self.inner.frozen.set(false);
        self.inner.bus.emit(ArrayChange::Init(self.inner.items.borrow().clone()));
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(ArrayChange<T>) + 'static,
    ) -> crate::events::Subscription<ArrayChange<T>> {
        self.inner.bus.subscribe(callback)
    }
}

impl<T: Clone + PartialEq + 'static> ArrayCell<T> {
    /// Build a cell that compares by `PartialEq`, the common case.
    pub fn new(initial: Vec<T>) -> Self {
        Self::new_with_equal(initial, |a, b| a == b)
    }
}

// ---------------------------------------------------------------------
// ObjectCell
// ---------------------------------------------------------------------

/// A tagged description of a single object/record mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectChange<T> {
    /// Emitted on unfreeze: the full current contents, replayed as if the
    /// object had just been initialized to this state.
    Init(IndexMap<String, T>),
    Set { key: String, value: T },
    Remove { key: String },
}

struct ObjectInner<T> {
    id: DepId,
    fields: RefCell<IndexMap<String, T>>,
    bus: Rc<EventBus<ObjectChange<T>>>,
    frozen: StdCell<bool>,
    equal: Box<dyn Fn(&T, &T) -> bool>,
}

impl<T: Clone + 'static> DependencySource for ObjectInner<T> {
    fn dep_id(&self) -> DepId {
        self.id
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Box<dyn std::any::Any> {
        Box::new(self.bus.subscribe(move |_| callback()))
    }
}

/// A reactive, insertion-ordered keyed collection of values of type `T`.
pub struct ObjectCell<T> {
    inner: Rc<ObjectInner<T>>,
}

impl<T> Clone for ObjectCell<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Clone + 'static> ObjectCell<T> {
    /// Build an object cell whose property assignment (`insert`) uses
    /// `equal` instead of `PartialEq` to decide whether a write to an
    /// existing key is a no-op.
    pub fn new_with_equal(initial: IndexMap<String, T>, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                id: next_dep_id(),
                fields: RefCell::new(initial),
                bus: Rc::new(EventBus::new()),
                frozen: StdCell::new(false),
                equal: Box::new(equal),
            }),
        }
    }

    fn emit(&self, change: ObjectChange<T>) {
        if !self.inner.frozen.get() {
            self.inner.bus.emit(change);
        }
    }

    pub fn current(&self) -> IndexMap<String, T> {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.fields.borrow().clone()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.fields.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        self.inner.fields.borrow().contains_key(key)
    }

    /// A no-op (no emission, no write) if `key` already holds a value equal
    /// (per this cell's `equal` function) to `value`.
    pub fn insert(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        let unchanged = self
            .inner
            .fields
            .borrow()
            .get(&key)
            .is_some_and(|current| (self.inner.equal)(current, &value));
        if unchanged {
            return;
        }
        self.inner.fields.borrow_mut().insert(key.clone(), value.clone());
        self.emit(ObjectChange::Set { key, value });
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        let removed = self.inner.fields.borrow_mut().shift_remove(key);
        if removed.is_some() {
            self.emit(ObjectChange::Remove { key: key.to_string() });
        }
        removed
    }

    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    pub fn unfreeze(&self) {
        self.inner.frozen.set(false);
        self.inner.bus.emit(ObjectChange::Init(self.inner.fields.borrow().clone()));
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(ObjectChange<T>) + 'static,
    ) -> crate::events::Subscription<ObjectChange<T>> {
        self.inner.bus.subscribe(callback)
    }
}

impl<T: Clone + PartialEq + 'static> ObjectCell<T> {
    /// Build a cell that compares by `PartialEq`, the common case.
    pub fn new(initial: IndexMap<String, T>) -> Self {
        Self::new_with_equal(initial, |a, b| a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn scalar_set_is_noop_when_equal() {
        let cell = ScalarCell::new(1);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe(move |v| seen2.borrow_mut().push(v));

        cell.set(1);
        assert!(seen.borrow().is_empty());
        cell.set(2);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn scalar_freeze_suppresses_then_unfreeze_replays_current() {
        let cell = ScalarCell::new(1);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe(move |v| seen2.borrow_mut().push(v));

        cell.freeze();
        cell.set(2);
        cell.set(3);
        assert!(seen.borrow().is_empty());
        assert_eq!(cell.peek(), 3);

        cell.unfreeze();
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn scalar_set_honors_custom_equal() {
        // Case-insensitive equality: re-setting to a different-case spelling
        // of the same word is a no-op.
        let cell = ScalarCell::new_with_equal("hi".to_string(), |a, b| a.eq_ignore_ascii_case(b));
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe(move |v| seen2.borrow_mut().push(v));

        cell.set("HI".to_string());
        assert!(seen.borrow().is_empty());
        cell.set("bye".to_string());
        assert_eq!(*seen.borrow(), vec!["bye".to_string()]);
    }

    #[test]
    fn array_assign_at_honors_custom_equal() {
        let array = ArrayCell::new_with_equal(vec![1, 2], |a: &i32, b: &i32| a == b);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = array.subscribe(move |c| seen2.borrow_mut().push(c));

        array.assign_at(0, 1);
        assert!(seen.borrow().is_empty());
        array.assign_at(0, 9);
        assert_eq!(*seen.borrow(), vec![ArrayChange::Set { index: 0, value: 9 }]);
    }

    #[test]
    fn object_insert_honors_custom_equal() {
        let mut initial = IndexMap::new();
        initial.insert("a".to_string(), 1);
        let object = ObjectCell::new_with_equal(initial, |a: &i32, b: &i32| a == b);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = object.subscribe(move |c| seen2.borrow_mut().push(c));

        object.insert("a", 1);
        assert!(seen.borrow().is_empty());
        object.insert("a", 2);
        assert_eq!(*seen.borrow(), vec![ObjectChange::Set { key: "a".to_string(), value: 2 }]);
    }

    #[test]
    fn array_mutations_emit_tagged_changes() {
        let array = ArrayCell::new(vec![1, 2, 3]);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = array.subscribe(move |c| seen2.borrow_mut().push(c));

        array.push(4);
        array.pop();
        array.unshift(0);
        array.assign_at(1, 99);
        array.splice(1, 1, vec![7, 8]);
        array.clear();

        assert_eq!(
            *seen.borrow(),
            vec![
                ArrayChange::Push(4),
                ArrayChange::Pop(Some(4)),
                ArrayChange::Unshift(0),
                ArrayChange::Set { index: 1, value: 99 },
                ArrayChange::Splice { index: 1, removed: vec![99], inserted: vec![7, 8] },
                ArrayChange::Clear,
            ]
        );
        assert_eq!(array.current(), Vec::<i32>::new());
    }

    #[test]
    fn object_insert_and_remove_preserve_insertion_order() {
        let object: ObjectCell<i32> = ObjectCell::new(IndexMap::new());
        object.insert("a", 1);
        object.insert("b", 2);
        object.insert("a", 3);

        let keys: Vec<_> = object.current().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(object.get("a"), Some(3));

        object.remove("a");
        assert_eq!(object.get("a"), None);
        assert!(object.contains_key("b"));
    }

    #[test]
    fn object_unfreeze_replays_full_state() {
        let object: ObjectCell<i32> = ObjectCell::new(IndexMap::new());
        object.insert("a", 1);

        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = object.subscribe(move |c| seen2.borrow_mut().push(c));

        object.freeze();
        object.insert("b", 2);
        assert!(seen.borrow().is_empty());

        object.unfreeze();
        let mut expected = IndexMap::new();
        expected.insert("a".to_string(), 1);
        expected.insert("b".to_string(), 2);
        assert_eq!(*seen.borrow(), vec![ObjectChange::Init(expected)]);
    }
}
