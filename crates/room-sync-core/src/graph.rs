//! The reactive graph: dependency capture, `computed`, `linked_signal`,
//! `effect` and `untracked`.
//!
//! Every cell and derived value is a *dependency source*: something that can
//! be read (which, while a tracker is installed, registers it as a
//! dependency) and that can hand out an "invalidated" subscription fired
//! whenever its value changes. `computed`/`linked_signal` use the same
//! tracking machinery the cells use to read them, so computed-of-computed
//! and linked-of-cell compose for free.
//!
//! The tracker is a `thread_local!` stack of capture frames rather than a
//! single mutable slot. Pushing a frame *is* saving the previous slot value;
//! popping *is* restoring it — the idiomatic Rust rendering of "a nullable
//! slot with manual LIFO save/restore" described in the design notes.
//! `untracked` pushes a `None` frame so nested reads are never captured,
//! regardless of how many trackers are already on the stack.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) type DepId = usize;

pub(crate) fn next_dep_id() -> DepId {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Anything that can be read under tracking and can notify watchers when it
/// changes. Implemented by every cell variant and by `Computed`/`LinkedSignal`.
pub(crate) trait DependencySource {
    fn dep_id(&self) -> DepId;
    /// Subscribe a zero-argument "something changed" callback. The returned
    /// box only exists to keep the underlying subscription alive; drop it to
    /// detach.
    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Box<dyn Any>;
}

struct CaptureFrame {
    seen: HashSet<DepId>,
    deps: Vec<Rc<dyn DependencySource>>,
}

thread_local! {
    static TRACKER_STACK: RefCell<Vec<Option<Rc<RefCell<CaptureFrame>>>>> = RefCell::new(Vec::new());
}

/// Run `f` with dependency tracking suppressed, restoring the previous
/// tracker state afterwards even if `f` panics. Nesting is LIFO.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    TRACKER_STACK.with(|stack| stack.borrow_mut().push(None));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    TRACKER_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Called by every dependency source when it is read. No-op unless a
/// capture frame is on top of the tracker stack.
pub(crate) fn track_read(dep: Rc<dyn DependencySource>) {
    TRACKER_STACK.with(|stack| {
        if let Some(Some(frame)) = stack.borrow().last() {
            let mut frame = frame.borrow_mut();
            if frame.seen.insert(dep.dep_id()) {
                frame.deps.push(dep);
            }
        }
    });
}

/// Push a fresh capture frame, run `f`, pop the frame, and return both the
/// result and the set of dependency sources read during `f`.
pub(crate) fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Rc<dyn DependencySource>>) {
    let frame = Rc::new(RefCell::new(CaptureFrame {
        seen: HashSet::new(),
        deps: Vec::new(),
    }));
    TRACKER_STACK.with(|stack| stack.borrow_mut().push(Some(Rc::clone(&frame))));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    TRACKER_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
    match result {
        Ok(value) => {
            let deps = Rc::try_unwrap(frame)
                .map(|cell| cell.into_inner().deps)
                .unwrap_or_default();
            (value, deps)
        }
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Subscribe `cb` to every dependency in `deps`, returning the guards that
/// keep those subscriptions alive.
fn subscribe_all(deps: &[Rc<dyn DependencySource>], cb: Rc<dyn Fn()>) -> Vec<Box<dyn Any>> {
    deps.iter()
        .map(|dep| dep.subscribe_invalidate(Rc::clone(&cb)))
        .collect()
}

// ---------------------------------------------------------------------
// computed
// ---------------------------------------------------------------------

struct ComputedInner<T> {
    id: DepId,
    compute: RefCell<Box<dyn FnMut() -> T>>,
    value: RefCell<T>,
    dep_guards: RefCell<Vec<Box<dyn Any>>>,
    bus: Rc<crate::events::EventBus<()>>,
    has_deps: std::cell::Cell<bool>,
}

/// A read-only derived cell. Its dependency set is frozen at construction:
/// re-evaluation re-runs `compute` but does not re-scan which cells it
/// reads, so `compute` must read every cell its result may ever depend on
/// during the first evaluation.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Clone + 'static> DependencySource for ComputedInner<T> {
    fn dep_id(&self) -> DepId {
        self.id
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Box<dyn Any> {
        Box::new(self.bus.subscribe(move |()| callback()))
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Construct a computed cell. `compute` is evaluated immediately to
    /// capture its dependency set.
    pub fn new(mut compute: impl FnMut() -> T + 'static) -> Self {
        let id = next_dep_id();
        let (initial, deps) = capture(&mut compute);
        let inner = Rc::new(ComputedInner {
            id,
            compute: RefCell::new(Box::new(compute)),
            value: RefCell::new(initial),
            dep_guards: RefCell::new(Vec::new()),
            bus: Rc::new(crate::events::EventBus::new()),
            has_deps: std::cell::Cell::new(!deps.is_empty()),
        });

        let weak: Weak<ComputedInner<T>> = Rc::downgrade(&inner);
        let guards = subscribe_all(
            &deps,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::recompute(&inner);
                }
            }),
        );
        *inner.dep_guards.borrow_mut() = guards;

        Self { inner }
    }

    fn recompute(inner: &Rc<ComputedInner<T>>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (inner.compute.borrow_mut())()));
        match result {
            Ok(value) => {
                *inner.value.borrow_mut() = value;
                inner.bus.emit(());
            }
            Err(payload) => {
                // Fault inside the computation: previous value and
                // subscription both survive, the fault propagates out of
                // whatever `set` call triggered this recompute.
                tracing::warn!("computed recompute panicked; retaining previous value");
                panic::resume_unwind(payload);
            }
        }
    }

    /// Current value. While a tracker is installed, registers this computed
    /// as a dependency of the enclosing computation.
    pub fn current(&self) -> T {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);
        if !self.inner.has_deps.get() {
            // No push source can ever drive this forward; recompute lazily
            // on every read instead.
            let value = (self.inner.compute.borrow_mut())();
            *self.inner.value.borrow_mut() = value.clone();
            return value;
        }
        self.inner.value.borrow().clone()
    }
}

// ---------------------------------------------------------------------
// linked_signal
// ---------------------------------------------------------------------

/// The source value and derived value from a `LinkedSignal`'s previous
/// evaluation, handed to the computation function so it can fold state
/// across updates.
#[derive(Clone)]
pub struct LinkedPrevious<S, T> {
    pub source: S,
    pub value: T,
}

struct LinkedSignalInner<S, T> {
    id: DepId,
    source: RefCell<Box<dyn FnMut() -> S>>,
    computation: RefCell<Box<dyn FnMut(S, Option<LinkedPrevious<S, T>>) -> T>>,
    equal: Box<dyn Fn(&T, &T) -> bool>,
    value: RefCell<T>,
    last: RefCell<Option<LinkedPrevious<S, T>>>,
    overridden: RefCell<Option<T>>,
    dep_version: std::cell::Cell<u64>,
    override_version: std::cell::Cell<Option<u64>>,
    dep_guards: RefCell<Vec<Box<dyn Any>>>,
    bus: Rc<crate::events::EventBus<()>>,
    has_deps: std::cell::Cell<bool>,
}

/// A computed cell that additionally accepts a manual override, valid until
/// its source or any tracked dependency produces a new value.
pub struct LinkedSignal<S, T> {
    inner: Rc<LinkedSignalInner<S, T>>,
}

impl<S, T> Clone for LinkedSignal<S, T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<S: Clone + 'static, T: Clone + 'static> DependencySource for LinkedSignalInner<S, T> {
    fn dep_id(&self) -> DepId {
        self.id
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Box<dyn Any> {
        Box::new(self.bus.subscribe(move |()| callback()))
    }
}

impl<S: Clone + 'static, T: Clone + PartialEq + 'static> LinkedSignal<S, T> {
    /// `linkedSignal({ source, computation })`: `source` is read under
    /// tracking so it can be a cell, a computed, or an arbitrary closure
    /// that itself reads cells; `computation` receives the latest source
    /// value and the previous `(source, value)` pair (`None` on the first
    /// evaluation).
    pub fn with_source(
        source: impl FnMut() -> S + 'static,
        computation: impl FnMut(S, Option<LinkedPrevious<S, T>>) -> T + 'static,
    ) -> Self {
        Self::with_source_and_equal(source, computation, |a, b| a == b)
    }

    pub fn with_source_and_equal(
        mut source: impl FnMut() -> S + 'static,
        mut computation: impl FnMut(S, Option<LinkedPrevious<S, T>>) -> T + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let id = next_dep_id();
        let (source_value, deps) = capture(&mut source);
        let initial = computation(source_value.clone(), None);

        let inner = Rc::new(LinkedSignalInner {
            id,
            source: RefCell::new(Box::new(source)),
            computation: RefCell::new(Box::new(computation)),
            equal: Box::new(equal),
            value: RefCell::new(initial.clone()),
            last: RefCell::new(Some(LinkedPrevious { source: source_value, value: initial })),
            overridden: RefCell::new(None),
            dep_version: std::cell::Cell::new(0),
            override_version: std::cell::Cell::new(None),
            dep_guards: RefCell::new(Vec::new()),
            bus: Rc::new(crate::events::EventBus::new()),
            has_deps: std::cell::Cell::new(!deps.is_empty()),
        });

        let weak: Weak<LinkedSignalInner<S, T>> = Rc::downgrade(&inner);
        let guards = subscribe_all(
            &deps,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::on_dependency_changed(&inner);
                }
            }),
        );
        *inner.dep_guards.borrow_mut() = guards;

        Self { inner }
    }

    /// `linkedSignal(() => expr)`: tracks dependencies exactly like
    /// `computed`, with no separate source/computation split.
    pub fn from_fn(mut expr: impl FnMut() -> T + 'static) -> Self {
        Self::with_source(move || expr(), |v, _prev| v)
    }

    fn on_dependency_changed(inner: &Rc<LinkedSignalInner<S, T>>) {
        inner.dep_version.set(inner.dep_version.get() + 1);
        *inner.overridden.borrow_mut() = None;
        Self::recompute(inner);
    }

    fn recompute(inner: &Rc<LinkedSignalInner<S, T>>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let source_value = (inner.source.borrow_mut())();
            let previous = inner.last.borrow().clone();
            let value = (inner.computation.borrow_mut())(source_value.clone(), previous);
            (source_value, value)
        }));
        match result {
            Ok((source_value, value)) => {
                let changed = {
                    let current = inner.value.borrow();
                    !(inner.equal)(&current, &value)
                };
                *inner.last.borrow_mut() = Some(LinkedPrevious { source: source_value, value: value.clone() });
                if changed {
                    *inner.value.borrow_mut() = value;
                    inner.bus.emit(());
                }
            }
            Err(payload) => {
                tracing::warn!("linked signal recompute panicked; retaining previous value");
                panic::resume_unwind(payload);
            }
        }
    }

    /// Manually override the value. The override holds until the source or
    /// any tracked dependency emits a new value.
    pub fn set(&self, value: T) {
        *self.inner.overridden.borrow_mut() = Some(value.clone());
        self.inner.override_version.set(Some(self.inner.dep_version.get()));
        let changed = {
            let current = self.inner.value.borrow();
            !(self.inner.equal)(&current, &value)
        };
        *self.inner.value.borrow_mut() = value;
        if changed {
            self.inner.bus.emit(());
        }
    }

    /// Current value: the live override if one is set and no tracked
    /// dependency has emitted since, otherwise the recomputed value.
    pub fn current(&self) -> T {
        track_read(Rc::clone(&self.inner) as Rc<dyn DependencySource>);

        if let Some(override_version) = self.inner.override_version.get() {
            if override_version == self.inner.dep_version.get() {
                if let Some(value) = self.inner.overridden.borrow().clone() {
                    return value;
                }
            }
        }

        if !self.inner.has_deps.get() {
            Self::recompute(&self.inner);
        }
        self.inner.value.borrow().clone()
    }
}

// ---------------------------------------------------------------------
// effect
// ---------------------------------------------------------------------

type Cleanup = Box<dyn FnOnce()>;

struct EffectInner {
    id: DepId,
    body: RefCell<Box<dyn FnMut() -> Option<Cleanup>>>,
    cleanup: RefCell<Option<Cleanup>>,
    dep_guards: RefCell<Vec<Box<dyn Any>>>,
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.borrow_mut().take() {
            cleanup();
        }
    }
}

/// `computed(fn)` plus a cleanup slot: if `fn`'s return value is callable
/// (here: `Some(cleanup)`), it is invoked before the next re-run and when
/// the effect is dropped (exactly once either way).
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    pub fn new(mut body: impl FnMut() -> Option<Cleanup> + 'static) -> Self {
        let id = next_dep_id();
        let (initial_cleanup, deps) = capture(&mut body);

        let inner = Rc::new(EffectInner {
            id,
            body: RefCell::new(Box::new(body)),
            cleanup: RefCell::new(initial_cleanup),
            dep_guards: RefCell::new(Vec::new()),
        });

        let weak = Rc::downgrade(&inner);
        let guards = subscribe_all(
            &deps,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::rerun(&inner);
                }
            }),
        );
        *inner.dep_guards.borrow_mut() = guards;

        Self { inner }
    }

    fn rerun(inner: &Rc<EffectInner>) {
        if let Some(cleanup) = inner.cleanup.borrow_mut().take() {
            cleanup();
        }
        let next_cleanup = (inner.body.borrow_mut())();
        *inner.cleanup.borrow_mut() = next_cleanup;
    }

    /// Detach the effect: dependency subscriptions are released and any
    /// pending cleanup runs immediately, exactly once.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl DependencySource for EffectInner {
    fn dep_id(&self) -> DepId {
        self.id
    }

    fn subscribe_invalidate(&self, _callback: Rc<dyn Fn()>) -> Box<dyn Any> {
        // Effects are terminal: nothing reads an effect as a dependency.
        Box::new(())
    }
}
