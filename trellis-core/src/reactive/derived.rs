//! Derived Signal Implementation
//!
//! A derived signal is a cached, read-only value computed from other
//! signals. It re-evaluates only when one of its dependencies changed and
//! the value is read again.
//!
//! # How Derived Signals Work
//!
//! 1. On first access, the derived signal runs its computation inside a
//!    tracking frame and caches the result. Every signal read during the
//!    run becomes a dependency.
//!
//! 2. When accessed again, if no dependency has changed, the cached value
//!    is returned without running the computation.
//!
//! 3. When a dependency changes, the derived signal is marked dirty. If
//!    anything listens to it, the notification is forwarded right away,
//!    but the value itself is not recomputed.
//!
//! 4. On next access, the computation runs again and the dependency set is
//!    replaced by whatever this run read.
//!
//! # Why This Matters
//!
//! This "lazy pull, eager push" split avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 derived signals depend on it
//! - Only the derived signals actually read will recompute
//! - Several invalidations before a read collapse into one recomputation
//!
//! # Errors
//!
//! A computation that fails leaves the derived signal dirty, so the next
//! read retries instead of returning a stale value. Reading a derived
//! signal from inside its own computation fails with
//! [`ReactiveError::Cycle`].

use std::fmt::Debug;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::{TrackingContext, TrackingFrame};
use super::listener::{notify_all, Listener, ListenerId, ListenerRegistry, NodeId};
use super::options::SignalOptions;
use super::runtime::{Dependencies, Dependent, Source};
use super::traits::ReadSignal;
use crate::error::{ReactiveError, Result};

/// Evaluation state of a derived signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed, or the value was never computed.
    Dirty,

    /// The derived signal was disposed.
    Disposed,
}

type Compute<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

struct Cache<T> {
    value: Option<T>,
    previous: Option<T>,
    dirty: bool,
}

/// Shared state behind every clone of a [`Derived`].
pub(crate) struct DerivedInner<T> {
    id: NodeId,
    compute: Compute<T>,
    cache: Mutex<Cache<T>>,
    registry: Mutex<ListenerRegistry>,
    dependencies: Dependencies,
    options: SignalOptions<T>,
}

impl<T> DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn ensure_open(&self) -> Result<()> {
        if self.registry.lock().is_disposed() {
            Err(ReactiveError::Disposed { id: self.id })
        } else {
            Ok(())
        }
    }

    /// Return the cached value, recomputing first if it is stale.
    fn refresh(self: &Arc<Self>) -> Result<T> {
        {
            let cache = self.cache.lock();
            if !cache.dirty {
                if let Some(value) = &cache.value {
                    return Ok(value.clone());
                }
            }
        }

        if TrackingContext::is_running(self.id) {
            return Err(ReactiveError::Cycle { id: self.id });
        }

        let frame = TrackingFrame::enter(self.id);
        let result = (self.compute)();
        let mut sources = frame.finish();
        sources.shift_remove(&self.id);

        if self.registry.lock().is_disposed() {
            return Err(ReactiveError::Disposed { id: self.id });
        }

        // Subscribe even when the run failed, so a change to whatever caused
        // the failure still invalidates downstream nodes.
        let dependent = Arc::downgrade(self) as Weak<dyn Dependent>;
        self.dependencies.replace(self.id, &dependent, sources);

        let value = result?;
        let mut cache = self.cache.lock();
        let changed = match &cache.value {
            Some(old) => !self.options.is_equal(old, &value),
            None => true,
        };
        if changed {
            let old = mem::replace(&mut cache.value, Some(value.clone()));
            if old.is_some() {
                cache.previous = old;
            }
        }
        cache.dirty = false;

        trace!(
            id = %self.id,
            changed,
            dependencies = self.dependencies.len(),
            "derived signal recomputed"
        );
        Ok(value)
    }

    fn remove_listener(&self, id: NodeId) -> bool {
        let (removed, drained) = {
            let mut registry = self.registry.lock();
            let removed = registry.remove(id);
            (removed, removed && registry.is_drained())
        };

        if drained && self.options.auto_dispose {
            debug!(id = %self.id, "last listener removed, auto-disposing derived signal");
            self.dispose();
        }
        removed
    }

    fn dispose(&self) {
        let Some(hooks) = self.registry.lock().close() else {
            return;
        };
        self.dependencies.clear(self.id);
        {
            let mut cache = self.cache.lock();
            cache.value = None;
            cache.dirty = true;
        }
        debug!(id = %self.id, hooks = hooks.len(), "derived signal disposed");
        for hook in hooks {
            hook();
        }
    }
}

impl<T> Dependent for DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) -> Result<()> {
        let snapshot = {
            let registry = self.registry.lock();
            if registry.is_disposed() {
                return Ok(());
            }
            self.cache.lock().dirty = true;
            TrackingContext::mark_changed(self.id);
            if registry.is_empty() {
                return Ok(());
            }
            registry.snapshot()
        };

        trace!(id = %self.id, listeners = snapshot.len(), "derived signal invalidated");
        notify_all(snapshot)
    }
}

impl<T> Source for DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, id: NodeId, dependent: Weak<dyn Dependent>) {
        let _ = self.registry.lock().insert(id, Listener::Dependent(dependent));
    }

    fn unsubscribe(&self, id: NodeId) {
        self.remove_listener(id);
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        self.dependencies.clear(self.id);
    }
}

/// A cached read-only value computed from other signals.
///
/// Dependencies are discovered while the computation runs: whatever it
/// reads is what it depends on, and the set may differ from run to run.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Derived, Signal};
///
/// let a = Signal::new(1);
/// let source = a.clone();
/// let b = Derived::new(move || Ok(source.get()? * 2));
///
/// a.set(5).unwrap();
/// assert_eq!(b.get().unwrap(), 10);
/// ```
pub struct Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new derived signal with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::with_options(compute, SignalOptions::new())
    }
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a derived signal with explicit options.
    ///
    /// `equals` decides whether a recomputation changed the value, which is
    /// what moves [`Derived::previous_value`].
    pub fn with_options<F>(compute: F, options: SignalOptions<T>) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let id = NodeId::new();
        Self {
            inner: Arc::new(DerivedInner {
                id,
                compute: Box::new(compute),
                cache: Mutex::new(Cache {
                    value: None,
                    previous: None,
                    dirty: true,
                }),
                registry: Mutex::new(ListenerRegistry::new(id)),
                dependencies: Dependencies::new(),
                options,
            }),
        }
    }

    /// Get the derived signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    fn track(&self) {
        TrackingContext::track_read(self.inner.id, || {
            Arc::downgrade(&self.inner) as Weak<dyn Source>
        });
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a derived signal. Inside a
    /// tracked computation, the derived signal becomes a dependency of that
    /// computation, even when its own evaluation fails.
    pub fn get(&self) -> Result<T> {
        self.inner.ensure_open()?;
        self.track();
        self.inner.refresh()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> Result<T> {
        self.inner.ensure_open()?;
        self.inner.refresh()
    }

    /// Cached value held before the most recent recomputation that changed it.
    pub fn previous_value(&self) -> Option<T> {
        self.inner.cache.lock().previous.clone()
    }

    /// Get the current evaluation state.
    pub fn state(&self) -> DerivedState {
        if self.is_disposed() {
            DerivedState::Disposed
        } else if self.inner.cache.lock().dirty {
            DerivedState::Dirty
        } else {
            DerivedState::Clean
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.cache.lock().dirty
    }

    /// Check if the derived signal has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.cache.lock().value.is_some()
    }

    /// Get the number of signals read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.registry.lock().is_disposed()
    }

    /// Get the number of listeners, downstream dependents included.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Register a callback invoked whenever the value is invalidated.
    ///
    /// The callback runs before any recomputation; read the value from
    /// inside it to get the fresh result.
    pub fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.inner
            .registry
            .lock()
            .insert(id.key(), Listener::Callback(Arc::new(listener)))?;
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id.key())
    }

    /// Register a callback to run when the derived signal is disposed.
    pub fn on_dispose<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.registry.lock().on_dispose(Box::new(callback))
    }

    /// Dispose the derived signal.
    ///
    /// Unsubscribes from every dependency, drops the cached value and all
    /// listeners. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependency_count", &self.dependency_count())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl<T> ReadSignal<T> for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        Derived::id(self)
    }

    fn get(&self) -> Result<T> {
        Derived::get(self)
    }

    fn get_untracked(&self) -> Result<T> {
        Derived::get_untracked(self)
    }

    fn previous_value(&self) -> Option<T> {
        Derived::previous_value(self)
    }

    fn is_disposed(&self) -> bool {
        Derived::is_disposed(self)
    }

    fn listener_count(&self) -> usize {
        Derived::listener_count(self)
    }

    fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Derived::add_listener(self, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        Derived::remove_listener(self, id)
    }

    fn on_dispose<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        Derived::on_dispose(self, callback)
    }

    fn dispose(&self) {
        Derived::dispose(self)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted<T, F>(count: &Arc<AtomicUsize>, f: F) -> impl Fn() -> Result<T> + Send + Sync + 'static
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            f()
        }
    }

    #[test]
    fn derived_computes_on_first_access() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let derived = Derived::new(counted(&call_count, || Ok(42)));

        // Not computed yet
        assert!(!derived.has_value());
        assert_eq!(derived.state(), DerivedState::Dirty);
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(derived.get().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(derived.has_value());
        assert_eq!(derived.state(), DerivedState::Clean);
    }

    #[test]
    fn derived_caches_value_when_clean() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let source = Signal::new(3);
        let s = source.clone();
        let derived = Derived::new(counted(&call_count, move || Ok(s.get()? + 1)));

        assert_eq!(derived.get().unwrap(), 4);
        assert_eq!(derived.get().unwrap(), 4);
        assert_eq!(derived.get().unwrap(), 4);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_recomputes_after_source_change() {
        let a = Signal::new(1);
        let source = a.clone();
        let b = Derived::new(move || Ok(source.get()? * 2));

        assert_eq!(b.get().unwrap(), 2);
        a.set(5).unwrap();
        assert!(b.is_dirty());
        assert_eq!(b.get().unwrap(), 10);
        assert_eq!(b.previous_value(), Some(2));
    }

    #[test]
    fn first_read_after_write_sees_new_value() {
        let a = Signal::new(1);
        let source = a.clone();
        let b = Derived::new(move || Ok(source.get()? * 2));

        a.set(5).unwrap();
        assert_eq!(b.get().unwrap(), 10);
    }

    #[test]
    fn invalidation_does_not_recompute() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let a = Signal::new(1);
        let source = a.clone();
        let derived = Derived::new(counted(&call_count, move || source.get()));
        derived.get().unwrap();

        a.set(2).unwrap();
        a.set(3).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        assert_eq!(derived.get().unwrap(), 3);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidation_is_forwarded_to_listeners() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let notified = Arc::new(AtomicUsize::new(0));
        let a = Signal::new(1);
        let source = a.clone();
        let derived = Derived::new(counted(&call_count, move || source.get()));
        derived.get().unwrap();

        let notified_clone = notified.clone();
        derived
            .add_listener(move || {
                notified_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        a.set(2).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        // Still lazy: nobody read the value yet.
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependencies_follow_the_last_run() {
        let use_left = Signal::new(true);
        let left = Signal::new(1);
        let right = Signal::new(2);

        let (flag, l, r) = (use_left.clone(), left.clone(), right.clone());
        let derived = Derived::new(move || {
            if flag.get()? {
                l.get()
            } else {
                r.get()
            }
        });

        assert_eq!(derived.get().unwrap(), 1);
        assert_eq!(derived.dependency_count(), 2);
        assert_eq!(left.listener_count(), 1);
        assert_eq!(right.listener_count(), 0);

        use_left.set(false).unwrap();
        assert_eq!(derived.get().unwrap(), 2);
        assert_eq!(left.listener_count(), 0);
        assert_eq!(right.listener_count(), 1);

        // The stale dependency no longer invalidates.
        left.set(10).unwrap();
        assert!(!derived.is_dirty());
    }

    #[test]
    fn derived_depends_on_derived() {
        let base = Signal::new(5);
        let s = base.clone();
        let doubled = Derived::new(move || Ok(s.get()? * 2));
        let d = doubled.clone();
        let plus_ten = Derived::new(move || Ok(d.get()? + 10));

        assert_eq!(doubled.get().unwrap(), 10);
        assert_eq!(plus_ten.get().unwrap(), 20);

        base.set(10).unwrap();
        assert!(plus_ten.is_dirty());
        assert_eq!(plus_ten.get().unwrap(), 30);
        assert_eq!(doubled.listener_count(), 1);
    }

    #[test]
    fn diamond_recomputes_each_node_once() {
        let counts: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let a = Signal::new(1);

        let s = a.clone();
        let b = Derived::new(counted(&counts[0], move || Ok(s.get()? + 1)));
        let s = a.clone();
        let c = Derived::new(counted(&counts[1], move || Ok(s.get()? * 10)));
        let (b2, c2) = (b.clone(), c.clone());
        let d = Derived::new(counted(&counts[2], move || Ok(b2.get()? + c2.get()?)));

        assert_eq!(d.get().unwrap(), 12);
        a.set(2).unwrap();
        assert_eq!(d.get().unwrap(), 23);

        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn failed_evaluation_stays_dirty_and_retries() {
        let input = Signal::new(-1);
        let s = input.clone();
        let derived = Derived::new(move || {
            let v = s.get()?;
            if v < 0 {
                Err(ReactiveError::evaluation("negative input"))
            } else {
                Ok(v * 2)
            }
        });

        assert!(matches!(derived.get(), Err(ReactiveError::Evaluation(_))));
        assert!(derived.is_dirty());
        assert!(!derived.has_value());
        assert_eq!(TrackingContext::depth(), 0);

        // Still subscribed to the input that caused the failure.
        assert_eq!(input.listener_count(), 1);

        input.set(4).unwrap();
        assert_eq!(derived.get().unwrap(), 8);
        assert!(!derived.is_dirty());
    }

    #[test]
    fn reading_itself_is_a_cycle() {
        let slot: Arc<Mutex<Option<Derived<i32>>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let derived = Derived::new(move || match &*slot_clone.lock() {
            Some(me) => Ok(me.get()? + 1),
            None => Ok(0),
        });
        *slot.lock() = Some(derived.clone());

        let err = derived.get().unwrap_err();
        assert!(matches!(err, ReactiveError::Cycle { id } if id == derived.id()));
        assert_eq!(derived.listener_count(), 0);
        assert_eq!(TrackingContext::depth(), 0);

        slot.lock().take();
    }

    #[test]
    fn equal_recomputation_keeps_previous_value() {
        let a = Signal::new(4);
        let s = a.clone();
        let parity = Derived::new(move || Ok(s.get()? % 2));

        assert_eq!(parity.get().unwrap(), 0);
        a.set(6).unwrap();
        assert_eq!(parity.get().unwrap(), 0);
        assert_eq!(parity.previous_value(), None);

        a.set(7).unwrap();
        assert_eq!(parity.get().unwrap(), 1);
        assert_eq!(parity.previous_value(), Some(0));
    }

    #[test]
    fn dispose_unsubscribes_from_sources() {
        let a = Signal::new(1);
        let s = a.clone();
        let derived = Derived::new(move || s.get());
        derived.get().unwrap();
        assert_eq!(a.listener_count(), 1);

        let disposed = Arc::new(AtomicUsize::new(0));
        let disposed_clone = disposed.clone();
        derived
            .on_dispose(move || {
                disposed_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        derived.dispose();
        derived.dispose();

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(a.listener_count(), 0);
        assert_eq!(derived.state(), DerivedState::Disposed);
        assert!(derived.get().unwrap_err().is_disposed());
        assert!(derived.add_listener(|| {}).unwrap_err().is_disposed());
    }

    #[test]
    fn dropping_last_handle_unsubscribes() {
        let a = Signal::new(1);
        let s = a.clone();
        let derived = Derived::new(move || s.get());
        derived.get().unwrap();
        assert_eq!(a.listener_count(), 1);

        drop(derived);
        assert_eq!(a.listener_count(), 0);
    }

    #[test]
    fn auto_dispose_derived() {
        let derived = Derived::with_options(|| Ok(1), SignalOptions::new().auto_dispose(true));
        let id = derived.add_listener(|| {}).unwrap();
        assert!(!derived.is_disposed());

        derived.remove_listener(id);
        assert!(derived.is_disposed());
    }

    #[test]
    fn derived_clone_shares_state() {
        let derived1 = Derived::new(|| Ok(42));
        assert_eq!(derived1.get().unwrap(), 42);

        let derived2 = derived1.clone();
        assert_eq!(derived1.id(), derived2.id());
        assert!(derived2.has_value());
        assert_eq!(derived2.get().unwrap(), 42);
    }
}
