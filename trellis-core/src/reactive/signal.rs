//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracked computation (derived/effect),
//!    the read is recorded in the computation's tracking frame. Once the
//!    computation finishes, it subscribes to the signal.
//!
//! 2. When a write changes the value (under the signal's equality policy),
//!    every listener is notified in subscription order.
//!
//! 3. Notifications invalidate derived signals and re-run effects before
//!    the write returns.
//!
//! # Thread Safety
//!
//! Signal handles are `Send + Sync`: the value sits behind a `RwLock` and the
//! listener registry behind a `Mutex`. Dependency tracking is per-thread.
//! No lock is held while listeners or dispose callbacks run.

use std::fmt::Debug;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::context::TrackingContext;
use super::listener::{notify_all, Listener, ListenerId, ListenerRegistry, NodeId};
use super::options::SignalOptions;
use super::runtime::{Dependent, Source};
use super::traits::{ReadSignal, WriteSignal};
use crate::error::{ReactiveError, Result};

struct SignalState<T> {
    value: T,
    previous: Option<T>,
}

/// Shared state behind every clone of a [`Signal`].
pub(crate) struct SignalInner<T> {
    id: NodeId,
    state: RwLock<SignalState<T>>,
    registry: Mutex<ListenerRegistry>,
    options: SignalOptions<T>,
}

impl<T> SignalInner<T>
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

    fn remove_listener(&self, id: NodeId) -> bool {
        let (removed, drained) = {
            let mut registry = self.registry.lock();
            let removed = registry.remove(id);
            (removed, removed && registry.is_drained())
        };

        if drained && self.options.auto_dispose {
            debug!(id = %self.id, "last listener removed, auto-disposing signal");
            self.dispose();
        }
        removed
    }

    fn dispose(&self) {
        let Some(hooks) = self.registry.lock().close() else {
            return;
        };
        debug!(id = %self.id, hooks = hooks.len(), "signal disposed");
        for hook in hooks {
            hook();
        }
    }
}

impl<T> Source for SignalInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, id: NodeId, dependent: Weak<dyn Dependent>) {
        // A disposed signal never notifies, so there is nothing to join.
        let _ = self.registry.lock().insert(id, Listener::Dependent(dependent));
    }

    fn unsubscribe(&self, id: NodeId) {
        self.remove_listener(id);
    }
}

/// A writable reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get().unwrap(), 0);
///
/// // Update the value (notifies listeners)
/// count.set(5).unwrap();
/// assert_eq!(count.previous_value(), Some(0));
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new signal with the given initial value and default options.
    pub fn new(value: T) -> Self {
        Self::with_options(value, SignalOptions::new())
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with explicit options.
    pub fn with_options(value: T, options: SignalOptions<T>) -> Self {
        let id = NodeId::new();
        Self {
            inner: Arc::new(SignalInner {
                id,
                state: RwLock::new(SignalState {
                    value,
                    previous: None,
                }),
                registry: Mutex::new(ListenerRegistry::new(id)),
                options,
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn options(&self) -> &SignalOptions<T> {
        &self.inner.options
    }

    fn track(&self) {
        TrackingContext::track_read(self.inner.id, || {
            Arc::downgrade(&self.inner) as Weak<dyn Source>
        });
    }

    /// Get the current value.
    ///
    /// If called within a tracked computation, this also records the signal
    /// as a dependency of that computation.
    pub fn get(&self) -> Result<T> {
        self.inner.ensure_open()?;
        self.track();
        Ok(self.inner.state.read().value.clone())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> Result<T> {
        self.inner.ensure_open()?;
        Ok(self.inner.state.read().value.clone())
    }

    /// Access the current value by reference without cloning.
    ///
    /// Tracked like [`Signal::get`]. `f` must not write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.ensure_open()?;
        self.track();
        let state = self.inner.state.read_recursive();
        Ok(f(&state.value))
    }

    /// Set a new value and notify listeners if it changed.
    ///
    /// Returns `Ok(false)` when `value` equals the current value under the
    /// signal's equality: nothing is stored and nobody is notified. Dependent
    /// effects re-run before this call returns; the first error raised by
    /// one of them is returned after every listener has been notified.
    pub fn set(&self, value: T) -> Result<bool> {
        self.inner.ensure_open()?;

        let unchanged = {
            let state = self.inner.state.read();
            self.inner.options.is_equal(&state.value, &value)
        };
        if unchanged {
            return Ok(false);
        }

        {
            let mut state = self.inner.state.write();
            let old = mem::replace(&mut state.value, value);
            state.previous = Some(old);
        }
        TrackingContext::mark_changed(self.inner.id);

        let snapshot = self.inner.registry.lock().snapshot();
        trace!(id = %self.inner.id, listeners = snapshot.len(), "signal changed");
        notify_all(snapshot)?;
        Ok(true)
    }

    /// Update the value using a function of the current value.
    ///
    /// The read is untracked, so an effect may update a signal it does not
    /// otherwise depend on without subscribing to it.
    pub fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked()?;
        self.set(f(&current))
    }

    /// Value held immediately before the most recent effective write.
    pub fn previous_value(&self) -> Option<T> {
        self.inner.state.read().previous.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.registry.lock().is_disposed()
    }

    /// Get the number of listeners, dependents included.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Register a callback invoked after every effective write.
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

    /// Remove a listener.
    ///
    /// With auto-dispose enabled, removing the last listener disposes the
    /// signal.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id.key())
    }

    /// Register a callback to run when the signal is disposed.
    pub fn on_dispose<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.registry.lock().on_dispose(Box::new(callback))
    }

    /// Dispose the signal.
    ///
    /// Runs dispose callbacks in registration order and drops every listener.
    /// Afterwards reads, writes and new listeners fail with
    /// [`ReactiveError::Disposed`]. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// A handle that can read this signal but not write it.
    pub fn read_only(&self) -> ReadOnlySignal<T> {
        ReadOnlySignal {
            signal: self.clone(),
        }
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &state.value)
            .field("disposed", &self.is_disposed())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl<T> ReadSignal<T> for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        Signal::id(self)
    }

    fn get(&self) -> Result<T> {
        Signal::get(self)
    }

    fn get_untracked(&self) -> Result<T> {
        Signal::get_untracked(self)
    }

    fn previous_value(&self) -> Option<T> {
        Signal::previous_value(self)
    }

    fn is_disposed(&self) -> bool {
        Signal::is_disposed(self)
    }

    fn listener_count(&self) -> usize {
        Signal::listener_count(self)
    }

    fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Signal::add_listener(self, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        Signal::remove_listener(self, id)
    }

    fn on_dispose<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        Signal::on_dispose(self, callback)
    }

    fn dispose(&self) {
        Signal::dispose(self)
    }
}

impl<T> WriteSignal<T> for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn set(&self, value: T) -> Result<bool> {
        Signal::set(self, value)
    }

    fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&T) -> T,
    {
        Signal::update(self, f)
    }
}

/// Read-only view of a [`Signal`].
///
/// Hand this to code that should observe a value without being able to
/// change it. Disposing through the view disposes the underlying signal.
pub struct ReadOnlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    signal: Signal<T>,
}

impl<T> Clone for ReadOnlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T> Debug for ReadOnlySignal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadOnlySignal").field(&self.signal).finish()
    }
}

impl<T> From<Signal<T>> for ReadOnlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(signal: Signal<T>) -> Self {
        Self { signal }
    }
}

impl<T> ReadSignal<T> for ReadOnlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.signal.id()
    }

    fn get(&self) -> Result<T> {
        self.signal.get()
    }

    fn get_untracked(&self) -> Result<T> {
        self.signal.get_untracked()
    }

    fn previous_value(&self) -> Option<T> {
        self.signal.previous_value()
    }

    fn is_disposed(&self) -> bool {
        self.signal.is_disposed()
    }

    fn listener_count(&self) -> usize {
        self.signal.listener_count()
    }

    fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.signal.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.signal.remove_listener(id)
    }

    fn on_dispose<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.signal.on_dispose(callback)
    }

    fn dispose(&self) {
        self.signal.dispose()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
