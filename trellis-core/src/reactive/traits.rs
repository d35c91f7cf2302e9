//! Capability traits shared by every signal type.
//!
//! Consumers that only need to observe a value (render bindings, fetch
//! helpers) should accept `impl ReadSignal<T>`; code that also writes takes
//! `impl WriteSignal<T>`.

use super::listener::{ListenerId, NodeId};
use crate::error::Result;

/// Read side of a signal.
pub trait ReadSignal<T> {
    /// Unique identifier of the underlying node.
    fn id(&self) -> NodeId;

    /// Current value. Inside a tracked computation, records this signal as
    /// a dependency.
    fn get(&self) -> Result<T>;

    /// Current value without recording a dependency.
    fn get_untracked(&self) -> Result<T>;

    /// Alias for [`ReadSignal::get`].
    fn call(&self) -> Result<T> {
        self.get()
    }

    /// Value held immediately before the most recent change, if any.
    fn previous_value(&self) -> Option<T>;

    fn is_disposed(&self) -> bool;

    /// Number of callbacks and dependents currently subscribed.
    fn listener_count(&self) -> usize;

    /// Register `listener` to be called after every change.
    fn add_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static;

    /// Remove a listener. Returns whether it was registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Register a callback to run once when the signal is disposed.
    fn on_dispose<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static;

    /// Dispose the signal. Disposing twice is a no-op.
    fn dispose(&self);
}

/// Write side of a signal.
pub trait WriteSignal<T>: ReadSignal<T> {
    /// Store `value`. Returns whether the write was effective, i.e. the new
    /// value differs from the old one under the signal's equality.
    fn set(&self, value: T) -> Result<bool>;

    /// Replace the value with `f(current)` in one step.
    fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&T) -> T;
}
