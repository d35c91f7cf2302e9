//! Listener types for the reactive system.
//!
//! Every readable node (signal or derived signal) owns a
//! [`ListenerRegistry`]: an insertion-ordered set of callbacks and
//! dependents that are told when the node changes. The registry also owns
//! the node's disposal state, because disposing a node is defined as
//! closing its registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::runtime::Dependent;
use crate::error::{ReactiveError, Result};

/// Unique identifier for a node in the reactive graph.
///
/// Signals, derived signals, effects and plain listener callbacks all draw
/// their IDs from the same counter, so an ID never aliases across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token returned by `add_listener`, used to remove the listener again.
///
/// Only `add_listener` hands these out, so a node ID can never be used to
/// detach a dependent that subscribed internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(NodeId);

impl ListenerId {
    pub(crate) fn new() -> Self {
        Self(NodeId::new())
    }

    /// Registry key this token was stored under.
    pub(crate) fn key(self) -> NodeId {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener {}", self.0)
    }
}

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;
pub(crate) type DisposeHook = Box<dyn FnOnce() + Send>;

/// A single entry in a listener registry.
#[derive(Clone)]
pub(crate) enum Listener {
    /// A user callback added through `add_listener`.
    Callback(Callback),
    /// A derived signal or effect that read the node during its last run.
    /// Held weakly: the registry never keeps a dependent alive.
    Dependent(Weak<dyn Dependent>),
}

impl Listener {
    fn notify(&self) -> Result<()> {
        match self {
            Listener::Callback(callback) => {
                callback();
                Ok(())
            }
            Listener::Dependent(weak) => match weak.upgrade() {
                Some(dependent) => dependent.invalidate(),
                None => Ok(()),
            },
        }
    }
}

/// Listeners captured before a notification pass.
pub(crate) type Snapshot = SmallVec<[Listener; 4]>;

/// Deliver a notification to every listener in `snapshot`, in order.
///
/// A failing dependent does not stop the pass. The first error is
/// returned once every listener has been told.
pub(crate) fn notify_all(snapshot: Snapshot) -> Result<()> {
    let mut first_error = None;
    for listener in &snapshot {
        if let Err(err) = listener.notify() {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Ordered listener set plus disposal bookkeeping for one node.
pub(crate) struct ListenerRegistry {
    owner: NodeId,
    listeners: IndexMap<NodeId, Listener>,
    dispose_hooks: Vec<DisposeHook>,
    had_listeners: bool,
    disposed: bool,
}

impl ListenerRegistry {
    pub(crate) fn new(owner: NodeId) -> Self {
        Self {
            owner,
            listeners: IndexMap::new(),
            dispose_hooks: Vec::new(),
            had_listeners: false,
            disposed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed {
            Err(ReactiveError::Disposed { id: self.owner })
        } else {
            Ok(())
        }
    }

    /// Insert or replace the listener stored under `id`.
    ///
    /// Replacing keeps the original position, so a dependent that
    /// resubscribes keeps its place in notification order.
    pub(crate) fn insert(&mut self, id: NodeId, listener: Listener) -> Result<()> {
        self.ensure_open()?;
        self.listeners.insert(id, listener);
        self.had_listeners = true;
        Ok(())
    }

    /// Remove the listener stored under `id`. Returns whether it existed.
    pub(crate) fn remove(&mut self, id: NodeId) -> bool {
        self.listeners.shift_remove(&id).is_some()
    }

    /// True once the registry has had listeners and lost all of them.
    pub(crate) fn is_drained(&self) -> bool {
        self.had_listeners && self.listeners.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.listeners.values().cloned().collect()
    }

    pub(crate) fn on_dispose(&mut self, hook: DisposeHook) -> Result<()> {
        self.ensure_open()?;
        self.dispose_hooks.push(hook);
        Ok(())
    }

    /// Mark the registry disposed and drop every listener.
    ///
    /// Returns the dispose hooks in registration order, or `None` when the
    /// registry was already disposed. The caller runs the hooks after
    /// releasing its lock.
    pub(crate) fn close(&mut self) -> Option<Vec<DisposeHook>> {
        if self.disposed {
            return None;
        }
        self.disposed = true;
        self.listeners.clear();
        Some(std::mem::take(&mut self.dispose_hooks))
    }
}
