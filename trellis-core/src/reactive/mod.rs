//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, derived
//! signals, and effects. These primitives form the foundation of Trellis's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracked computation (such as a derived signal or effect), the
//! signal is recorded as a dependency of that computation. When the signal's
//! value changes, all dependents are notified.
//!
//! ## Derived Signals
//!
//! A Derived signal is a read-only value that caches its result. It
//! re-evaluates only when one of its dependencies changed and it is read
//! again. Derived signals are useful for expensive computations that should
//! not be repeated unnecessarily.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems, such as updating a view or logging.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking stack to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking frame and, if so, record the read. After the computation, its
//! subscriptions are diffed against the set it read.
//!
//! Propagation is synchronous: a write returns only after every dependent
//! effect has re-run. There is no batching.

mod context;
mod derived;
mod effect;
mod listener;
mod options;
mod runtime;
mod signal;
mod traits;

pub use context::{untrack, TrackingContext};
pub use derived::{Derived, DerivedState};
pub use effect::{Effect, EffectContext};
pub use listener::{ListenerId, NodeId};
pub use options::{EqualityMode, EqualsFn, SignalConfig, SignalOptions};
pub use signal::{ReadOnlySignal, Signal};
pub use traits::{ReadSignal, WriteSignal};

use crate::error::Result;

/// Shorthand for [`Signal::new`].
pub fn signal<T>(value: T) -> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    Signal::new(value)
}

/// Shorthand for [`Derived::new`].
pub fn derived<T, F>(compute: F) -> Derived<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn() -> Result<T> + Send + Sync + 'static,
{
    Derived::new(compute)
}

/// Shorthand for [`Effect::new`].
pub fn effect<F>(run: F) -> Result<Effect>
where
    F: Fn(&mut EffectContext) -> Result<()> + Send + Sync + 'static,
{
    Effect::new(run)
}
