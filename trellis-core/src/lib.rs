//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive state
//! library. It implements:
//!
//! - Writable signals with configurable equality and auto-dispose
//! - Derived signals: lazily recomputed, memoized read-only values
//! - Effects: eager computations with cleanup between runs
//! - Automatic, dynamic dependency tracking
//!
//! Rendering bindings and data-fetching helpers sit on top of this crate.
//! They only need the listener API (`add_listener`/`remove_listener`) and
//! the read/write/dispose contract of [`reactive::ReadSignal`] and
//! [`reactive::WriteSignal`].
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: Reactive primitives and dependency tracking
//! - `error`: The crate-wide error type
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::{Derived, Effect, Signal};
//! use std::sync::{Arc, Mutex};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = Derived::new(move || Ok(source.get()? * 2));
//!
//! // Create an effect
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let (d, l) = (doubled.clone(), log.clone());
//! let _effect = Effect::new(move |_| {
//!     l.lock().unwrap().push(d.get()?);
//!     Ok(())
//! })?;
//!
//! // Update the signal
//! count.set(5)?;
//! // Effect automatically ran again
//! assert_eq!(*log.lock().unwrap(), vec![0, 10]);
//! # Ok::<(), trellis_core::ReactiveError>(())
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
