//! Error types for the reactive system.
//!
//! All failures are synchronous. A read or write on a disposed signal fails
//! immediately, and an error raised inside a derived or effect computation
//! is returned to whichever call triggered the evaluation.

use thiserror::Error;

use crate::reactive::NodeId;

/// Boxed error produced by user code inside a computation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors raised by signals, derived signals and effects.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// The signal was disposed and can no longer be read, written or
    /// subscribed to.
    #[error("signal {id} has been disposed")]
    Disposed { id: NodeId },

    /// A derived signal read itself while it was being evaluated.
    #[error("derived signal {id} depends on itself")]
    Cycle { id: NodeId },

    /// An effect kept changing its own dependencies and never settled.
    #[error("effect {id} did not settle after {passes} passes")]
    Unsettled { id: NodeId, passes: usize },

    /// A derived or effect function failed.
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] BoxError),
}

impl ReactiveError {
    /// Wrap an arbitrary error or message as an evaluation failure.
    pub fn evaluation(err: impl Into<BoxError>) -> Self {
        Self::Evaluation(err.into())
    }

    /// Whether this error reports a disposed signal.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}
