//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs synchronously, before
//!    the write that changed the dependency returns.
//!
//! 3. Each run tracks its own reads. Subscriptions are diffed against the
//!    previous run, so dependencies may change from run to run.
//!
//! # Use Cases
//!
//! Effects are used to synchronize reactive state with the outside world:
//!
//! - Updating a view when state changes
//! - Logging state changes
//! - Triggering a refetch
//!
//! # Differences from Derived
//!
//! - Derived signals return a value; effects do not.
//! - Derived signals are lazy (compute on access); effects are eager.
//! - Derived signals cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! The effect function receives an [`EffectContext`] and may register
//! cleanup callbacks on it. They run right before the next run and once
//! more when the effect is disposed.
//!
//! # Writing Own Dependencies
//!
//! An effect may write a signal it reads. The nested notification does not
//! recurse; instead the effect runs again once the current run returns, until
//! a run leaves every value it read unchanged.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::context::{TrackingContext, TrackingFrame};
use super::listener::NodeId;
use super::runtime::{Dependencies, Dependent};
use crate::error::{ReactiveError, Result};

/// Upper bound on back-to-back runs triggered by the effect's own writes.
const MAX_PASSES: usize = 100;

type Cleanup = Box<dyn FnOnce() + Send>;
type RunFn = Box<dyn Fn(&mut EffectContext) -> Result<()> + Send + Sync>;

/// Handle passed to an effect function on every run.
pub struct EffectContext {
    cleanups: Vec<Cleanup>,
    run: usize,
}

impl EffectContext {
    /// Register a callback to run before the next run, or on disposal.
    ///
    /// Several callbacks run in registration order.
    pub fn on_cleanup<F>(&mut self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Zero-based index of the current run.
    pub fn run_index(&self) -> usize {
        self.run
    }
}

impl fmt::Debug for EffectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectContext")
            .field("run", &self.run)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

struct EffectInner {
    id: NodeId,
    run: RunFn,
    cleanups: Mutex<Vec<Cleanup>>,
    dependencies: Dependencies,
    disposed: AtomicBool,
    pending: AtomicBool,
    run_count: AtomicUsize,
    this: Weak<EffectInner>,
}

impl EffectInner {
    fn execute(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        if TrackingContext::is_running(self.id) {
            self.pending.store(true, Ordering::SeqCst);
            trace!(id = %self.id, "effect notified while running, queued another pass");
            return Ok(());
        }

        let mut passes = 0;
        while self.run_once()? {
            passes += 1;
            if passes >= MAX_PASSES {
                warn!(id = %self.id, passes, "effect keeps invalidating itself, giving up");
                return Err(ReactiveError::Unsettled { id: self.id, passes });
            }
        }
        Ok(())
    }

    /// Run the effect function once. Returns whether the run read a value
    /// that changed before it finished, so another pass is needed.
    fn run_once(&self) -> Result<bool> {
        self.pending.store(false, Ordering::SeqCst);
        self.run_cleanups();

        let mut cx = EffectContext {
            cleanups: Vec::new(),
            run: self.run_count.load(Ordering::SeqCst),
        };

        // Enter a tracking frame to record dependencies
        let frame = TrackingFrame::enter(self.id);
        let result = (self.run)(&mut cx);
        let (sources, wrote) = frame.finish_with_writes();

        self.run_count.fetch_add(1, Ordering::SeqCst);

        if self.disposed.load(Ordering::SeqCst) {
            // Disposed from inside its own run: nothing to resubscribe, and
            // the cleanups of this run have no later run to wait for.
            for cleanup in cx.cleanups {
                cleanup();
            }
            return result.map(|()| false);
        }

        *self.cleanups.lock() = cx.cleanups;
        let dependent = self.this.clone() as Weak<dyn Dependent>;
        self.dependencies.replace(self.id, &dependent, sources);

        trace!(
            id = %self.id,
            run = cx.run,
            dependencies = self.dependencies.len(),
            ok = result.is_ok(),
            "effect ran"
        );
        result?;

        let pending = self.pending.swap(false, Ordering::SeqCst);
        Ok(wrote || pending)
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.run_cleanups();
        self.dependencies.clear(self.id);
        debug!(id = %self.id, runs = self.run_count.load(Ordering::SeqCst), "effect disposed");
    }
}

impl Dependent for EffectInner {
    fn invalidate(&self) -> Result<()> {
        self.execute()
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Clones share the same effect. Dropping the last handle disposes it.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
///
/// let source = count.clone();
/// let _effect = Effect::new(move |_| {
///     println!("Count is: {}", source.get()?);
///     Ok(())
/// })
/// .unwrap();
///
/// count.set(5).unwrap();  // Prints: "Count is: 5"
/// ```
#[must_use = "dropping an Effect disposes it"]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies. An
    /// error from that first run is returned and the effect is dropped.
    pub fn new<F>(run: F) -> Result<Self>
    where
        F: Fn(&mut EffectContext) -> Result<()> + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);

        // Run immediately to establish dependencies
        effect.execute()?;

        Ok(effect)
    }

    /// Create a new effect without running it immediately.
    ///
    /// The effect has no dependencies, and therefore never re-runs, until
    /// [`Effect::execute`] is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn(&mut EffectContext) -> Result<()> + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| EffectInner {
            id: NodeId::new(),
            run: Box::new(run),
            cleanups: Mutex::new(Vec::new()),
            dependencies: Dependencies::new(),
            disposed: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Execute the effect function now.
    ///
    /// Runs pending cleanups first, then the function inside a fresh
    /// tracking frame. Does nothing once the effect is disposed.
    pub fn execute(&self) -> Result<()> {
        self.inner.execute()
    }

    /// Dispose of the effect.
    ///
    /// Runs the pending cleanups and unsubscribes from every dependency.
    /// After disposal, the effect will not run again.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
