//! Tracking Context
//!
//! The tracking context records which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! it is added to the dependency set of the computation on top of the stack.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running a derived signal or an
//! effect pushes a frame; finishing it pops the frame and hands back the
//! sources that were read. Nested computations push their own frame, so a
//! derived signal evaluated inside an effect is recorded as a dependency of
//! the effect while its own reads stay in its own frame.
//!
//! Frames are popped by a guard. A computation that returns an error or
//! panics still leaves the stack as it found it.

use std::cell::RefCell;
use std::sync::Weak;

use super::listener::NodeId;
use super::runtime::{Source, SourceSet};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the tracking stack.
struct Frame {
    /// The computation that owns this frame. `None` marks an untracked
    /// region opened by [`untrack`].
    owner: Option<NodeId>,
    /// Sources read during this run, deduplicated by identity.
    sources: SourceSet,
    /// Set when a source already in `sources` changed before the run ended.
    stale: bool,
}

/// Guard that pops its frame when dropped.
pub(crate) struct TrackingFrame {
    owner: Option<NodeId>,
    active: bool,
}

impl TrackingFrame {
    /// Push a new frame for the computation `owner`.
    pub(crate) fn enter(owner: NodeId) -> Self {
        Self::push(Some(owner))
    }

    fn suspend() -> Self {
        Self::push(None)
    }

    fn push(owner: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                owner,
                sources: SourceSet::new(),
                stale: false,
            });
        });
        Self {
            owner,
            active: true,
        }
    }

    /// Pop the frame and return the sources read while it was on top.
    pub(crate) fn finish(self) -> SourceSet {
        self.finish_with_writes().0
    }

    /// Like [`TrackingFrame::finish`], also reporting whether a source
    /// read by this run changed before the run ended.
    pub(crate) fn finish_with_writes(mut self) -> (SourceSet, bool) {
        self.active = false;
        self.pop()
            .map(|frame| (frame.sources, frame.stale))
            .unwrap_or_default()
    }

    fn pop(&self) -> Option<Frame> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right frame.
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.owner, self.owner,
                "TrackingFrame mismatch: expected {:?}, got {:?}",
                self.owner, frame.owner
            );
        }
        popped
    }
}

impl Drop for TrackingFrame {
    fn drop(&mut self) {
        if self.active {
            self.pop();
        }
    }
}

/// Read-only view of the current thread's tracking stack.
pub struct TrackingContext;

impl TrackingContext {
    /// Check whether a read right now would be recorded as a dependency.
    pub fn is_tracking() -> bool {
        Self::current_owner().is_some()
    }

    /// The computation that reads are currently attributed to, if any.
    pub fn current_owner() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.owner))
    }

    /// Number of frames on the stack, untracked regions included.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Whether `id` is running anywhere on this thread's stack.
    pub(crate) fn is_running(id: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|frame| frame.owner == Some(id))
        })
    }

    /// Record a read of the source `id` in the top frame.
    ///
    /// `source` is only called when the read is tracked and `id` has not been
    /// seen in this run yet.
    pub(crate) fn track_read(id: NodeId, source: impl FnOnce() -> Weak<dyn Source>) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(frame) = stack.last_mut() {
                if frame.owner.is_some() && !frame.sources.contains_key(&id) {
                    frame.sources.insert(id, source());
                }
            }
        });
    }

    /// Flag every running computation that already read `id` as stale.
    pub(crate) fn mark_changed(id: NodeId) {
        CONTEXT_STACK.with(|stack| {
            for frame in stack.borrow_mut().iter_mut() {
                if frame.sources.contains_key(&id) {
                    frame.stale = true;
                }
            }
        });
    }
}

/// Run `f` without recording any reads it performs as dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _frame = TrackingFrame::suspend();
    f()
}
