//! Reactive Runtime
//!
//! The runtime is the glue between nodes of the reactive graph. It defines
//! the two seams every node implements and the bookkeeping that keeps
//! subscriptions in sync with what a computation actually read.
//!
//! # How It Works
//!
//! 1. A [`Source`] is anything that can be read inside a tracked
//!    computation: writable signals and derived signals.
//!
//! 2. A [`Dependent`] is anything that runs a tracked computation and
//!    wants to hear about changes: derived signals and effects.
//!
//! 3. After each run, the dependent hands the freshly discovered source
//!    set to [`Dependencies::replace`], which unsubscribes from sources
//!    that were not read this time and subscribes to new ones.
//!
//! Links are weak in both directions. A source never keeps a dependent
//! alive, and a dependent never keeps a source alive.

use std::mem;
use std::sync::Weak;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::listener::NodeId;
use crate::error::Result;

/// A node that can be read inside a tracked computation.
pub(crate) trait Source: Send + Sync {
    /// Register `dependent` to be invalidated when this source changes.
    ///
    /// Subscribing to a disposed source is a no-op: it will never notify.
    fn subscribe(&self, id: NodeId, dependent: Weak<dyn Dependent>);

    /// Remove a dependent previously registered with [`Source::subscribe`].
    fn unsubscribe(&self, id: NodeId);
}

/// A node that can be notified when one of its sources changes.
pub(crate) trait Dependent: Send + Sync {
    /// React to a change in one of the sources.
    ///
    /// Derived signals mark themselves dirty and forward the notification.
    /// Effects re-run.
    fn invalidate(&self) -> Result<()>;
}

/// Sources discovered during one run, in first-read order.
pub(crate) type SourceSet = IndexMap<NodeId, Weak<dyn Source>>;

/// The current subscriptions of one dependent.
pub(crate) struct Dependencies {
    sources: Mutex<SourceSet>,
}

impl Dependencies {
    pub(crate) fn new() -> Self {
        Self {
            sources: Mutex::new(SourceSet::new()),
        }
    }

    /// Swap in the sources read by the latest run and diff subscriptions.
    ///
    /// Sources present in both sets keep their subscription untouched, so
    /// the dependent keeps its position in their notification order.
    pub(crate) fn replace(&self, owner: NodeId, dependent: &Weak<dyn Dependent>, fresh: SourceSet) {
        let previous = mem::replace(&mut *self.sources.lock(), fresh.clone());

        for (id, source) in &previous {
            if !fresh.contains_key(id) {
                if let Some(source) = source.upgrade() {
                    source.unsubscribe(owner);
                }
            }
        }

        for (id, source) in &fresh {
            if !previous.contains_key(id) {
                if let Some(source) = source.upgrade() {
                    source.subscribe(owner, dependent.clone());
                }
            }
        }
    }

    /// Drop every subscription.
    pub(crate) fn clear(&self, owner: NodeId) {
        let previous = mem::take(&mut *self.sources.lock());
        for source in previous.values() {
            if let Some(source) = source.upgrade() {
                source.unsubscribe(owner);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sources.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct MockSource {
        id: NodeId,
        subscribed: Mutex<Vec<NodeId>>,
    }

    impl MockSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(),
                subscribed: Mutex::new(Vec::new()),
            })
        }
    }

    impl Source for MockSource {
        fn subscribe(&self, id: NodeId, _dependent: Weak<dyn Dependent>) {
            self.subscribed.lock().push(id);
        }

        fn unsubscribe(&self, id: NodeId) {
            self.subscribed.lock().retain(|s| *s != id);
        }
    }

    struct MockDependent;

    impl Dependent for MockDependent {
        fn invalidate(&self) -> Result<()> {
            Ok(())
        }
    }

    fn set_of(sources: &[&Arc<MockSource>]) -> SourceSet {
        sources
            .iter()
            .map(|s| {
                let source: Arc<dyn Source> = Arc::<MockSource>::clone(*s);
                (s.id, Arc::downgrade(&source))
            })
            .collect()
    }

    #[test]
    fn replace_diffs_subscriptions() {
        let a = MockSource::new();
        let b = MockSource::new();
        let c = MockSource::new();

        let dependent: Arc<dyn Dependent> = Arc::new(MockDependent);
        let owner = NodeId::new();
        let weak = Arc::downgrade(&dependent);

        let deps = Dependencies::new();
        deps.replace(owner, &weak, set_of(&[&a, &b]));
        assert_eq!(*a.subscribed.lock(), vec![owner]);
        assert_eq!(*b.subscribed.lock(), vec![owner]);
        assert_eq!(deps.len(), 2);

        // Second run reads b and c. a is stale, b is kept as is.
        deps.replace(owner, &weak, set_of(&[&b, &c]));
        assert!(a.subscribed.lock().is_empty());
        assert_eq!(*b.subscribed.lock(), vec![owner]);
        assert_eq!(*c.subscribed.lock(), vec![owner]);

        deps.clear(owner);
        assert!(b.subscribed.lock().is_empty());
        assert!(c.subscribed.lock().is_empty());
        assert_eq!(deps.len(), 0);
    }

    #[test]
    fn dropped_sources_are_ignored() {
        let a = MockSource::new();
        let set = set_of(&[&a]);
        drop(a);

        let dependent: Arc<dyn Dependent> = Arc::new(MockDependent);
        let owner = NodeId::new();
        let deps = Dependencies::new();
        deps.replace(owner, &Arc::downgrade(&dependent), set);
        deps.clear(owner);
    }
}
