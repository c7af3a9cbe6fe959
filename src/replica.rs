use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::document::Document;
use crate::engine::{DocumentEngine, UpdateOrigin};
use crate::error::DocError;
use crate::update::ClientId;

/// Handle returned by [`Replica::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ChangeCallback = Rc<dyn Fn(&[u8], UpdateOrigin)>;

/// One simulated participant: a named owner of a single CRDT document.
///
/// The document is exposed through two views sharing one history: the shared
/// text and a map of per-peer counters. Every change applied to the document,
/// local or imported, is announced to subscribers together with its delta
/// and an [`UpdateOrigin`].
///
/// Notifications are delivered after the document borrow is released, so a
/// subscriber may read this replica or mutate another one.
///
/// # Example
///
/// ```
/// use replica_sync::prelude::*;
///
/// let alice = Replica::new("alice");
/// let bob = Replica::new("bob");
///
/// alice.insert_text(0, "hello").unwrap();
/// let delta = alice.delta_since(&bob.state_vector().unwrap()).unwrap();
/// bob.apply_remote_update(&delta, UpdateOrigin::Remote).unwrap();
///
/// assert_eq!(bob.text(), "hello");
/// ```
pub struct Replica<D: DocumentEngine = Document> {
    name: String,
    doc: RefCell<D>,
    subscribers: RefCell<Vec<(SubscriptionId, ChangeCallback)>>,
    next_subscription: Cell<u64>,
}

impl Replica<Document> {
    /// Create a replica backed by a fresh [`Document`] with a random client id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_engine(name, Document::new())
    }
}

impl<D: DocumentEngine> Replica<D> {
    /// Create a replica around an existing document.
    pub fn with_engine(name: impl Into<String>, doc: D) -> Self {
        Self {
            name: name.into(),
            doc: RefCell::new(doc),
            subscribers: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
        }
    }

    /// Human-readable name; also the key of this replica's own counter.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier the document engine assigned to this replica.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.doc.borrow().client_id()
    }

    // ---- shared text ----

    /// Insert `text` at visible `index`.
    pub fn insert_text(&self, index: usize, text: &str) -> Result<(), DocError> {
        let delta = self.doc.borrow_mut().insert_text(index, text)?;
        if let Some(delta) = delta {
            self.notify(&delta, UpdateOrigin::Local);
        }
        Ok(())
    }

    /// Delete `len` visible characters starting at `index`.
    pub fn delete_text(&self, index: usize, len: usize) -> Result<(), DocError> {
        let delta = self.doc.borrow_mut().delete_text(index, len)?;
        if let Some(delta) = delta {
            self.notify(&delta, UpdateOrigin::Local);
        }
        Ok(())
    }

    /// Current content of the shared text.
    #[must_use]
    pub fn text(&self) -> String {
        self.doc.borrow().text()
    }

    /// Number of visible characters in the shared text.
    #[must_use]
    pub fn text_len(&self) -> usize {
        self.doc.borrow().text_len()
    }

    // ---- counters ----

    /// Set a counter key to `value`.
    pub fn set_counter(&self, key: &str, value: i64) -> Result<(), DocError> {
        let delta = self.doc.borrow_mut().set_entry(key, value)?;
        self.notify(&delta, UpdateOrigin::Local);
        Ok(())
    }

    /// Add `by` (which may be negative) to this replica's own counter.
    ///
    /// Only this replica writes the key named after it, so concurrent
    /// increments on other replicas can never overwrite each other.
    pub fn increment_counter(&self, by: i64) -> Result<(), DocError> {
        let next = self
            .counter(&self.name)
            .checked_add(by)
            .ok_or_else(|| DocError::CounterOverflow {
                key: self.name.clone(),
            })?;
        self.set_counter(&self.name, next)
    }

    /// Value of a counter key; 0 if it was never set.
    #[must_use]
    pub fn counter(&self, key: &str) -> i64 {
        self.doc.borrow().entry(key).unwrap_or(0)
    }

    /// Snapshot of every counter.
    #[must_use]
    pub fn counters(&self) -> BTreeMap<String, i64> {
        self.doc.borrow().entries()
    }

    /// Sum of all counters; 0 when there are none.
    ///
    /// Saturates at the `i64` bounds.
    #[must_use]
    pub fn counter_total(&self) -> i64 {
        self.doc
            .borrow()
            .entries()
            .values()
            .fold(0i64, |total, &v| total.saturating_add(v))
    }

    // ---- sync primitives ----

    /// Merge a delta produced by another replica of the same document.
    ///
    /// Subscribers are notified with `origin` only if the delta brought in
    /// something new.
    pub fn apply_remote_update(&self, delta: &[u8], origin: UpdateOrigin) -> Result<(), DocError> {
        let changed = self.doc.borrow_mut().apply_update(delta)?;
        if changed {
            self.notify(delta, origin);
        }
        Ok(())
    }

    /// Opaque summary of the history this replica has seen.
    pub fn state_vector(&self) -> Result<Vec<u8>, DocError> {
        self.doc.borrow().state_vector()
    }

    /// Minimal delta holding what this replica has and `remote_state_vector` lacks.
    pub fn delta_since(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocError> {
        self.doc.borrow().encode_state_as_update(remote_state_vector)
    }

    // ---- change subscription ----

    /// Register a callback for every change applied to the document.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[u8], UpdateOrigin) + 'static,
    {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        let callback: ChangeCallback = Rc::new(callback);
        self.subscribers.borrow_mut().push((id, callback));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn off_change(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Number of registered change callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn notify(&self, delta: &[u8], origin: UpdateOrigin) {
        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(delta, origin);
        }
    }
}

impl<D: DocumentEngine> fmt::Debug for Replica<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("name", &self.name)
            .field("client_id", &self.client_id())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
