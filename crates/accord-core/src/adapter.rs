//! Source adapter contract and subscription plumbing
//!
//! A source adapter wraps one backing value. The section store and the
//! orchestrator only ever talk to backing stores through this trait.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::{AccordError, AccordResult};

/// Change notification callback
pub type Callback = Rc<dyn Fn()>;

/// Shared, type-erased adapter
pub type SharedAdapter<T> = Rc<dyn SourceAdapter<T>>;

/// Minimal capability contract for a backing store
pub trait SourceAdapter<T> {
    /// Short adapter family name ("atom", "external", "orchestrated", ...)
    fn kind(&self) -> &str;

    /// Current backing value
    fn get(&self) -> T;

    /// Replace the backing value
    fn set(&self, next: T);

    /// Whether [`SourceAdapter::patch`] is implemented natively
    fn supports_patch(&self) -> bool {
        false
    }

    /// Apply a partial update natively
    fn patch(&self, partial: T) -> AccordResult<()> {
        let _ = partial;
        Err(AccordError::UnsupportedPatch(self.kind().to_string()))
    }

    /// Register a change listener
    fn subscribe(&self, callback: Callback) -> Subscription;

    /// Release backing resources
    fn destroy(&self) {}
}

/// Handle returned by every `subscribe`
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to undo
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    /// Remove the listener
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct SubscriberList {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// Ordered set of change listeners
#[derive(Clone, Default)]
pub struct SubscriberSet {
    inner: Rc<RefCell<SubscriberList>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        SubscriberSet::default()
    }

    /// Add a listener
    pub fn subscribe(&self, callback: Callback) -> Subscription {
        let id = {
            let mut list = self.inner.borrow_mut();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, callback));
            id
        };

        let weak: Weak<RefCell<SubscriberList>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().entries.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Invoke every listener registered at the time of the call.
    /// Listeners may subscribe or unsubscribe while being notified.
    pub fn notify(&self) {
        let callbacks: Vec<Callback> = self
            .inner
            .borrow()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            callback();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.inner.borrow_mut().entries.clear();
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_subscribe_notify_unsubscribe() {
        let set = SubscriberSet::new();
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        let sub = set.subscribe(Rc::new(move || h.set(h.get() + 1)));

        set.notify();
        set.notify();
        assert_eq!(hits.get(), 2);

        sub.unsubscribe();
        set.notify();
        assert_eq!(hits.get(), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn test_unsubscribe_during_notify() {
        let set = SubscriberSet::new();
        let hits = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let h = hits.clone();
        let s = slot.clone();
        let sub = set.subscribe(Rc::new(move || {
            h.set(h.get() + 1);
            if let Some(sub) = s.borrow_mut().take() {
                sub.unsubscribe();
            }
        }));
        *slot.borrow_mut() = Some(sub);

        set.notify();
        set.notify();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = SubscriberSet::new();
        let sub = set.subscribe(Rc::new(|| {}));
        drop(set);
        sub.unsubscribe();
    }
}
