//! Atom adapter - a single in-memory value cell

use std::cell::RefCell;
use std::rc::Rc;

use accord_core::{
    AccordError, AccordResult, Callback, ShallowMerge, SourceAdapter, SubscriberSet, Subscription,
};

type MergeFn<T> = fn(&T, &T) -> Option<T>;

struct AtomCell<T> {
    value: RefCell<T>,
    subscribers: SubscriberSet,
    merge: Option<MergeFn<T>>,
}

/// In-memory value cell. Clones share the same cell.
pub struct AtomAdapter<T> {
    cell: Rc<AtomCell<T>>,
}

impl<T> Clone for AtomAdapter<T> {
    fn clone(&self) -> Self {
        AtomAdapter {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + PartialEq> AtomAdapter<T> {
    /// Cell without native patch support
    pub fn new(initial: T) -> Self {
        Self::build(initial, None)
    }

    fn build(initial: T, merge: Option<MergeFn<T>>) -> Self {
        AtomAdapter {
            cell: Rc::new(AtomCell {
                value: RefCell::new(initial),
                subscribers: SubscriberSet::new(),
                merge,
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.cell.subscribers.len()
    }

    fn replace(&self, next: T) {
        {
            let mut value = self.cell.value.borrow_mut();
            if *value == next {
                return;
            }
            *value = next;
        }
        self.cell.subscribers.notify();
    }
}

impl<T: Clone + PartialEq + ShallowMerge> AtomAdapter<T> {
    /// Cell that applies partial updates by shallow merge
    pub fn patchable(initial: T) -> Self {
        Self::build(initial, Some(T::shallow_merge))
    }
}

impl<T: Clone + PartialEq> SourceAdapter<T> for AtomAdapter<T> {
    fn kind(&self) -> &str {
        "atom"
    }

    fn get(&self) -> T {
        self.cell.value.borrow().clone()
    }

    fn set(&self, next: T) {
        self.replace(next);
    }

    fn supports_patch(&self) -> bool {
        self.cell.merge.is_some()
    }

    fn patch(&self, partial: T) -> AccordResult<()> {
        let Some(merge) = self.cell.merge else {
            return Err(AccordError::UnsupportedPatch(self.kind().to_string()));
        };
        let merged = merge(&self.cell.value.borrow(), &partial)
            .ok_or_else(|| AccordError::UnsupportedPatch(self.kind().to_string()))?;
        self.replace(merged);
        Ok(())
    }

    fn subscribe(&self, callback: Callback) -> Subscription {
        self.cell.subscribers.subscribe(callback)
    }

    fn destroy(&self) {
        self.cell.subscribers.clear();
    }
}
