//! Section bindings for presentation layers
//!
//! A binding is handed the conductor explicitly; there is no ambient store
//! lookup. Reads are valid before any subscription exists.

use std::cell::RefCell;
use std::rc::Rc;

use accord_core::{AccordResult, Subscription, Value};
use serde::de::DeserializeOwned;

use crate::Conductor;

/// Observer of one section
#[derive(Clone, Debug)]
pub struct SectionBinding {
    conductor: Conductor,
    key: String,
}

impl SectionBinding {
    pub fn new(conductor: &Conductor, key: &str) -> AccordResult<Self> {
        conductor.get(key)?;
        Ok(SectionBinding {
            conductor: conductor.clone(),
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> AccordResult<Value> {
        self.conductor.get(&self.key)
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> AccordResult<T> {
        self.conductor.get_as(&self.key)
    }

    /// Call back on every delivered notification for the section
    pub fn observe(&self, callback: impl Fn() + 'static) -> AccordResult<Subscription> {
        self.conductor.subscribe(&self.key, callback)
    }

    /// Track a projection of the section, calling back only when it changes
    pub fn select<S, F, C>(&self, selector: F, callback: C) -> AccordResult<Selection<S>>
    where
        S: PartialEq + Clone + 'static,
        F: Fn(&Value) -> S + 'static,
        C: Fn(&S) + 'static,
    {
        self.select_with(selector, |a: &S, b: &S| a == b, callback)
    }

    /// [`SectionBinding::select`] with a custom equality
    pub fn select_with<S, F, E, C>(
        &self,
        selector: F,
        equality: E,
        callback: C,
    ) -> AccordResult<Selection<S>>
    where
        S: Clone + 'static,
        F: Fn(&Value) -> S + 'static,
        E: Fn(&S, &S) -> bool + 'static,
        C: Fn(&S) + 'static,
    {
        let current = Rc::new(RefCell::new(selector(&self.get()?)));

        let conductor = self.conductor.clone();
        let key = self.key.clone();
        let last = current.clone();
        let subscription = self.conductor.subscribe(&self.key, move || {
            let Ok(value) = conductor.get(&key) else {
                return;
            };
            let next = selector(&value);
            if equality(&last.borrow(), &next) {
                return;
            }
            *last.borrow_mut() = next.clone();
            callback(&next);
        })?;

        Ok(Selection {
            current,
            subscription,
        })
    }
}

/// Live projection created by [`SectionBinding::select`]
pub struct Selection<S> {
    current: Rc<RefCell<S>>,
    subscription: Subscription,
}

impl<S: Clone> Selection<S> {
    /// Last selected value
    pub fn get(&self) -> S {
        self.current.borrow().clone()
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConductorConfig, Scheduler, SectionDefinition};
    use accord_adapters::AtomAdapter;
    use serde_json::json;
    use std::cell::Cell;

    fn conductor() -> Conductor {
        Conductor::new(
            ConductorConfig::new()
                .scheduler(Scheduler::Immediate)
                .section(
                    SectionDefinition::new("cart", AtomAdapter::new(json!({ "items": 0, "note": "" })))
                        .mergeable(),
                ),
        )
        .unwrap()
    }

    #[test]
    fn test_read_before_subscribe() {
        let conductor = conductor();
        let binding = SectionBinding::new(&conductor, "cart").unwrap();
        assert_eq!(binding.get().unwrap()["items"], json!(0));
        assert_eq!(binding.get().unwrap(), binding.get().unwrap());
    }

    #[test]
    fn test_unknown_key() {
        let conductor = conductor();
        assert!(SectionBinding::new(&conductor, "nope").is_err());
    }

    #[test]
    fn test_select_fires_only_on_projection_change() {
        let conductor = conductor();
        let binding = SectionBinding::new(&conductor, "cart").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = seen.clone();
        let selection = binding
            .select(
                |v| v["items"].as_i64().unwrap_or(0),
                move |items| s.borrow_mut().push(*items),
            )
            .unwrap();

        conductor.patch("cart", json!({ "note": "gift" })).unwrap();
        conductor.patch("cart", json!({ "items": 2 })).unwrap();
        conductor.patch("cart", json!({ "note": "later" })).unwrap();

        assert_eq!(*seen.borrow(), vec![2]);
        assert_eq!(selection.get(), 2);
        selection.unsubscribe();
    }

    #[test]
    fn test_observe() {
        let conductor = conductor();
        let binding = SectionBinding::new(&conductor, "cart").unwrap();
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        let sub = binding.observe(move || h.set(h.get() + 1)).unwrap();
        conductor.patch("cart", json!({ "items": 1 })).unwrap();
        sub.unsubscribe();
        conductor.patch("cart", json!({ "items": 2 })).unwrap();

        assert_eq!(hits.get(), 1);
    }
}
