//! Reactive effects
//!
//! An effect runs after any commit that changes at least one of its `when`
//! keys. Effects run synchronously on the committing call stack and may
//! write back into the store through their [`EffectApi`]. The API carries the
//! chain depth explicitly: writes made through it commit at that depth, and
//! effects they trigger run one level deeper.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use accord_core::{AccordResult, Value};
use serde::de::DeserializeOwned;

use crate::{Conductor, Update};

/// Default bound on nested effect invocations
pub const DEFAULT_MAX_EFFECT_DEPTH: usize = 5;

pub type EffectFn = Rc<dyn Fn(&EffectApi<'_>) -> AccordResult<()>>;

/// Reactive rule
#[derive(Clone)]
pub struct EffectDefinition {
    pub when: Vec<String>,
    pub run: EffectFn,
    pub max_depth: usize,
}

impl EffectDefinition {
    pub fn new<I, S>(when: I, run: impl Fn(&EffectApi<'_>) -> AccordResult<()> + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EffectDefinition {
            when: when.into_iter().map(Into::into).collect(),
            run: Rc::new(run),
            max_depth: DEFAULT_MAX_EFFECT_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// True if any changed key is in `when`
    pub fn triggered_by(&self, changed: &[String]) -> bool {
        self.when.iter().any(|key| changed.contains(key))
    }
}

impl fmt::Debug for EffectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDefinition")
            .field("when", &self.when)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[derive(Default)]
struct EffectList {
    next_id: u64,
    entries: Vec<(u64, Rc<EffectDefinition>)>,
}

/// Registered effects in registration order
#[derive(Clone, Default)]
pub(crate) struct EffectRegistry {
    inner: Rc<RefCell<EffectList>>,
}

impl EffectRegistry {
    pub fn register(&self, definition: EffectDefinition) -> EffectHandle {
        let mut list = self.inner.borrow_mut();
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push((id, Rc::new(definition)));
        EffectHandle {
            id,
            registry: Rc::downgrade(&self.inner),
        }
    }

    /// Effects registered right now; registrations made while these run
    /// take effect from the next commit
    pub fn snapshot(&self) -> Vec<Rc<EffectDefinition>> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().entries.clear();
    }
}

/// Registration handle for an effect
#[must_use = "dropping an EffectHandle keeps the effect registered"]
pub struct EffectHandle {
    id: u64,
    registry: Weak<RefCell<EffectList>>,
}

impl EffectHandle {
    /// Unregister the effect
    pub fn remove(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle").field("id", &self.id).finish()
    }
}

/// Store access handed to a running effect
pub struct EffectApi<'a> {
    conductor: &'a Conductor,
    depth: usize,
}

impl<'a> EffectApi<'a> {
    pub(crate) fn new(conductor: &'a Conductor, depth: usize) -> Self {
        EffectApi { conductor, depth }
    }

    /// Nesting level of the effect holding this API (1 for effects
    /// triggered by a top-level commit)
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn get(&self, key: &str) -> AccordResult<Value> {
        self.conductor.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> AccordResult<T> {
        self.conductor.get_as(key)
    }

    pub fn set(&self, key: &str, value: Value) -> AccordResult<()> {
        self.conductor.stage(key, Update::Set(value), self.depth)
    }

    pub fn patch(&self, key: &str, partial: Value) -> AccordResult<()> {
        self.conductor.stage(key, Update::Patch(partial), self.depth)
    }

    /// Batch writes made inside `f` into one commit at this chain depth
    pub fn transaction<R>(
        &self,
        label: Option<&str>,
        f: impl FnOnce() -> AccordResult<R>,
    ) -> AccordResult<R> {
        self.conductor.run_transaction(label, self.depth, f)
    }
}
