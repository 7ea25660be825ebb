//! External store adapter - closures over any get/set/subscribe store

use std::rc::Rc;

use accord_core::{AccordError, AccordResult, Callback, SourceAdapter, Subscription};

type PatchFn<T> = Rc<dyn Fn(T) -> AccordResult<()>>;

/// Capabilities of a store managed outside Accord
pub struct ExternalStore<T> {
    pub get: Rc<dyn Fn() -> T>,
    pub set: Rc<dyn Fn(T)>,
    pub subscribe: Rc<dyn Fn(Callback) -> Subscription>,
}

impl<T> ExternalStore<T> {
    pub fn new(
        get: impl Fn() -> T + 'static,
        set: impl Fn(T) + 'static,
        subscribe: impl Fn(Callback) -> Subscription + 'static,
    ) -> Self {
        ExternalStore {
            get: Rc::new(get),
            set: Rc::new(set),
            subscribe: Rc::new(subscribe),
        }
    }
}

impl<T> Clone for ExternalStore<T> {
    fn clone(&self) -> Self {
        ExternalStore {
            get: self.get.clone(),
            set: self.set.clone(),
            subscribe: self.subscribe.clone(),
        }
    }
}

/// Source adapter over an [`ExternalStore`]
pub struct ExternalStoreAdapter<T> {
    store: ExternalStore<T>,
    kind: String,
    patch: Option<PatchFn<T>>,
}

impl<T> ExternalStoreAdapter<T> {
    pub fn new(store: ExternalStore<T>) -> Self {
        ExternalStoreAdapter {
            store,
            kind: "external".to_string(),
            patch: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Declare native partial-update support
    pub fn with_patch(mut self, patch: impl Fn(T) -> AccordResult<()> + 'static) -> Self {
        self.patch = Some(Rc::new(patch));
        self
    }
}

impl<T> Clone for ExternalStoreAdapter<T> {
    fn clone(&self) -> Self {
        ExternalStoreAdapter {
            store: self.store.clone(),
            kind: self.kind.clone(),
            patch: self.patch.clone(),
        }
    }
}

impl<T> SourceAdapter<T> for ExternalStoreAdapter<T> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn get(&self) -> T {
        (self.store.get)()
    }

    fn set(&self, next: T) {
        (self.store.set)(next)
    }

    fn supports_patch(&self) -> bool {
        self.patch.is_some()
    }

    fn patch(&self, partial: T) -> AccordResult<()> {
        match &self.patch {
            Some(patch) => patch(partial),
            None => Err(AccordError::UnsupportedPatch(self.kind.clone())),
        }
    }

    fn subscribe(&self, callback: Callback) -> Subscription {
        (self.store.subscribe)(callback)
    }
}
