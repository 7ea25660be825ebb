//! Conductor - transactional section store
//!
//! The conductor owns every section, stages writes into transactions and
//! commits them atomically:
//! 1. Walk sections in dependency order
//! 2. Apply staged set/patch updates to adapter-backed sections, persisting changes
//! 3. Recompute derived sections whose inputs changed
//! 4. Schedule one coalesced notification flush, record the transaction, run effects
//!
//! Execution is single-threaded and synchronous. Re-entrant transactions are
//! handled by a depth counter: only the outermost close commits.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use accord_core::{
    AccordError, AccordResult, Clock, SharedAdapter, ShallowMerge, Subscription, SystemClock,
    Timestamp, Value,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
    ConductorSnapshot, DependencyGraph, DerivedSectionDefinition, EffectApi, EffectDefinition,
    EffectHandle, EffectRegistry, PersistConfig, Scheduler, ScheduledWrite, SectionDefinition,
    SectionInfo, SectionKind, SectionRecord, TransactionHistory, TransactionRecord, Update,
    DEFAULT_HISTORY_LIMIT,
};

/// Initial values overriding persisted and adapter values
pub enum Bootstrap {
    Values(HashMap<String, Value>),
    Lazy(Box<dyn FnOnce() -> Option<HashMap<String, Value>>>),
}

impl Bootstrap {
    fn resolve(self) -> HashMap<String, Value> {
        match self {
            Bootstrap::Values(values) => values,
            Bootstrap::Lazy(load) => load().unwrap_or_default(),
        }
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bootstrap::Values(values) => f.debug_tuple("Values").field(&values.len()).finish(),
            Bootstrap::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// Conductor configuration
pub struct ConductorConfig {
    pub sections: Vec<SectionDefinition>,
    pub derived: Vec<DerivedSectionDefinition>,
    pub scheduler: Scheduler,
    pub bootstrap: Option<Bootstrap>,
    /// Retained transaction records
    pub history_limit: usize,
    pub clock: Rc<dyn Clock>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        ConductorConfig {
            sections: Vec::new(),
            derived: Vec::new(),
            scheduler: Scheduler::default(),
            bootstrap: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            clock: Rc::new(SystemClock),
        }
    }
}

impl ConductorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, definition: SectionDefinition) -> Self {
        self.sections.push(definition);
        self
    }

    pub fn derived(mut self, definition: DerivedSectionDefinition) -> Self {
        self.derived.push(definition);
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn bootstrap(mut self, bootstrap: Bootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

struct Inner {
    sections: RefCell<HashMap<String, SectionRecord>>,
    /// Topological commit order
    order: Vec<String>,
    /// Keys in definition order
    keys: Vec<String>,
    updates: RefCell<HashMap<String, Update>>,
    effects: EffectRegistry,
    scheduler: Scheduler,
    /// Keys awaiting notification, insertion-ordered and unique
    pending: RefCell<Vec<String>>,
    flush_scheduled: Cell<bool>,
    history: RefCell<TransactionHistory>,
    depth: Cell<usize>,
    /// Effect chain depth of the open outermost transaction
    chain: Cell<usize>,
    label: RefCell<Option<String>>,
    clock: Rc<dyn Clock>,
    adapter_subscriptions: RefCell<Vec<Subscription>>,
    /// Section whose adapter is currently being written by the conductor
    echo_guard: RefCell<Option<String>>,
    /// First failure of a commit started by an adapter change, until taken
    adapter_error: RefCell<Option<AccordError>>,
    destroyed: Cell<bool>,
}

/// Transactional section store handle. Clones share one store.
#[derive(Clone)]
pub struct Conductor {
    inner: Rc<Inner>,
}

/// Decrements the transaction depth if the body unwinds
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
    armed: bool,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.depth.set(self.depth.get().saturating_sub(1));
        }
    }
}

impl Conductor {
    /// Build the registry, order it, hydrate values and compute derived sections
    pub fn new(config: ConductorConfig) -> AccordResult<Self> {
        let ConductorConfig {
            sections: section_defs,
            derived: derived_defs,
            scheduler,
            bootstrap,
            history_limit,
            clock,
        } = config;

        let mut graph = DependencyGraph::new();
        let mut sections: HashMap<String, SectionRecord> = HashMap::new();
        let mut keys = Vec::with_capacity(section_defs.len() + derived_defs.len());

        for definition in section_defs {
            if sections.contains_key(&definition.key) {
                return Err(AccordError::DuplicateSectionKey(definition.key));
            }
            graph.add_node(&definition.key, &definition.depends_on)?;
            keys.push(definition.key.clone());
            let key = definition.key.clone();
            sections.insert(key, SectionRecord::source(definition));
        }

        for definition in derived_defs {
            if sections.contains_key(&definition.key) {
                return Err(AccordError::DuplicateSectionKey(definition.key));
            }
            graph.add_node(&definition.key, &definition.inputs)?;
            keys.push(definition.key.clone());
            let key = definition.key.clone();
            sections.insert(key, SectionRecord::derived(definition));
        }

        let order = graph.topological_order()?;

        let mut bootstrap = bootstrap.map(Bootstrap::resolve).unwrap_or_default();
        for key in &keys {
            let Some(record) = sections.get_mut(key) else {
                continue;
            };
            let SectionKind::Source {
                adapter, persist, ..
            } = &record.kind
            else {
                continue;
            };
            let hydrated = match bootstrap.remove(key) {
                Some(value) => Some(value),
                None => match persist {
                    Some(persist) => persist.read()?,
                    None => None,
                },
            };
            if let Some(value) = hydrated {
                adapter.set(value.clone());
                record.value = value;
            }
        }

        let conductor = Conductor {
            inner: Rc::new(Inner {
                sections: RefCell::new(sections),
                order,
                keys,
                updates: RefCell::new(HashMap::new()),
                effects: EffectRegistry::default(),
                scheduler,
                pending: RefCell::new(Vec::new()),
                flush_scheduled: Cell::new(false),
                history: RefCell::new(TransactionHistory::new(history_limit)),
                depth: Cell::new(0),
                chain: Cell::new(0),
                label: RefCell::new(None),
                clock,
                adapter_subscriptions: RefCell::new(Vec::new()),
                echo_guard: RefCell::new(None),
                adapter_error: RefCell::new(None),
                destroyed: Cell::new(false),
            }),
        };

        for key in &conductor.inner.order {
            conductor.recompute_derived(key);
        }
        conductor.subscribe_adapters();

        debug!(
            sections = conductor.inner.keys.len(),
            order = ?conductor.inner.order,
            "conductor ready"
        );
        Ok(conductor)
    }

    fn subscribe_adapters(&self) {
        let adapters: Vec<(String, SharedAdapter<Value>)> = {
            let sections = self.inner.sections.borrow();
            self.inner
                .keys
                .iter()
                .filter_map(|key| {
                    sections
                        .get(key)
                        .and_then(|r| r.adapter())
                        .map(|a| (key.clone(), a.clone()))
                })
                .collect()
        };

        let mut subscriptions = Vec::with_capacity(adapters.len());
        for (key, adapter) in adapters {
            let weak: Weak<Inner> = Rc::downgrade(&self.inner);
            subscriptions.push(adapter.subscribe(Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Conductor { inner }.on_adapter_change(&key);
                }
            })));
        }
        *self.inner.adapter_subscriptions.borrow_mut() = subscriptions;
    }

    /// A backing store changed on its own: stage its new value
    fn on_adapter_change(&self, key: &str) {
        if self.inner.destroyed.get() {
            warn!(key, "adapter notified after destroy");
            return;
        }
        if self.inner.echo_guard.borrow().as_deref() == Some(key) {
            return;
        }

        let (adapter, current) = {
            let sections = self.inner.sections.borrow();
            let Some(record) = sections.get(key) else {
                return;
            };
            let Some(adapter) = record.adapter() else {
                return;
            };
            (adapter.clone(), record.value.clone())
        };

        let next = adapter.get();
        if next == current {
            return;
        }
        trace!(key, "adapter change staged");
        if let Err(err) = self.stage(key, Update::Set(next), 0) {
            warn!(key, error = %err, "adapter change could not be committed");
            self.inner.adapter_error.borrow_mut().get_or_insert(err);
        }
    }

    /// Take the first error raised by a commit that an adapter change
    /// started. Such commits have no caller to return it to.
    pub fn take_error(&self) -> Option<AccordError> {
        self.inner.adapter_error.borrow_mut().take()
    }

    fn ensure_alive(&self) -> AccordResult<()> {
        if self.inner.destroyed.get() {
            return Err(AccordError::Destroyed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Committed value of a section
    pub fn get(&self, key: &str) -> AccordResult<Value> {
        self.ensure_alive()?;
        self.inner
            .sections
            .borrow()
            .get(key)
            .map(|r| r.value.clone())
            .ok_or_else(|| AccordError::UnknownSection(key.to_string()))
    }

    /// Committed value decoded into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> AccordResult<T> {
        Ok(serde_json::from_value(self.get(key)?)?)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.sections.borrow().contains_key(key)
    }

    /// Section keys in definition order
    pub fn keys(&self) -> &[String] {
        &self.inner.keys
    }

    /// Commit order
    pub fn order(&self) -> &[String] {
        &self.inner.order
    }

    pub fn describe(&self, key: &str) -> AccordResult<SectionInfo> {
        let sections = self.inner.sections.borrow();
        let record = sections
            .get(key)
            .ok_or_else(|| AccordError::UnknownSection(key.to_string()))?;
        Ok(SectionInfo {
            key: key.to_string(),
            kind: record.kind_name(),
            depends_on: record.depends_on.clone(),
            debug_label: record.debug_label.clone(),
            subscribers: record.subscribers.len(),
            pending_write: matches!(
                record.kind,
                SectionKind::Source {
                    pending_write: Some(_),
                    ..
                }
            ),
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Stage a full replacement; commits immediately outside a transaction
    pub fn set(&self, key: &str, value: Value) -> AccordResult<()> {
        self.stage(key, Update::Set(value), 0)
    }

    /// Stage a serializable value
    pub fn set_from<T: Serialize>(&self, key: &str, value: &T) -> AccordResult<()> {
        self.set(key, serde_json::to_value(value)?)
    }

    /// Stage a partial update; commits immediately outside a transaction
    pub fn patch(&self, key: &str, partial: Value) -> AccordResult<()> {
        self.stage(key, Update::Patch(partial), 0)
    }

    pub(crate) fn stage(&self, key: &str, update: Update, chain: usize) -> AccordResult<()> {
        self.ensure_alive()?;
        self.check_writable(key, &update)?;

        if self.inner.depth.get() == 0 {
            return self.run_transaction(None, chain, || {
                self.stage_update(key, update);
                Ok(())
            });
        }
        self.stage_update(key, update);
        Ok(())
    }

    fn check_writable(&self, key: &str, update: &Update) -> AccordResult<()> {
        let sections = self.inner.sections.borrow();
        let record = sections
            .get(key)
            .ok_or_else(|| AccordError::UnknownSection(key.to_string()))?;
        match &record.kind {
            SectionKind::Derived { .. } => Err(AccordError::DerivedSectionWrite(key.to_string())),
            SectionKind::Source {
                adapter, mergeable, ..
            } => {
                if matches!(update, Update::Patch(_)) && !adapter.supports_patch() && !mergeable {
                    return Err(AccordError::UnsupportedPatch(key.to_string()));
                }
                Ok(())
            }
        }
    }

    fn stage_update(&self, key: &str, update: Update) {
        trace!(key, ?update, "staged");
        self.inner.updates.borrow_mut().insert(key.to_string(), update);
    }

    /// Run `f` inside a transaction; the outermost close commits
    pub fn transaction<R>(&self, f: impl FnOnce() -> AccordResult<R>) -> AccordResult<R> {
        self.run_transaction(None, 0, f)
    }

    /// Labeled transaction; the label is recorded in the history
    pub fn transaction_labeled<R>(
        &self,
        label: &str,
        f: impl FnOnce() -> AccordResult<R>,
    ) -> AccordResult<R> {
        self.run_transaction(Some(label), 0, f)
    }

    /// The commit runs even when `f` fails; `f`'s error takes precedence
    pub(crate) fn run_transaction<R>(
        &self,
        label: Option<&str>,
        chain: usize,
        f: impl FnOnce() -> AccordResult<R>,
    ) -> AccordResult<R> {
        self.ensure_alive()?;

        if self.inner.depth.get() == 0 {
            self.inner.chain.set(chain);
        }
        self.inner.depth.set(self.inner.depth.get() + 1);
        if let Some(label) = label {
            *self.inner.label.borrow_mut() = Some(label.to_string());
        }

        let mut guard = DepthGuard {
            depth: &self.inner.depth,
            armed: true,
        };
        let result = f();
        guard.armed = false;
        drop(guard);

        let depth = self.inner.depth.get() - 1;
        self.inner.depth.set(depth);
        let committed = if depth == 0 {
            self.commit(self.inner.chain.get())
        } else {
            Ok(())
        };

        let value = result?;
        committed?;
        Ok(value)
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.depth.get() > 0
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    fn commit(&self, chain: usize) -> AccordResult<()> {
        let staged = std::mem::take(&mut *self.inner.updates.borrow_mut());
        let label = self.inner.label.borrow_mut().take();
        if staged.is_empty() || self.inner.destroyed.get() {
            return Ok(());
        }

        let mut changed: Vec<String> = Vec::new();
        let applied = self.apply_staged(&staged, &mut changed);

        if !changed.is_empty() {
            debug!(label = ?label, touched = ?changed, chain, "commit");
            self.schedule_notify(&changed);
            self.inner.history.borrow_mut().push(TransactionRecord {
                label,
                touched: changed.clone(),
                timestamp: self.inner.clock.now(),
            });
        }
        applied?;

        if !changed.is_empty() {
            self.run_effects(&changed, chain)?;
        }
        Ok(())
    }

    /// Walk the whole order even when a write fails so every staged update
    /// lands and derived sections track their inputs. Returns the first error.
    fn apply_staged(
        &self,
        staged: &HashMap<String, Update>,
        changed: &mut Vec<String>,
    ) -> AccordResult<()> {
        let mut first_err = None;
        for key in &self.inner.order {
            if let Some(update) = staged.get(key) {
                let applied = self.apply_update(key, update).and_then(|changed_value| {
                    if changed_value {
                        changed.push(key.clone());
                        self.persist(key)?;
                    }
                    Ok(())
                });
                if let Err(err) = applied {
                    warn!(key = %key, error = %err, "staged update failed");
                    first_err.get_or_insert(err);
                }
            } else if self.recompute_derived(key) {
                changed.push(key.clone());
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply_update(&self, key: &str, update: &Update) -> AccordResult<bool> {
        let (adapter, current, mergeable) = {
            let sections = self.inner.sections.borrow();
            let record = sections
                .get(key)
                .ok_or_else(|| AccordError::UnknownSection(key.to_string()))?;
            let SectionKind::Source {
                adapter, mergeable, ..
            } = &record.kind
            else {
                return Err(AccordError::DerivedSectionWrite(key.to_string()));
            };
            (adapter.clone(), record.value.clone(), *mergeable)
        };

        match update {
            Update::Set(next) => {
                if *next == current {
                    return Ok(false);
                }
                self.store_value(key, next.clone());
                self.write_adapter(key, || {
                    adapter.set(next.clone());
                    Ok(())
                })?;
                Ok(true)
            }
            Update::Patch(partial) if adapter.supports_patch() => {
                match current.shallow_merge(partial) {
                    Some(merged) => {
                        if !current.patch_changes(partial) {
                            return Ok(false);
                        }
                        self.store_value(key, merged);
                        self.write_adapter(key, || adapter.patch(partial.clone()))?;
                        Ok(true)
                    }
                    None => {
                        self.write_adapter(key, || adapter.patch(partial.clone()))?;
                        let next = adapter.get();
                        if next == current {
                            return Ok(false);
                        }
                        self.store_value(key, next);
                        Ok(true)
                    }
                }
            }
            Update::Patch(partial) => {
                let merged = if mergeable {
                    current.shallow_merge(partial)
                } else {
                    None
                };
                let Some(merged) = merged else {
                    return Err(AccordError::UnsupportedPatch(key.to_string()));
                };
                if !current.patch_changes(partial) {
                    return Ok(false);
                }
                self.store_value(key, merged.clone());
                self.write_adapter(key, || {
                    adapter.set(merged.clone());
                    Ok(())
                })?;
                Ok(true)
            }
        }
    }

    fn store_value(&self, key: &str, value: Value) {
        if let Some(record) = self.inner.sections.borrow_mut().get_mut(key) {
            record.value = value;
        }
    }

    /// Write into a section's adapter without reacting to its echo
    fn write_adapter(&self, key: &str, write: impl FnOnce() -> AccordResult<()>) -> AccordResult<()> {
        let previous = self.inner.echo_guard.replace(Some(key.to_string()));
        let result = write();
        *self.inner.echo_guard.borrow_mut() = previous;
        result
    }

    /// Recompute a derived section if any input differs from its memoized
    /// snapshot. Returns true if the derived value changed.
    fn recompute_derived(&self, key: &str) -> bool {
        let (compute, inputs) = {
            let sections = self.inner.sections.borrow();
            let Some(record) = sections.get(key) else {
                return false;
            };
            let SectionKind::Derived {
                inputs,
                compute,
                last_inputs,
            } = &record.kind
            else {
                return false;
            };
            let values: Vec<Value> = inputs
                .iter()
                .map(|input| {
                    sections
                        .get(input)
                        .map(|r| r.value.clone())
                        .unwrap_or(Value::Null)
                })
                .collect();
            if last_inputs.as_ref() == Some(&values) {
                return false;
            }
            (compute.clone(), values)
        };

        let next = compute(&inputs);
        trace!(key, "derived recomputed");

        let mut sections = self.inner.sections.borrow_mut();
        let Some(record) = sections.get_mut(key) else {
            return false;
        };
        let changed = record.value != next;
        record.value = next;
        if let SectionKind::Derived { last_inputs, .. } = &mut record.kind {
            *last_inputs = Some(inputs);
        }
        changed
    }

    fn persist(&self, key: &str) -> AccordResult<()> {
        let now = self.inner.clock.now();
        let immediate = {
            let mut sections = self.inner.sections.borrow_mut();
            let Some(record) = sections.get_mut(key) else {
                return Ok(());
            };
            let value = record.value.clone();
            let SectionKind::Source {
                persist: Some(persist),
                pending_write,
                ..
            } = &mut record.kind
            else {
                return Ok(());
            };
            if !persist.is_enabled() {
                return Ok(());
            }
            match persist.debounce() {
                Some(delay) => {
                    if pending_write.take().is_some() {
                        trace!(key, "pending write rescheduled");
                    }
                    *pending_write = Some(ScheduledWrite::new(now, delay, value));
                    None
                }
                None => Some((persist.clone(), value)),
            }
        };

        if let Some((persist, value)) = immediate {
            persist.write(&value)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn schedule_notify(&self, keys: &[String]) {
        {
            let mut pending = self.inner.pending.borrow_mut();
            for key in keys {
                if !pending.contains(key) {
                    pending.push(key.clone());
                }
            }
        }
        if self.inner.flush_scheduled.replace(true) {
            return;
        }

        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        self.inner.scheduler.schedule(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Conductor { inner }.deliver_notifications();
            }
        }));
    }

    /// Deliver every pending key's subscribers once. A panicking subscriber
    /// aborts the pass; keys not yet reached stay pending.
    fn deliver_notifications(&self) {
        self.inner.flush_scheduled.set(false);
        loop {
            let next = {
                let mut pending = self.inner.pending.borrow_mut();
                if pending.is_empty() {
                    None
                } else {
                    Some(pending.remove(0))
                }
            };
            let Some(key) = next else {
                break;
            };
            let subscribers = self
                .inner
                .sections
                .borrow()
                .get(&key)
                .map(|r| r.subscribers.clone());
            if let Some(subscribers) = subscribers {
                trace!(key = %key, listeners = subscribers.len(), "notify");
                subscribers.notify();
            }
        }
    }

    /// Deliver pending notifications now, whatever the scheduler
    pub fn flush_notifications(&self) {
        if !self.inner.pending.borrow().is_empty() {
            self.deliver_notifications();
        }
    }

    /// Keys awaiting notification
    pub fn pending_notifications(&self) -> Vec<String> {
        self.inner.pending.borrow().clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Register a listener for one section
    pub fn subscribe(&self, key: &str, callback: impl Fn() + 'static) -> AccordResult<Subscription> {
        self.ensure_alive()?;
        let sections = self.inner.sections.borrow();
        let record = sections
            .get(key)
            .ok_or_else(|| AccordError::UnknownSection(key.to_string()))?;
        Ok(record.subscribers.subscribe(Rc::new(callback)))
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Register a reactive rule
    pub fn effect(&self, definition: EffectDefinition) -> AccordResult<EffectHandle> {
        self.ensure_alive()?;
        if let Some(unknown) = definition.when.iter().find(|k| !self.contains(k)) {
            return Err(AccordError::UnknownSection(unknown.clone()));
        }
        Ok(self.inner.effects.register(definition))
    }

    pub fn effect_count(&self) -> usize {
        self.inner.effects.len()
    }

    fn run_effects(&self, changed: &[String], chain: usize) -> AccordResult<()> {
        let depth = chain + 1;
        for effect in self.inner.effects.snapshot() {
            if !effect.triggered_by(changed) {
                continue;
            }
            if depth > effect.max_depth {
                return Err(AccordError::EffectRecursionExceeded {
                    when: effect.when.clone(),
                    max_depth: effect.max_depth,
                });
            }
            trace!(when = ?effect.when, depth, "effect");
            let api = EffectApi::new(self, depth);
            (effect.run)(&api)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Run debounced writes that are due. Returns the number written; every
    /// due write is attempted and the first failure is returned.
    pub fn poll_persistence(&self) -> AccordResult<usize> {
        let now = self.inner.clock.now();
        let due: Vec<(String, PersistConfig, ScheduledWrite)> = {
            let mut sections = self.inner.sections.borrow_mut();
            let mut due = Vec::new();
            for key in &self.inner.keys {
                let Some(record) = sections.get_mut(key) else {
                    continue;
                };
                if let SectionKind::Source {
                    persist: Some(persist),
                    pending_write,
                    ..
                } = &mut record.kind
                {
                    if pending_write.as_ref().is_some_and(|w| w.is_due(now)) {
                        if let Some(write) = pending_write.take() {
                            due.push((key.clone(), persist.clone(), write));
                        }
                    }
                }
            }
            due
        };

        let mut first_err = None;
        let mut written = 0;
        for (key, persist, write) in due {
            match persist.write(&write.value) {
                Ok(()) => written += 1,
                Err(err) => {
                    warn!(key = %key, error = %err, "debounced write failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    /// Earliest deadline among pending debounced writes
    pub fn next_persistence_due(&self) -> Option<Timestamp> {
        self.inner
            .sections
            .borrow()
            .values()
            .filter_map(|r| match &r.kind {
                SectionKind::Source {
                    pending_write: Some(write),
                    ..
                } => Some(write.due),
                _ => None,
            })
            .min()
    }

    // ------------------------------------------------------------------
    // Diagnostics and lifecycle
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> ConductorSnapshot {
        ConductorSnapshot {
            sections: self
                .inner
                .sections
                .borrow()
                .iter()
                .map(|(k, r)| (k.clone(), r.value.clone()))
                .collect(),
            transactions: self.inner.history.borrow().to_vec(),
        }
    }

    /// Transaction records, newest first
    pub fn history(&self) -> Vec<TransactionRecord> {
        self.inner.history.borrow().to_vec()
    }

    /// Handle bound to one section
    pub fn section(&self, key: &str) -> AccordResult<SectionHandle> {
        if !self.contains(key) {
            return Err(AccordError::UnknownSection(key.to_string()));
        }
        Ok(SectionHandle {
            conductor: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Tear down: unsubscribe and destroy adapters, drop pending writes,
    /// subscribers, staged updates and effects
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }

        let subscriptions = std::mem::take(&mut *self.inner.adapter_subscriptions.borrow_mut());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        let adapters: Vec<SharedAdapter<Value>> = {
            let mut sections = self.inner.sections.borrow_mut();
            sections
                .values_mut()
                .filter_map(|record| {
                    record.subscribers.clear();
                    match &mut record.kind {
                        SectionKind::Source {
                            adapter,
                            pending_write,
                            ..
                        } => {
                            *pending_write = None;
                            Some(adapter.clone())
                        }
                        SectionKind::Derived { .. } => None,
                    }
                })
                .collect()
        };
        for adapter in adapters {
            adapter.destroy();
        }

        self.inner.updates.borrow_mut().clear();
        self.inner.pending.borrow_mut().clear();
        self.inner.effects.clear();
        debug!("conductor destroyed");
    }
}

impl fmt::Debug for Conductor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conductor")
            .field("order", &self.inner.order)
            .field("depth", &self.inner.depth.get())
            .field("scheduler", &self.inner.scheduler)
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

/// Handle bound to one section
#[derive(Clone)]
pub struct SectionHandle {
    conductor: Conductor,
    key: String,
}

impl SectionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> AccordResult<Value> {
        self.conductor.get(&self.key)
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> AccordResult<T> {
        self.conductor.get_as(&self.key)
    }

    pub fn set(&self, value: Value) -> AccordResult<()> {
        self.conductor.set(&self.key, value)
    }

    pub fn set_from<T: Serialize>(&self, value: &T) -> AccordResult<()> {
        self.conductor.set_from(&self.key, value)
    }

    pub fn patch(&self, partial: Value) -> AccordResult<()> {
        self.conductor.patch(&self.key, partial)
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> AccordResult<Subscription> {
        self.conductor.subscribe(&self.key, callback)
    }
}

impl fmt::Debug for SectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionHandle").field("key", &self.key).finish()
    }
}
