//! Orchestrated adapter
//!
//! Resolution pipeline, run on construction, on every instrument change and
//! on every local write:
//! 1. Snapshot every instrument with a freshly evaluated staleness flag
//! 2. Hand the snapshots and the previous resolution to the reconcile policy
//! 3. Store the new resolution and notify subscribers if the value changed

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use accord_core::{
    AccordError, AccordResult, Callback, Clock, ShallowMerge, SourceAdapter, SubscriberSet,
    Subscription, SystemClock, Timestamp,
};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
    default_reconcile, InstrumentDefinition, InstrumentMeta, InstrumentRole, InstrumentState,
    InstrumentView, ReconcileContext, ReconcileFn, ReconcileReason, Resolution,
};

/// Default id of the optimistic instrument
pub const DEFAULT_OPTIMISTIC_ID: &str = "optimistic";

type MergeFn<T> = fn(&T, &T) -> Option<T>;

/// Orchestrator configuration
pub struct OrchestratorConfig<T> {
    pub instruments: Vec<InstrumentDefinition<T>>,
    /// Policy override; [`default_reconcile`] when `None`
    pub reconcile: Option<ReconcileFn<T>>,
    /// Add an optimistic instrument that takes local writes immediately
    pub optimistic: bool,
    /// Optimistic priority; one above the highest instrument when `None`
    pub optimistic_priority: Option<i32>,
    pub optimistic_id: String,
    /// Freshness window of the optimistic instrument
    pub optimistic_stale_after: Option<Duration>,
    /// Instrument whose adapter receives local writes
    pub write_to: Option<String>,
    pub clock: Rc<dyn Clock>,
    merge: Option<MergeFn<T>>,
}

impl<T> Default for OrchestratorConfig<T> {
    fn default() -> Self {
        OrchestratorConfig {
            instruments: Vec::new(),
            reconcile: None,
            optimistic: false,
            optimistic_priority: None,
            optimistic_id: DEFAULT_OPTIMISTIC_ID.to_string(),
            optimistic_stale_after: None,
            write_to: None,
            clock: Rc::new(SystemClock),
            merge: None,
        }
    }
}

impl<T> OrchestratorConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instrument(mut self, definition: InstrumentDefinition<T>) -> Self {
        self.instruments.push(definition);
        self
    }

    pub fn with_reconcile(
        mut self,
        policy: impl Fn(&ReconcileContext<'_, T>) -> Option<Resolution<T>> + 'static,
    ) -> Self {
        self.reconcile = Some(Rc::new(policy));
        self
    }

    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }

    pub fn optimistic_priority(mut self, priority: i32) -> Self {
        self.optimistic_priority = Some(priority);
        self
    }

    pub fn optimistic_id(mut self, id: impl Into<String>) -> Self {
        self.optimistic_id = id.into();
        self
    }

    pub fn optimistic_stale_after(mut self, window: Duration) -> Self {
        self.optimistic_stale_after = Some(window);
        self
    }

    pub fn write_to(mut self, id: impl Into<String>) -> Self {
        self.write_to = Some(id.into());
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Priority the optimistic instrument will get
    fn resolved_optimistic_priority(&self) -> i32 {
        self.optimistic_priority.unwrap_or_else(|| {
            self.instruments
                .iter()
                .map(|i| i.priority)
                .max()
                .unwrap_or(0)
                .saturating_add(1)
        })
    }
}

impl<T: ShallowMerge> OrchestratorConfig<T> {
    /// Allow `patch` by shallow-merging into the resolved value
    pub fn mergeable(mut self) -> Self {
        self.merge = Some(T::shallow_merge);
        self
    }
}

/// Per-instrument diagnostics entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentSnapshot<T> {
    pub id: String,
    pub value: T,
    #[serde(flatten)]
    pub meta: InstrumentMeta,
}

/// Read-only view of an orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorSnapshot<T> {
    pub value: T,
    /// Instrument currently driving the value
    pub driver: String,
    /// Registration order, optimistic instrument last
    pub instruments: Vec<InstrumentSnapshot<T>>,
}

struct Orchestra<T> {
    /// Registration order
    instruments: RefCell<Vec<InstrumentState<T>>>,
    resolved: RefCell<Resolution<T>>,
    reconcile: ReconcileFn<T>,
    optimistic_id: Option<String>,
    write_to: Option<String>,
    merge: Option<MergeFn<T>>,
    clock: Rc<dyn Clock>,
    subscribers: SubscriberSet,
    subscriptions: RefCell<Vec<Subscription>>,
    destroyed: Cell<bool>,
}

/// One logical value reconciled across several instruments.
/// Clones share the same orchestrator.
pub struct OrchestratedAdapter<T> {
    inner: Rc<Orchestra<T>>,
}

impl<T> Clone for OrchestratedAdapter<T> {
    fn clone(&self) -> Self {
        OrchestratedAdapter {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> OrchestratedAdapter<T> {
    /// Register instruments, resolve once and subscribe to every backing adapter
    pub fn new(config: OrchestratorConfig<T>) -> AccordResult<Self> {
        if config.instruments.is_empty() {
            return Err(AccordError::NoInstruments);
        }
        let optimistic_priority = config.resolved_optimistic_priority();
        let OrchestratorConfig {
            instruments: definitions,
            reconcile,
            optimistic,
            optimistic_id,
            optimistic_stale_after,
            write_to,
            clock,
            merge,
            ..
        } = config;

        let now = clock.now();
        let mut instruments: Vec<InstrumentState<T>> = Vec::with_capacity(definitions.len() + 1);
        for definition in definitions {
            if instruments.iter().any(|i| i.id == definition.id) {
                return Err(AccordError::DuplicateInstrument(definition.id));
            }
            instruments.push(InstrumentState::from_definition(definition, now));
        }

        let optimistic_id = if optimistic {
            if instruments.iter().any(|i| i.id == optimistic_id) {
                return Err(AccordError::DuplicateInstrument(optimistic_id));
            }
            let seed = instruments
                .first()
                .map(|i| i.value.clone())
                .ok_or(AccordError::NoInstruments)?;
            instruments.push(InstrumentState {
                id: optimistic_id.clone(),
                source: None,
                value: seed,
                updated_at: Timestamp::ZERO,
                priority: optimistic_priority,
                stale_after: optimistic_stale_after,
                kind: "optimistic".to_string(),
                role: Some(InstrumentRole::Optimistic),
            });
            Some(optimistic_id)
        } else {
            None
        };

        if let Some(target) = &write_to {
            let writable = instruments
                .iter()
                .any(|i| &i.id == target && i.source.is_some());
            if !writable {
                return Err(AccordError::UnknownWriteTarget(target.clone()));
            }
        }

        let reconcile: ReconcileFn<T> = match reconcile {
            Some(policy) => policy,
            None => Rc::new(default_reconcile::<T>),
        };
        let initial = run_policy(&reconcile, &instruments, None, ReconcileReason::Init, now);
        let resolved = match initial {
            Some(resolved) => resolved,
            None => {
                let first = instruments.first().ok_or(AccordError::NoInstruments)?;
                Resolution {
                    value: first.value.clone(),
                    source_id: first.id.clone(),
                    updated_at: now,
                }
            }
        };

        let adapter = OrchestratedAdapter {
            inner: Rc::new(Orchestra {
                instruments: RefCell::new(instruments),
                resolved: RefCell::new(resolved),
                reconcile,
                optimistic_id,
                write_to,
                merge,
                clock,
                subscribers: SubscriberSet::new(),
                subscriptions: RefCell::new(Vec::new()),
                destroyed: Cell::new(false),
            }),
        };

        adapter.subscribe_instruments();

        debug!(
            instruments = adapter.inner.instruments.borrow().len(),
            driver = %adapter.driver(),
            "orchestrator ready"
        );
        Ok(adapter)
    }

    fn subscribe_instruments(&self) {
        let sources: Vec<_> = self
            .inner
            .instruments
            .borrow()
            .iter()
            .enumerate()
            .filter_map(|(index, i)| i.source.clone().map(|s| (index, s)))
            .collect();

        let mut subscriptions = Vec::with_capacity(sources.len());
        for (index, source) in sources {
            let weak: Weak<Orchestra<T>> = Rc::downgrade(&self.inner);
            subscriptions.push(source.subscribe(Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    OrchestratedAdapter { inner }.on_instrument_change(index);
                }
            })));
        }
        *self.inner.subscriptions.borrow_mut() = subscriptions;
    }

    /// A backing adapter notified: refresh that instrument and re-resolve
    fn on_instrument_change(&self, index: usize) {
        if self.inner.destroyed.get() {
            return;
        }
        let source = self
            .inner
            .instruments
            .borrow()
            .get(index)
            .and_then(|i| i.source.clone());
        let Some(source) = source else {
            return;
        };

        let value = source.get();
        let now = self.inner.clock.now();
        if let Some(instrument) = self.inner.instruments.borrow_mut().get_mut(index) {
            trace!(id = %instrument.id, "instrument updated");
            instrument.value = value;
            instrument.updated_at = now;
        }

        let previous = self.value();
        self.resolve(ReconcileReason::SourceUpdate);
        self.notify_if_changed(&previous);
    }

    fn resolve(&self, reason: ReconcileReason) {
        let now = self.inner.clock.now();
        let next = run_policy(
            &self.inner.reconcile,
            &*self.inner.instruments.borrow(),
            Some(&*self.inner.resolved.borrow()),
            reason,
            now,
        );

        if let Some(next) = next {
            trace!(?reason, driver = %next.source_id, "resolved");
            *self.inner.resolved.borrow_mut() = next;
        }
    }

    fn notify_if_changed(&self, previous: &T) {
        if self.value() != *previous {
            self.inner.subscribers.notify();
        }
    }

    fn value(&self) -> T {
        self.inner.resolved.borrow().value.clone()
    }

    /// Id of the instrument driving the resolved value
    pub fn driver(&self) -> String {
        self.inner.resolved.borrow().source_id.clone()
    }

    /// Current resolution
    pub fn resolution(&self) -> Resolution<T> {
        self.inner.resolved.borrow().clone()
    }

    /// Instrument ids in registration order
    pub fn instrument_ids(&self) -> Vec<String> {
        self.inner
            .instruments
            .borrow()
            .iter()
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Diagnostics view with staleness evaluated now
    pub fn snapshot(&self) -> OrchestratorSnapshot<T> {
        let now = self.inner.clock.now();
        let instruments = self
            .inner
            .instruments
            .borrow()
            .iter()
            .map(|i| InstrumentSnapshot {
                id: i.id.clone(),
                value: i.value.clone(),
                meta: i.meta(now),
            })
            .collect();

        let resolved = self.inner.resolved.borrow();
        OrchestratorSnapshot {
            value: resolved.value.clone(),
            driver: resolved.source_id.clone(),
            instruments,
        }
    }

    fn write(&self, next: T) {
        if self.inner.destroyed.get() {
            warn!("write to destroyed orchestrator ignored");
            return;
        }

        if let Some(id) = &self.inner.optimistic_id {
            let now = self.inner.clock.now();
            if let Some(optimistic) = self
                .inner
                .instruments
                .borrow_mut()
                .iter_mut()
                .find(|i| &i.id == id)
            {
                optimistic.value = next.clone();
                optimistic.updated_at = now;
            }
        }

        if let Some(target) = &self.inner.write_to {
            let source = self
                .inner
                .instruments
                .borrow()
                .iter()
                .find(|i| &i.id == target)
                .and_then(|i| i.source.clone());
            match source {
                Some(source) => source.set(next),
                None => warn!(target = %target, "write target has no adapter"),
            }
        }

        // A write target that echoes synchronously has already re-resolved
        // and notified; compare against the value after the echo.
        let previous = self.value();
        self.resolve(ReconcileReason::Set);
        self.notify_if_changed(&previous);
    }
}

impl<T: Clone + PartialEq + 'static> SourceAdapter<T> for OrchestratedAdapter<T> {
    fn kind(&self) -> &str {
        "orchestrated"
    }

    fn get(&self) -> T {
        self.value()
    }

    fn set(&self, next: T) {
        self.write(next);
    }

    fn supports_patch(&self) -> bool {
        self.inner.merge.is_some()
    }

    fn patch(&self, partial: T) -> AccordResult<()> {
        let merge = self
            .inner
            .merge
            .ok_or(AccordError::UnsupportedOrchestratorPatch)?;
        let merged =
            merge(&self.value(), &partial).ok_or(AccordError::UnsupportedOrchestratorPatch)?;
        self.write(merged);
        Ok(())
    }

    fn subscribe(&self, callback: Callback) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    /// Unsubscribe from and destroy every backing adapter, drop subscribers
    fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        let sources: Vec<_> = self
            .inner
            .instruments
            .borrow()
            .iter()
            .filter_map(|i| i.source.clone())
            .collect();
        for source in sources {
            source.destroy();
        }
        self.inner.subscribers.clear();
        debug!("orchestrator destroyed");
    }
}

impl<T> fmt::Debug for OrchestratedAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self
            .inner
            .instruments
            .borrow()
            .iter()
            .map(|i| i.id.clone())
            .collect();
        f.debug_struct("OrchestratedAdapter")
            .field("instruments", &ids)
            .field("write_to", &self.inner.write_to)
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

/// Run a policy over the current instrument records
fn run_policy<T>(
    reconcile: &ReconcileFn<T>,
    instruments: &[InstrumentState<T>],
    last_resolved: Option<&Resolution<T>>,
    reason: ReconcileReason,
    now: Timestamp,
) -> Option<Resolution<T>> {
    let context = ReconcileContext {
        instruments: instruments
            .iter()
            .map(|i| InstrumentView {
                id: i.id.as_str(),
                value: &i.value,
                meta: i.meta(now),
            })
            .collect(),
        last_resolved,
        reason,
        now,
    };
    reconcile(&context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_adapters::{AtomAdapter, ExternalStore, ExternalStoreAdapter};
    use accord_core::ManualClock;
    use serde_json::{json, Value};

    fn hits<T: Clone + PartialEq + 'static>(
        adapter: &OrchestratedAdapter<T>,
    ) -> (Rc<Cell<usize>>, Subscription) {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = adapter.subscribe(Rc::new(move || h.set(h.get() + 1)));
        (hits, sub)
    }

    fn clock() -> Rc<ManualClock> {
        Rc::new(ManualClock::new(Timestamp(1_000)))
    }

    /// Remote store that queues writes until the test confirms them
    struct Remote {
        confirmed: Rc<RefCell<Value>>,
        inbox: Rc<RefCell<Vec<Value>>>,
        listeners: SubscriberSet,
    }

    impl Remote {
        fn new(initial: Value) -> Self {
            Remote {
                confirmed: Rc::new(RefCell::new(initial)),
                inbox: Rc::new(RefCell::new(Vec::new())),
                listeners: SubscriberSet::new(),
            }
        }

        fn adapter(&self) -> ExternalStoreAdapter<Value> {
            let (c, i, l) = (
                self.confirmed.clone(),
                self.inbox.clone(),
                self.listeners.clone(),
            );
            ExternalStoreAdapter::new(ExternalStore::new(
                move || c.borrow().clone(),
                move |next| i.borrow_mut().push(next),
                move |cb| l.subscribe(cb),
            ))
            .with_kind("remote")
        }

        fn confirm(&self, value: Value) {
            *self.confirmed.borrow_mut() = value;
            self.listeners.notify();
        }
    }

    #[test]
    fn test_priority_wins_and_changes_notify() {
        let primary = AtomAdapter::new(1);
        let cache = AtomAdapter::new(2);
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("primary", primary.clone()).priority(1))
                .instrument(InstrumentDefinition::new("cache", cache.clone())),
        )
        .unwrap();
        let (hits, _sub) = hits(&orchestra);

        assert_eq!(orchestra.get(), 1);
        assert_eq!(orchestra.driver(), "primary");
        assert_eq!(orchestra.kind(), "orchestrated");

        cache.set(3);
        assert_eq!(orchestra.get(), 1);
        assert_eq!(hits.get(), 0);

        primary.set(4);
        assert_eq!(orchestra.get(), 4);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_equal_priority_prefers_most_recent() {
        let clock = clock();
        let a = AtomAdapter::new(1);
        let b = AtomAdapter::new(2);
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .clock(clock.clone())
                .instrument(InstrumentDefinition::new("a", a.clone()))
                .instrument(InstrumentDefinition::new("b", b.clone())),
        )
        .unwrap();
        assert_eq!(orchestra.driver(), "a");

        clock.advance(Duration::from_millis(10));
        b.set(3);
        assert_eq!((orchestra.get(), orchestra.driver()), (3, "b".to_string()));

        clock.advance(Duration::from_millis(10));
        a.set(4);
        assert_eq!((orchestra.get(), orchestra.driver()), (4, "a".to_string()));
        assert_eq!(orchestra.resolution().updated_at, Timestamp(1_020));
    }

    #[test]
    fn test_stale_instrument_loses() {
        let clock = clock();
        let primary = AtomAdapter::new(1);
        let cache = AtomAdapter::new(2);
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .clock(clock.clone())
                .instrument(
                    InstrumentDefinition::new("primary", primary.clone())
                        .priority(1)
                        .stale_after(Duration::from_millis(100))
                        .role(InstrumentRole::Primary),
                )
                .instrument(
                    InstrumentDefinition::new("cache", cache.clone()).role(InstrumentRole::Cache),
                ),
        )
        .unwrap();
        let (hits, _sub) = hits(&orchestra);

        clock.advance(Duration::from_millis(150));
        let snapshot = orchestra.snapshot();
        assert!(snapshot.instruments[0].meta.stale);
        assert_eq!(snapshot.driver, "primary");

        cache.set(5);
        assert_eq!(orchestra.get(), 5);
        assert_eq!(orchestra.driver(), "cache");
        assert_eq!(hits.get(), 1);

        primary.set(9);
        assert_eq!(orchestra.get(), 9);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_all_stale_keeps_last_resolution() {
        let clock = clock();
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .clock(clock.clone())
                .instrument(
                    InstrumentDefinition::new("primary", AtomAdapter::new(1))
                        .priority(1)
                        .stale_after(Duration::from_millis(50)),
                )
                .instrument(
                    InstrumentDefinition::new("cache", AtomAdapter::new(2))
                        .stale_after(Duration::from_millis(50)),
                ),
        )
        .unwrap();

        clock.advance(Duration::from_millis(100));
        orchestra.set(7);
        assert_eq!(orchestra.get(), 1);
        assert_eq!(orchestra.driver(), "primary");
        assert!(orchestra.snapshot().instruments.iter().all(|i| i.meta.stale));
    }

    #[test]
    fn test_optimistic_write_is_visible_before_confirmation() {
        let clock = clock();
        let remote = Remote::new(json!({ "name": "a" }));
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .clock(clock.clone())
                .instrument(InstrumentDefinition::new("remote", remote.adapter()).priority(2))
                .optimistic()
                .optimistic_stale_after(Duration::from_millis(1_000))
                .write_to("remote"),
        )
        .unwrap();
        let (hits, _sub) = hits(&orchestra);

        orchestra.set(json!({ "name": "b" }));
        assert_eq!(orchestra.get(), json!({ "name": "b" }));
        assert_eq!(orchestra.driver(), DEFAULT_OPTIMISTIC_ID);
        assert_eq!(*remote.inbox.borrow(), vec![json!({ "name": "b" })]);
        assert_eq!(hits.get(), 1);

        remote.confirm(json!({ "name": "b" }));
        assert_eq!(hits.get(), 1);

        clock.advance(Duration::from_millis(2_000));
        remote.confirm(json!({ "name": "c" }));
        assert_eq!(orchestra.get(), json!({ "name": "c" }));
        assert_eq!(orchestra.driver(), "remote");
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_optimistic_priority() {
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("a", AtomAdapter::new(1)).priority(2))
                .instrument(InstrumentDefinition::new("b", AtomAdapter::new(2)).priority(5))
                .optimistic(),
        )
        .unwrap();
        let snapshot = orchestra.snapshot();
        let optimistic = snapshot.instruments.last().unwrap();
        assert_eq!(optimistic.id, "optimistic");
        assert_eq!(optimistic.meta.priority, 6);
        assert_eq!(optimistic.meta.kind, "optimistic");
        assert_eq!(optimistic.meta.role, Some(InstrumentRole::Optimistic));
        // seeded with the first instrument's value
        assert_eq!(optimistic.value, 1);

        let remote = Remote::new(json!(1));
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("remote", remote.adapter()).priority(1))
                .optimistic()
                .optimistic_priority(0)
                .optimistic_id("local")
                .write_to("remote"),
        )
        .unwrap();
        let (hits, _sub) = hits(&orchestra);
        orchestra.set(json!(2));
        assert_eq!(orchestra.get(), json!(1));
        assert_eq!(orchestra.driver(), "remote");
        assert_eq!(hits.get(), 0);
        assert_eq!(orchestra.instrument_ids(), vec!["remote", "local"]);
    }

    #[test]
    fn test_construction_errors() {
        let empty = OrchestratedAdapter::<i32>::new(OrchestratorConfig::new());
        assert!(matches!(empty, Err(AccordError::NoInstruments)));

        let duplicate = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("a", AtomAdapter::new(1)))
                .instrument(InstrumentDefinition::new("a", AtomAdapter::new(2))),
        );
        assert!(matches!(duplicate, Err(AccordError::DuplicateInstrument(id)) if id == "a"));

        let clash = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("optimistic", AtomAdapter::new(1)))
                .optimistic(),
        );
        assert!(matches!(clash, Err(AccordError::DuplicateInstrument(_))));

        let unknown = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("a", AtomAdapter::new(1)))
                .write_to("b"),
        );
        assert!(matches!(unknown, Err(AccordError::UnknownWriteTarget(id)) if id == "b"));

        let sourceless = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("a", AtomAdapter::new(1)))
                .optimistic()
                .write_to("optimistic"),
        );
        assert!(matches!(sourceless, Err(AccordError::UnknownWriteTarget(_))));
    }

    #[test]
    fn test_patch_requires_mergeable_objects() {
        let primary = AtomAdapter::new(json!({ "name": "a", "age": 1 }));
        let plain = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("primary", primary.clone()))
                .write_to("primary"),
        )
        .unwrap();
        assert!(!plain.supports_patch());
        assert_eq!(
            plain.patch(json!({ "age": 2 })),
            Err(AccordError::UnsupportedOrchestratorPatch)
        );

        let merging = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("primary", primary.clone()))
                .write_to("primary")
                .mergeable(),
        )
        .unwrap();
        merging.patch(json!({ "age": 2 })).unwrap();
        assert_eq!(primary.get(), json!({ "name": "a", "age": 2 }));
        assert_eq!(merging.get(), json!({ "name": "a", "age": 2 }));

        let scalar = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("n", AtomAdapter::new(json!(3))))
                .mergeable(),
        )
        .unwrap();
        assert_eq!(
            scalar.patch(json!({ "a": 1 })),
            Err(AccordError::UnsupportedOrchestratorPatch)
        );
    }

    #[test]
    fn test_custom_policy() {
        let reasons = Rc::new(RefCell::new(Vec::new()));
        let r = reasons.clone();
        let low = AtomAdapter::new(10);
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("high", AtomAdapter::new(1)).priority(9))
                .instrument(InstrumentDefinition::new("low", low.clone()))
                .with_reconcile(move |context| {
                    r.borrow_mut().push(context.reason);
                    context
                        .instruments
                        .iter()
                        .min_by_key(|view| view.meta.priority)
                        .map(|view| Resolution {
                            value: *view.value,
                            source_id: view.id.to_string(),
                            updated_at: view.meta.updated_at,
                        })
                }),
        )
        .unwrap();

        assert_eq!(orchestra.get(), 10);
        low.set(11);
        orchestra.set(0);
        assert_eq!(orchestra.get(), 11);
        assert_eq!(
            *reasons.borrow(),
            vec![
                ReconcileReason::Init,
                ReconcileReason::SourceUpdate,
                ReconcileReason::Set
            ]
        );
    }

    #[test]
    fn test_policy_without_answer_falls_back() {
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("first", AtomAdapter::new(1)))
                .instrument(InstrumentDefinition::new("second", AtomAdapter::new(2)).priority(3))
                .with_reconcile(|_| None),
        )
        .unwrap();
        assert_eq!(orchestra.get(), 1);
        assert_eq!(orchestra.driver(), "first");
    }

    #[test]
    fn test_snapshot_serializes() {
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new().instrument(
                InstrumentDefinition::new("primary", AtomAdapter::new(json!("v")))
                    .role(InstrumentRole::Primary),
            ),
        )
        .unwrap();
        let json = serde_json::to_value(orchestra.snapshot()).unwrap();
        assert_eq!(json["driver"], json!("primary"));
        assert_eq!(json["instruments"][0]["kind"], json!("atom"));
        assert_eq!(json["instruments"][0]["role"], json!("primary"));
        assert_eq!(json["instruments"][0]["stale"], json!(false));
    }

    #[test]
    fn test_destroy() {
        let primary = AtomAdapter::new(1);
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("primary", primary.clone()))
                .write_to("primary"),
        )
        .unwrap();
        let (hits, _sub) = hits(&orchestra);
        assert_eq!(primary.subscriber_count(), 1);

        orchestra.destroy();
        assert!(orchestra.is_destroyed());
        assert_eq!(primary.subscriber_count(), 0);
        assert_eq!(orchestra.subscriber_count(), 0);

        primary.set(2);
        orchestra.set(3);
        assert_eq!(orchestra.get(), 1);
        assert_eq!(primary.get(), 2);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_backs_a_section() {
        use accord_state::{Conductor, ConductorConfig, Scheduler, SectionDefinition};

        let primary = AtomAdapter::new(json!({ "name": "p" }));
        let cache = AtomAdapter::new(json!({ "name": "c" }));
        let orchestra = OrchestratedAdapter::new(
            OrchestratorConfig::new()
                .instrument(InstrumentDefinition::new("primary", primary.clone()).priority(1))
                .instrument(InstrumentDefinition::new("cache", cache))
                .write_to("primary")
                .mergeable(),
        )
        .unwrap();
        let conductor = Conductor::new(
            ConductorConfig::new()
                .scheduler(Scheduler::Immediate)
                .section(SectionDefinition::new("profile", orchestra.clone())),
        )
        .unwrap();
        assert_eq!(conductor.describe("profile").unwrap().kind, "orchestrated");

        primary.set(json!({ "name": "q" }));
        assert_eq!(conductor.get("profile").unwrap(), json!({ "name": "q" }));

        conductor.patch("profile", json!({ "age": 3 })).unwrap();
        assert_eq!(primary.get(), json!({ "name": "q", "age": 3 }));
        assert_eq!(orchestra.get(), json!({ "name": "q", "age": 3 }));
        assert_eq!(conductor.history().len(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_highest_priority_fresh_instrument_drives(
                priorities in prop::collection::vec(-5i32..5, 1..8)
            ) {
                let mut config = OrchestratorConfig::new().clock(clock());
                for (index, priority) in priorities.iter().enumerate() {
                    config = config.instrument(
                        InstrumentDefinition::new(format!("i{}", index), AtomAdapter::new(index))
                            .priority(*priority),
                    );
                }
                let orchestra = OrchestratedAdapter::new(config).unwrap();

                let max = priorities.iter().max().copied().unwrap_or_default();
                let expected = priorities.iter().position(|p| *p == max).unwrap_or_default();
                prop_assert_eq!(orchestra.get(), expected);
                prop_assert_eq!(orchestra.driver(), format!("i{}", expected));
            }
        }
    }
}
