//! Scenario harness - a conductor wired to atoms, storage and a manual clock
//!
//! Notifications go through a microtask queue the harness drains explicitly,
//! so a scenario controls exactly when subscribers run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use accord_adapters::{AtomAdapter, MemoryStorage};
use accord_core::{AccordResult, ManualClock, SourceAdapter, Subscription, Timestamp, Value};
use accord_state::{
    Conductor, ConductorConfig, DerivedSectionDefinition, PersistConfig, Scheduler,
    SectionDefinition, DEFAULT_HISTORY_LIMIT,
};

struct SectionPlan {
    key: String,
    initial: Value,
    depends_on: Vec<String>,
    persist: Option<Option<Duration>>,
}

/// Harness builder
pub struct HarnessBuilder {
    sections: Vec<SectionPlan>,
    derived: Vec<DerivedSectionDefinition>,
    history_limit: usize,
    start: Timestamp,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        HarnessBuilder {
            sections: Vec::new(),
            derived: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            start: Timestamp::from_millis(1_000),
        }
    }
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atom-backed, mergeable section
    pub fn section(mut self, key: &str, initial: Value) -> Self {
        self.sections.push(SectionPlan {
            key: key.to_string(),
            initial,
            depends_on: Vec::new(),
            persist: None,
        });
        self
    }

    pub fn section_depending(mut self, key: &str, initial: Value, depends_on: &[&str]) -> Self {
        self.sections.push(SectionPlan {
            key: key.to_string(),
            initial,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            persist: None,
        });
        self
    }

    /// Section persisted under its own key in the harness storage
    pub fn persisted(mut self, key: &str, initial: Value, throttle: Option<Duration>) -> Self {
        self.sections.push(SectionPlan {
            key: key.to_string(),
            initial,
            depends_on: Vec::new(),
            persist: Some(throttle),
        });
        self
    }

    pub fn derived(mut self, definition: DerivedSectionDefinition) -> Self {
        self.derived.push(definition);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn build(self) -> AccordResult<ScenarioHarness> {
        let clock = Rc::new(ManualClock::new(self.start));
        let storage = MemoryStorage::new();
        let mut atoms = HashMap::new();

        let mut config = ConductorConfig::new()
            .scheduler(Scheduler::microtask())
            .history_limit(self.history_limit)
            .clock(clock.clone());

        for plan in self.sections {
            let atom = AtomAdapter::new(plan.initial);
            let mut definition = SectionDefinition::new(plan.key.clone(), atom.clone())
                .depends_on(plan.depends_on)
                .mergeable();
            if let Some(throttle) = plan.persist {
                let mut persist =
                    PersistConfig::new(plan.key.clone()).with_storage(Rc::new(storage.clone()));
                if let Some(throttle) = throttle {
                    persist = persist.with_throttle(throttle);
                }
                definition = definition.persist(persist);
            }
            atoms.insert(plan.key, atom);
            config = config.section(definition);
        }
        for definition in self.derived {
            config = config.derived(definition);
        }

        let conductor = Conductor::new(config)?;
        let notifications: Rc<RefCell<HashMap<String, usize>>> = Rc::default();
        let mut subscriptions = Vec::with_capacity(conductor.keys().len());
        for key in conductor.keys().to_vec() {
            let counts = notifications.clone();
            let counted = key.clone();
            subscriptions.push(conductor.subscribe(&key, move || {
                *counts.borrow_mut().entry(counted.clone()).or_default() += 1;
            })?);
        }

        Ok(ScenarioHarness {
            conductor,
            clock,
            storage,
            atoms,
            notifications,
            _subscriptions: subscriptions,
        })
    }
}

/// Conductor under test plus its collaborators
pub struct ScenarioHarness {
    pub conductor: Conductor,
    pub clock: Rc<ManualClock>,
    pub storage: MemoryStorage,
    atoms: HashMap<String, AtomAdapter<Value>>,
    notifications: Rc<RefCell<HashMap<String, usize>>>,
    _subscriptions: Vec<Subscription>,
}

impl ScenarioHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Run queued notification flushes. Returns the number of tasks run.
    pub fn drain(&self) -> usize {
        self.conductor
            .scheduler()
            .task_queue()
            .map(|queue| queue.run_until_idle())
            .unwrap_or(0)
    }

    /// Advance the clock and run debounced writes that became due
    pub fn advance(&self, by: Duration) -> AccordResult<usize> {
        self.clock.advance(by);
        self.conductor.poll_persistence()
    }

    /// Delivered notifications for a section since the last reset
    pub fn notifications(&self, key: &str) -> usize {
        self.notifications.borrow().get(key).copied().unwrap_or(0)
    }

    /// Keys with at least one delivered notification, sorted
    pub fn notified_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .notifications
            .borrow()
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn reset_notifications(&self) {
        self.notifications.borrow_mut().clear();
    }

    /// Backing atom of an adapter-backed section
    pub fn atom(&self, key: &str) -> Option<&AtomAdapter<Value>> {
        self.atoms.get(key)
    }

    /// Change a backing store behind the conductor's back
    pub fn external_set(&self, key: &str, value: Value) -> bool {
        match self.atoms.get(key) {
            Some(atom) => {
                atom.set(value);
                true
            }
            None => false,
        }
    }
}
